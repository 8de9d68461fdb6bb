//! Local fund data storage using SQLite.
//!
//! Provides persistent storage for:
//! - Disclosed holdings snapshots (one row per holding per quarter)
//! - Computed sector attributions (one row per fund, replaced on write)
//!
//! Snapshots are written by the holdings sync job and read back by the
//! engine through [`HoldingsStore`]; attributions are written through after
//! every recomputation and loaded at startup to warm the cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::provider::{AttributionStore, HoldingsStore, ProviderError};
use super::{HoldingsSnapshot, StockHolding};
use crate::attribution::{SectorAttribution, SectorWeight};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Disclosed fund holdings
CREATE TABLE IF NOT EXISTS fund_holdings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fund_code TEXT NOT NULL,
    stock_code TEXT NOT NULL,
    stock_name TEXT NOT NULL,
    weight REAL NOT NULL,
    quarter TEXT NOT NULL,
    rank INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(fund_code, stock_code, quarter)
);

CREATE INDEX IF NOT EXISTS idx_fund_holdings_fund_quarter
ON fund_holdings(fund_code, quarter DESC);

-- Holdings-derived sector attribution, one row per fund
CREATE TABLE IF NOT EXISTS fund_sector_mapping (
    fund_code TEXT PRIMARY KEY,
    sector_code TEXT NOT NULL,
    sector_name TEXT NOT NULL,
    confidence REAL NOT NULL,
    coverage REAL NOT NULL,
    degraded INTEGER NOT NULL DEFAULT 0,
    derived_from TEXT NOT NULL,
    justification TEXT NOT NULL,
    sector_weights_json TEXT NOT NULL,
    computed_at TEXT NOT NULL
);
"#;

/// Fixed-width RFC 3339 so that `MAX(updated_at)` orders correctly.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProviderError::Storage(format!("bad timestamp {:?}: {}", s, e)))
}

// ============================================================================
// Local Storage
// ============================================================================

/// Local SQLite storage for fund data
pub struct LocalStorage {
    /// rusqlite::Connection is Send but not Sync, hence the Mutex
    db: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl LocalStorage {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(db_path).context("Failed to open local storage database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;

        let storage = Self::with_connection(conn, Some(db_path.to_path_buf()))?;
        info!(db_path = %db_path.display(), "Initialized local storage");
        Ok(storage)
    }

    /// In-memory database, for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Database path, `None` when in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // ========================================================================
    // Holdings Operations
    // ========================================================================

    /// Store a snapshot, replacing any rows already stored for its
    /// (fund, quarter). Returns the number of holdings written.
    pub async fn save_snapshot(&self, snapshot: &HoldingsSnapshot) -> Result<usize> {
        snapshot
            .validate()
            .map_err(|reason| anyhow::anyhow!("Invalid snapshot {}: {}", snapshot.id(), reason))?;

        let updated_at = format_timestamp(Utc::now());
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        tx.execute(
            "DELETE FROM fund_holdings WHERE fund_code = ?1 AND quarter = ?2",
            params![snapshot.fund_code, snapshot.quarter],
        )?;

        for holding in &snapshot.holdings {
            tx.execute(
                r#"
                INSERT INTO fund_holdings
                (fund_code, stock_code, stock_name, weight, quarter, rank, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    snapshot.fund_code,
                    holding.stock_code,
                    holding.stock_name,
                    holding.weight,
                    snapshot.quarter,
                    holding.rank,
                    updated_at,
                ],
            )?;
        }

        tx.commit().context("Failed to commit holdings snapshot")?;

        debug!(
            fund_code = %snapshot.fund_code,
            quarter = %snapshot.quarter,
            count = snapshot.len(),
            "Saved holdings snapshot"
        );
        Ok(snapshot.len())
    }

    /// Fund codes with at least one stored snapshot.
    pub async fn list_funds(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT DISTINCT fund_code FROM fund_holdings ORDER BY fund_code")?;
        let funds = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(funds)
    }

    /// Remove every stored quarter for a fund. Returns the rows deleted.
    pub async fn delete_holdings(&self, fund_code: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM fund_holdings WHERE fund_code = ?1",
            params![fund_code],
        )?;
        Ok(deleted)
    }
}

#[async_trait]
impl HoldingsStore for LocalStorage {
    async fn get_snapshot(&self, fund_code: &str) -> Result<HoldingsSnapshot, ProviderError> {
        let db = self.db.lock().await;

        let quarter: Option<String> = db
            .query_row(
                "SELECT quarter FROM fund_holdings WHERE fund_code = ?1 ORDER BY quarter DESC LIMIT 1",
                params![fund_code],
                |row| row.get(0),
            )
            .optional()?;

        let Some(quarter) = quarter else {
            return Err(ProviderError::NotFound(format!(
                "no holdings stored for fund {}",
                fund_code
            )));
        };

        let mut stmt = db.prepare(
            r#"
            SELECT stock_code, stock_name, weight, rank
            FROM fund_holdings
            WHERE fund_code = ?1 AND quarter = ?2
            ORDER BY rank
            "#,
        )?;
        let holdings = stmt
            .query_map(params![fund_code, quarter], |row| {
                Ok(StockHolding {
                    stock_code: row.get(0)?,
                    stock_name: row.get(1)?,
                    weight: row.get(2)?,
                    rank: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(HoldingsSnapshot::new(fund_code, quarter, holdings))
    }

    async fn get_last_sync_time(
        &self,
        fund_code: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let db = self.db.lock().await;
        let latest: Option<String> = db.query_row(
            "SELECT MAX(updated_at) FROM fund_holdings WHERE fund_code = ?1",
            params![fund_code],
            |row| row.get(0),
        )?;

        latest.as_deref().map(parse_timestamp).transpose()
    }
}

#[async_trait]
impl AttributionStore for LocalStorage {
    async fn save_attribution(&self, attribution: &SectorAttribution) -> Result<(), ProviderError> {
        let weights_json = serde_json::to_string(&attribution.sector_weights)
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT OR REPLACE INTO fund_sector_mapping
            (fund_code, sector_code, sector_name, confidence, coverage, degraded,
             derived_from, justification, sector_weights_json, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                attribution.fund_code,
                attribution.sector_code,
                attribution.sector_name,
                attribution.confidence,
                attribution.coverage,
                attribution.degraded,
                attribution.derived_from,
                attribution.justification,
                weights_json,
                format_timestamp(attribution.computed_at),
            ],
        )?;

        debug!(fund_code = %attribution.fund_code, "Persisted sector attribution");
        Ok(())
    }

    async fn load_attributions(&self) -> Result<Vec<SectorAttribution>, ProviderError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            r#"
            SELECT fund_code, sector_code, sector_name, confidence, coverage, degraded,
                   derived_from, justification, sector_weights_json, computed_at
            FROM fund_sector_mapping
            ORDER BY fund_code
            "#,
        )?;

        let attributions = stmt
            .query_map([], |row| {
                let weights_json: String = row.get(8)?;
                let computed_at: String = row.get(9)?;
                Ok(SectorAttribution {
                    fund_code: row.get(0)?,
                    sector_code: row.get(1)?,
                    sector_name: row.get(2)?,
                    confidence: row.get(3)?,
                    coverage: row.get(4)?,
                    degraded: row.get(5)?,
                    derived_from: row.get(6)?,
                    justification: row.get(7)?,
                    sector_weights: serde_json::from_str::<Vec<SectorWeight>>(&weights_json)
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e))
                        })?,
                    computed_at: parse_timestamp(&computed_at).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e))
                    })?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(attributions)
    }
}

// ============================================================================
// Tests
// ============================================================================
