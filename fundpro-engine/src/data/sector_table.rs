//! Static stock → sector board table.
//!
//! A small built-in table of heavily held A-share names, extended or
//! overridden from `sectors.overrides` in the config file. Codes not in the
//! table resolve to unknown.

use std::collections::HashMap;

use fundpro_common::config::SectorsConfig;

use super::provider::SectorLookup;
use super::Sector;

/// (board code, board name, member stock codes)
const BUILTIN_SECTORS: &[(&str, &str, &[&str])] = &[
    (
        "BK0438",
        "食品饮料",
        &["600519", "000858", "002304", "600809", "000568", "600887"],
    ),
    ("BK1040", "中药", &["600276", "600196", "000538", "600332"]),
    ("BK1033", "电池", &["300750", "002594", "601012", "600438"]),
    ("BK1036", "半导体", &["688981", "603501", "002371"]),
    ("BK0736", "银行", &["600036", "000001", "601166"]),
    ("BK0737", "证券", &["600030", "601688", "300059"]),
];

/// Normalize "600519", "600519.SH" or "1519" style codes to 6 digits.
fn normalize_code(stock_code: &str) -> String {
    let bare = stock_code.split('.').next().unwrap_or(stock_code).trim();
    format!("{:0>6}", bare)
}

/// In-memory sector table.
#[derive(Debug, Clone, Default)]
pub struct StaticSectorTable {
    table: HashMap<String, Sector>,
}

impl StaticSectorTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table preloaded with the built-in mapping.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (code, name, members) in BUILTIN_SECTORS {
            let sector = Sector::new(*code, *name);
            for stock_code in *members {
                table.insert(stock_code, sector.clone());
            }
        }
        table
    }

    /// Built-in table with config overrides applied on top.
    pub fn from_config(config: &SectorsConfig) -> Self {
        let mut table = Self::builtin();
        for (stock_code, entry) in &config.overrides {
            table.insert(stock_code, Sector::new(&entry.code, &entry.name));
        }
        table
    }

    /// Map a stock to a sector, replacing any previous mapping.
    pub fn insert(&mut self, stock_code: &str, sector: Sector) {
        self.table.insert(normalize_code(stock_code), sector);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl SectorLookup for StaticSectorTable {
    fn resolve_sector(&self, stock_code: &str) -> Option<Sector> {
        self.table.get(&normalize_code(stock_code)).cloned()
    }
}
