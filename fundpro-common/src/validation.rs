//! Configuration validation.
//!
//! Rejects tuning values that would make the estimate or attribution
//! pipelines produce meaningless numbers.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    AttributionConfig, Config, EstimateConfig, ObservabilityConfig, RefreshConfig, ServiceConfig,
    SyncConfig,
};

/// Longest accepted attribution TTL or holdings sync interval, in days.
pub const MAX_TTL_DAYS: i64 = 3650;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid cron expression for {field}: {reason}")]
    InvalidSchedule { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.observability,
            &self.estimate,
            &self.attribution,
            &self.refresh,
            &self.sync,
            &self.service,
        ];

        let mut errors: Vec<ValidationError> = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load (with env overrides) and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(invalid("observability.log_format", "must be 'json' or 'pretty'"));
        }

        Ok(())
    }
}

impl Validate for EstimateConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.correction_factor.is_finite() || self.correction_factor <= 1.0 {
            return Err(invalid(
                "estimate.correction_factor",
                "must be a finite number greater than 1",
            ));
        }
        if self.top_n == 0 {
            return Err(invalid("estimate.top_n", "must be at least 1"));
        }
        Ok(())
    }
}

impl Validate for AttributionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err(invalid("attribution.min_coverage", "must be between 0 and 1"));
        }
        if !(1..=MAX_TTL_DAYS).contains(&self.ttl_days) {
            return Err(invalid(
                "attribution.ttl_days",
                format!("must be between 1 and {}", MAX_TTL_DAYS),
            ));
        }
        if self.justification_holdings == 0 {
            return Err(invalid("attribution.justification_holdings", "must be at least 1"));
        }
        if self.refresh_timeout_secs == 0 {
            return Err(invalid("attribution.refresh_timeout_secs", "must be greater than 0"));
        }
        Ok(())
    }
}

impl Validate for RefreshConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }
        cron::Schedule::from_str(&self.schedule).map_err(|e| ValidationError::InvalidSchedule {
            field: "refresh.schedule".into(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

impl Validate for SyncConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if !(1..=MAX_TTL_DAYS).contains(&self.interval_days) {
            return Err(invalid(
                "sync.interval_days",
                format!("must be between 1 and {}", MAX_TTL_DAYS),
            ));
        }
        Ok(())
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.collaborator_timeout_secs == 0 {
            return Err(invalid("service.collaborator_timeout_secs", "must be greater than 0"));
        }
        if self.quote_timeout_secs == 0 {
            return Err(invalid("service.quote_timeout_secs", "must be greater than 0"));
        }
        Ok(())
    }
}
