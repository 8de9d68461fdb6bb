//! FundPro Common - configuration, validation, and logging shared by the
//! FundPro engine crates.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    AttributionConfig, Config, EstimateConfig, MarketConfig, ObservabilityConfig, RefreshConfig,
    SectorEntry, SectorsConfig, ServiceConfig, StorageConfig, SyncConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
