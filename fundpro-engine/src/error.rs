//! Error taxonomy for the estimate and attribution pipelines.

use thiserror::Error;

use crate::data::ProviderError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, FundError>;

/// Failures surfaced to callers of the engine.
///
/// `Clone` because a single-flight recomputation hands the same outcome to
/// every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FundError {
    /// A required upstream value is missing (no net value, no snapshot).
    /// Callers may retry with backoff.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// The holdings snapshot is empty or cannot support a result.
    /// Callers should show "no data" instead of a zero value.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Waiting on a collaborator or an in-flight recomputation exceeded its budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Unexpected failure (background task panicked, store write failed).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FundError {
    /// Whether a retry might succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DataUnavailable(_) | Self::Timeout(_))
    }

    /// Suggested HTTP status for an outer API layer.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::DataUnavailable(_) => 503,
            Self::InsufficientData(_) => 404,
            Self::Timeout(_) => 504,
            Self::Internal(_) => 500,
        }
    }
}

impl From<ProviderError> for FundError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(msg) => Self::Timeout(msg),
            ProviderError::Internal(msg) => Self::Internal(msg),
            other => Self::DataUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(FundError::DataUnavailable("nav".into()).is_retryable());
        assert!(FundError::Timeout("wait".into()).is_retryable());
        assert!(!FundError::InsufficientData("empty".into()).is_retryable());
        assert!(!FundError::Internal("panic".into()).is_retryable());
    }

    #[test]
    fn test_from_provider_error() {
        let err: FundError = ProviderError::NotFound("161725".into()).into();
        assert!(matches!(err, FundError::DataUnavailable(_)));

        let err: FundError = ProviderError::Timeout("quotes".into()).into();
        assert_eq!(err, FundError::Timeout("quotes".into()));

        let err: FundError = ProviderError::Network("reset".into()).into();
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FundError::DataUnavailable("x".into()).status_code(), 503);
        assert_eq!(FundError::InsufficientData("x".into()).status_code(), 404);
        assert_eq!(FundError::Timeout("x".into()).status_code(), 504);
    }
}
