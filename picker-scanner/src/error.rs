//! Scan error taxonomy.
//!
//! Per-symbol errors are recovered locally by the session (the symbol is
//! dropped or loses indicator-dependent treatment). Scan-level errors abort
//! the scan and nothing is published.

use thiserror::Error;

use crate::data::FeedError;

/// Errors produced while scanning, ranking or planning.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScanError {
    /// Per-symbol data could not be fetched or failed validation
    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// The feed asked us to slow down
    #[error("Rate limited{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Not enough bars for an indicator
    #[error("Insufficient data: need {needed} bars, have {available}")]
    InsufficientData { needed: usize, available: usize },

    /// Stop distance is zero or negative, no position can be sized
    #[error("Degenerate risk for {symbol}: risk per share {risk_per_share}")]
    DegenerateRisk { symbol: String, risk_per_share: f64 },

    /// The scan was cancelled before completion
    #[error("Scan aborted")]
    ScanAborted,

    /// The feed is unreachable for the whole universe
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    /// Configuration rejected before the scan started
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub(crate) fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(", retry after {} seconds", secs))
        .unwrap_or_default()
}

impl ScanError {
    /// Wrap a feed error for a specific symbol.
    pub fn from_feed(symbol: &str, err: &FeedError) -> Self {
        match err {
            FeedError::RateLimited { retry_after_secs } => Self::RateLimited {
                retry_after_secs: *retry_after_secs,
            },
            other => Self::DataUnavailable {
                symbol: symbol.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Whether the error aborts the whole scan rather than a single symbol.
    pub fn is_scan_level(&self) -> bool {
        matches!(
            self,
            Self::ScanAborted | Self::FeedUnavailable(_) | Self::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ScanError::InsufficientData {
            needed: 15,
            available: 3,
        };
        assert_eq!(err.to_string(), "Insufficient data: need 15 bars, have 3");

        let err = ScanError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("30 seconds"));
        assert_eq!(
            ScanError::RateLimited {
                retry_after_secs: None
            }
            .to_string(),
            "Rate limited"
        );
    }

    #[test]
    fn test_from_feed() {
        let err = ScanError::from_feed("AAA", &FeedError::NotFound("AAA".into()));
        assert!(matches!(err, ScanError::DataUnavailable { ref symbol, .. } if symbol == "AAA"));

        let err = ScanError::from_feed(
            "AAA",
            &FeedError::RateLimited {
                retry_after_secs: Some(5),
            },
        );
        assert_eq!(
            err,
            ScanError::RateLimited {
                retry_after_secs: Some(5)
            }
        );
    }

    #[test]
    fn test_scan_level() {
        assert!(ScanError::ScanAborted.is_scan_level());
        assert!(ScanError::FeedUnavailable("down".into()).is_scan_level());
        assert!(!ScanError::InsufficientData {
            needed: 1,
            available: 0
        }
        .is_scan_level());
    }
}
