//! Configuration validation.
//!
//! Checks that required values are present and within valid ranges before a
//! scan or a schedule starts.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    Config, FeedConfig, FeedKind, ObservabilityConfig, RiskSettings, ScannerSettings,
    ScheduleConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

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

fn positive(field: &str, value: Option<f64>) -> ValidationResult<()> {
    match value {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: format!("must be a positive number, got {}", v),
        }),
        _ => Ok(()),
    }
}

fn non_negative(field: &str, value: Option<f64>) -> ValidationResult<()> {
    match value {
        Some(v) if !(v.is_finite() && v >= 0.0) => Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: format!("must not be negative, got {}", v),
        }),
        _ => Ok(()),
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = self.feed.validate() {
            errors.push(e);
        }
        if let Some(ref scanner) = self.scanner {
            if let Err(e) = scanner.validate() {
                errors.push(e);
            }
        }
        if let Some(ref risk) = self.risk {
            if let Err(e) = risk.validate() {
                errors.push(e);
            }
        }
        if let Err(e) = self.schedule.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load and validate configuration (with env overrides).
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
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for FeedConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.kind == FeedKind::Http {
            match self.base_url.as_deref() {
                None | Some("") => {
                    return Err(ValidationError::MissingField {
                        field: "feed.base_url (required for http feed)".into(),
                    });
                }
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    return Err(ValidationError::InvalidValue {
                        field: "feed.base_url".into(),
                        reason: format!("must be an http(s) URL: {}", url),
                    });
                }
                _ => {}
            }
        }

        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "feed.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ScannerSettings {
    fn validate(&self) -> ValidationResult<()> {
        non_negative("scanner.min_price", self.min_price)?;
        non_negative("scanner.max_price", self.max_price)?;
        non_negative("scanner.min_volume", self.min_volume)?;
        non_negative("scanner.min_deviation_pct", self.min_deviation_pct)?;
        non_negative("scanner.min_relative_volume", self.min_relative_volume)?;
        non_negative("scanner.min_atr_ratio", self.min_atr_ratio)?;

        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(ValidationError::Conflict {
                    reason: format!("scanner.min_price {} exceeds scanner.max_price {}", min, max),
                });
            }
        }

        if self.atr_period == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "scanner.atr_period".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.rs_lookback_weeks == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "scanner.rs_lookback_weeks".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if let Some(ref mode) = self.rs_mode {
            if !["return", "ema"].contains(&mode.to_lowercase().as_str()) {
                return Err(ValidationError::InvalidValue {
                    field: "scanner.rs_mode".into(),
                    reason: "must be one of: return, ema".into(),
                });
            }
        }
        if self.max_concurrency == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "scanner.max_concurrency".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.requests_per_minute == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "scanner.requests_per_minute".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for RiskSettings {
    fn validate(&self) -> ValidationResult<()> {
        positive("risk.account_size", self.account_size)?;
        positive("risk.max_daily_loss", self.max_daily_loss)?;
        positive("risk.max_risk_per_trade", self.max_risk_per_trade)?;
        positive("risk.stop_atr_multiple", self.stop_atr_multiple)?;
        positive("risk.reward_risk_ratio", self.reward_risk_ratio)?;
        positive("risk.max_position_pct", self.max_position_pct)?;

        if let Some(pct) = self.max_position_pct {
            if pct > 100.0 {
                return Err(ValidationError::InvalidValue {
                    field: "risk.max_position_pct".into(),
                    reason: format!("must be at most 100, got {}", pct),
                });
            }
        }

        if let (Some(per_trade), Some(account)) = (self.max_risk_per_trade, self.account_size) {
            if per_trade > account {
                return Err(ValidationError::Conflict {
                    reason: format!(
                        "risk.max_risk_per_trade {} exceeds risk.account_size {}",
                        per_trade, account
                    ),
                });
            }
        }

        Ok(())
    }
}

impl Validate for ScheduleConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.cron.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "schedule.cron".into(),
            });
        }
        if cron::Schedule::from_str(&self.cron).is_err() {
            return Err(ValidationError::InvalidValue {
                field: "schedule.cron".into(),
                reason: format!("invalid cron expression: {}", self.cron),
            });
        }

        Ok(())
    }
}
