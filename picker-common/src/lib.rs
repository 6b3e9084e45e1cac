//! Picker Common - shared configuration, logging and error types.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.picker/config.json` + `PICKER_*` env)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, FeedConfig, FeedKind, ObservabilityConfig, OutputConfig, RiskSettings,
    ScannerSettings, ScheduleConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
