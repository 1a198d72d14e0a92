//! Custom error types for ryg.
//!
//! Agent failures, unmet phase conditions and exhausted retry budgets are
//! resolved inside the orchestration loop and never show up here. This type
//! covers what the caller can actually get wrong: configuration, construction
//! and misuse of the phase state machine.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ryg operations
#[derive(Error, Debug)]
pub enum RygError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Unsupported configuration file format
    #[error("Unsupported configuration format: {path} (expected .toml or .json)")]
    UnsupportedConfigFormat { path: PathBuf },

    // =========================================================================
    // Construction Errors
    // =========================================================================
    /// Orchestrator built without an agent invoker
    #[error("No agent invoker supplied - call `invoker()` or `invoke_fn()` before `build()`")]
    MissingInvoker,

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    /// Operation on a feature that has no active cycle
    #[error("No active TDD cycle for feature '{feature_id}'")]
    NoActiveCycle { feature_id: String },

    /// Feature execution was cancelled by the caller (reported by the CLI)
    #[error("Feature '{feature_id}' cancelled")]
    Cancelled { feature_id: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML error wrapper
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl RygError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing-cycle error
    pub fn no_active_cycle(feature_id: impl Into<String>) -> Self {
        Self::NoActiveCycle {
            feature_id: feature_id.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error indicates a programming or setup mistake
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingInvoker
                | Self::InvalidConfig { .. }
                | Self::Config { .. }
                | Self::UnsupportedConfigFormat { .. }
                | Self::NoActiveCycle { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. }
            | Self::InvalidConfig { .. }
            | Self::UnsupportedConfigFormat { .. } => 7,
            Self::MissingInvoker => 6,
            Self::Cancelled { .. } => 130,
            _ => 1,
        }
    }
}

/// Type alias for ryg results
pub type Result<T> = std::result::Result<T, RygError>;
