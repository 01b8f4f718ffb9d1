//! Custom error types for the plugin library.
//!
//! `PluginError` consolidates the failure modes shared by all plugins:
//! configuration parsing and validation, use of a closed connection,
//! protocol replies that do not parse, and use of functionality that was
//! not compiled in. Driver-level
//! code uses `anyhow::Result` with context and converts into these variants
//! where a typed error is worth matching on.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Errors raised by adapters, plugins, and configuration loading.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Instrument '{0}' is not connected")]
    NotConnected(String),

    #[error("Malformed identification reply: '{0}'")]
    Identification(String),

    #[error("No controller has been defined externally while this plugin is a slave")]
    SlaveWithoutController,

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}
