//! Error types for blockext
//!
//! Crate-level errors wrapping the extension system and configuration.

use thiserror::Error;

use crate::extensions::ExtensionError;

/// Errors that can occur in blockext
#[derive(Debug, Error)]
pub enum BlockextError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Extension loading or execution errors
    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias for blockext operations
pub type BlockextResult<T> = Result<T, BlockextError>;
