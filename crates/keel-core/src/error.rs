//! Error types for keel

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using KeelError
pub type Result<T> = std::result::Result<T, KeelError>;

/// Main error type for keel core operations
#[derive(Debug, Error)]
pub enum KeelError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Project model errors
    #[error(transparent)]
    Model(#[from] ModelError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Project model errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// A module name was declared twice
    #[error("Module '{0}' is declared more than once")]
    DuplicateModule(String),

    /// A dependency points at a module that does not exist
    #[error("Module '{module}' depends on unknown module '{dependency}'")]
    UnknownModuleDependency { module: String, dependency: String },

    /// Unknown platform identifier
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
}

impl KeelError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
