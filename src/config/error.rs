//! Configuration Error Types

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Layered sources could not be read or merged
    #[error("Failed to load configuration from {source_description}: {error}")]
    LoadError {
        source_description: String,
        error: String,
    },

    /// Merged sources did not match the configuration schema
    #[error("Failed to deserialize configuration: {0}")]
    DeserializationError(String),

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(e: config::ConfigError) -> Self {
        Self::DeserializationError(e.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
