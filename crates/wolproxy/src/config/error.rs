use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse TOML from file '{path}': {source}")]
    TomlDeserialization {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to write configuration file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Configuration validation failed: {reason}")]
    Validation { reason: String },
    #[error("Invalid configuration value for '{field}': {details}")]
    InvalidValue { field: String, details: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
