//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading configuration or cluster parameters.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file named explicitly does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Reading the configuration file failed.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`super::Config`].
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A required field has no value and no default.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field or environment variable has an unusable value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// A value was supplied for a field the schema does not know.
    #[error("Unknown field: {0}")]
    UnknownField(String),
}
