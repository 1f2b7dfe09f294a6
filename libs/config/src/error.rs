//! Error types for configuration parsing, validation, and sources.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while parsing or validating a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid YAML or does not match the schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A template has an empty identifier glob.
    #[error("template #{index} has an empty identifier_glob")]
    EmptyGlob { index: usize },

    /// A template's identifier glob is not a valid pattern.
    #[error("invalid identifier_glob '{glob}': {message}")]
    InvalidGlob { glob: String, message: String },

    /// Two templates declare the same identifier glob.
    #[error("duplicate identifier_glob '{glob}'")]
    DuplicateGlob { glob: String },

    /// A template carries an out-of-range value.
    #[error("invalid template '{glob}': {message}")]
    InvalidTemplate { glob: String, message: String },
}

/// Errors produced by a configuration source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The reload signal handler could not be installed.
    #[error("failed to install reload signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// The source string names a scheme we do not support.
    #[error("unsupported configuration source scheme '{0}'")]
    UnsupportedScheme(String),
}
