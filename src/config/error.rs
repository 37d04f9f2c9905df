//! Errors raised while loading, validating or saving configuration.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file (or its parent directory) could not be read or written.
    #[error("Cannot {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not valid TOML for [`Config`](super::Config).
    #[error("Invalid TOML in '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but cannot drive a port or stream.
    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },

    /// A `SERIAL_BINDINGS_*` override could not be parsed.
    #[error("Environment variable {var}={value:?}: {message}")]
    EnvVar {
        var: String,
        value: String,
        message: &'static str,
    },

    /// `save()` on a loader that was not loaded from a file.
    #[error("No configuration file path to save to")]
    NoPath,
}

impl ConfigError {
    pub(crate) fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}
