//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file {} does not exist", path.display())]
    Missing { path: PathBuf },

    /// The file extension names a format that is unknown or not compiled in.
    #[error("Configuration file {} has an unsupported format", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// A source could not be read or did not fit [`HeedConfig`](super::HeedConfig).
    #[error("Cannot read configuration: {0}")]
    Extract(Box<figment::Error>),

    /// Values were read but cannot work together.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Extract(Box::new(e))
    }
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
