//! Runtime error types.

use heed_framework::DispatchError;
use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur while starting or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The handler registry rejected a request.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// `run` was called a second time.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// A scheduled job with this key is already running.
    #[error("A job with key `{key}` is already scheduled")]
    DuplicateJob { key: String },

    /// A scheduled job was built with settings that cannot run.
    #[error("Invalid job: {message}")]
    InvalidJob { message: String },

    /// The scheduler has been shut down.
    #[error("Scheduler has stopped")]
    SchedulerStopped,

    /// Installing a signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    pub(crate) fn invalid_job(message: impl Into<String>) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
