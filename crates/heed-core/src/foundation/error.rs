//! Error types for the heed core.
//!
//! Engine-level errors (dispatch, matching) are defined in heed-framework.

use thiserror::Error;

// =============================================================================
// Delivery Errors
// =============================================================================

/// Errors a [`Bot`](crate::Bot) reports when it cannot deliver a reply.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,

    /// The event does not carry enough information to address a reply.
    #[error("missing session info: {0}")]
    MissingSession(String),

    /// The platform refused the message.
    #[error("platform rejected message ({retcode}): {message}")]
    Rejected {
        /// Platform-specific return code.
        retcode: i32,
        /// Human readable reason.
        message: String,
    },

    /// Failed to upload media referenced by the reply.
    #[error("media upload failed: {0}")]
    Upload(String),

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl DeliveryError {
    /// Creates a generic delivery error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;
