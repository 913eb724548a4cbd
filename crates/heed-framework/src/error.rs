//! Error types for the heed framework.

use std::time::Duration;

use thiserror::Error;

use heed_core::DeliveryError;

use crate::permission::PermissionLevel;

/// Boxed error type accepted from user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Interest construction
// =============================================================================

/// Errors raised while building an [`Interest`](crate::Interest).
#[derive(Debug, Clone, Error)]
pub enum InterestError {
    /// A REGEX condition is not a valid pattern.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it failed to compile.
        reason: String,
    },

    /// Nested interests are deeper than the supported maximum.
    #[error("interest nesting depth {depth} exceeds the limit of {limit}")]
    TooDeep {
        /// Depth of the rejected tree.
        depth: usize,
        /// Maximum supported depth.
        limit: usize,
    },
}

// =============================================================================
// Dispatch
// =============================================================================

/// Everything that can go wrong between matching an event and delivering replies.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No condition matched. A normal negative result.
    #[error("event is not interesting")]
    NotInterested,

    /// A condition matched but no action was bound to it.
    #[error("matched condition has no action")]
    NoAction,

    /// An all-conditions interest has no interest-level action to run.
    #[error("illegal composition: {reason}")]
    IllegalComposition {
        /// What was wrong with the composition.
        reason: String,
    },

    /// No registered callback can be bound to the assembled arguments.
    #[error("no callback named '{action}' accepts the supplied arguments")]
    MethodResolution {
        /// The action name that failed to resolve.
        action: String,
    },

    /// The sender lacks the permission the action requires.
    #[error("insufficient permission: {required} required")]
    InsufficientPermission {
        /// The level that was required.
        required: PermissionLevel,
    },

    /// The callback itself failed.
    #[error("{message}")]
    Invocation {
        /// The failure message reported by the callback.
        message: String,
    },

    /// A command handler could not parse its input.
    #[error("{reason}")]
    CommandParse {
        /// Why parsing failed.
        reason: String,
    },

    /// A static reply template could not be rendered.
    #[error("failed to render template: {reason}")]
    Template {
        /// Why rendering failed.
        reason: String,
    },

    /// The transport could not deliver a reply.
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// A blocking dialogue wait exceeded its bound.
    #[error("timed out after {after:?} waiting for the next event")]
    TimedOut {
        /// The bound that was exceeded.
        after: Duration,
    },

    /// The dialogue service dropped a pending wait without resolving it.
    #[error("dialogue wait was abandoned")]
    DialogueClosed,

    /// The registry task has stopped.
    #[error("handler registry is closed")]
    RegistryClosed,

    /// An interest could not be built.
    #[error(transparent)]
    Interest(#[from] InterestError),
}

impl DispatchError {
    /// Creates an invocation failure with the given message.
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
        }
    }

    /// Creates a command parse failure with the given reason.
    pub fn command_parse(reason: impl Into<String>) -> Self {
        Self::CommandParse {
            reason: reason.into(),
        }
    }

    /// Creates an illegal composition error with the given reason.
    pub fn illegal_composition(reason: impl Into<String>) -> Self {
        Self::IllegalComposition {
            reason: reason.into(),
        }
    }

    /// Returns true for outcomes that are control flow rather than failures.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::NotInterested | Self::NoAction)
    }
}

impl From<BoxError> for DispatchError {
    fn from(err: BoxError) -> Self {
        match err.downcast::<DispatchError>() {
            Ok(inner) => *inner,
            Err(other) => Self::invocation(other.to_string()),
        }
    }
}

impl From<String> for DispatchError {
    fn from(message: String) -> Self {
        Self::invocation(message)
    }
}

impl From<&str> for DispatchError {
    fn from(message: &str) -> Self {
        Self::invocation(message)
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxed_dispatch_error_is_unwrapped() {
        let boxed: BoxError = Box::new(DispatchError::InsufficientPermission {
            required: PermissionLevel::Administrator,
        });

        let err = DispatchError::from(boxed);
        assert!(matches!(
            err,
            DispatchError::InsufficientPermission {
                required: PermissionLevel::Administrator
            }
        ));
    }

    #[test]
    fn test_foreign_boxed_error_becomes_invocation() {
        let boxed: BoxError = "disk on fire".into();

        let err = DispatchError::from(boxed);
        assert!(matches!(err, DispatchError::Invocation { ref message } if message == "disk on fire"));
    }

    #[test]
    fn test_silent_errors() {
        assert!(DispatchError::NotInterested.is_silent());
        assert!(DispatchError::NoAction.is_silent());
        assert!(!DispatchError::invocation("x").is_silent());
    }
}
