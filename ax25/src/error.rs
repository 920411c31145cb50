use thiserror::Error;

use crate::session::SessionState;

/// Errors that can occur when encoding, decoding or building an `Ax25Frame`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The bytes received do not form a structurally valid AX.25 frame.
    #[error("Malformed frame: {reason}")]
    Malformed { reason: String },

    /// A frame cannot be encoded because a required part is missing.
    #[error("Incomplete frame: {reason}")]
    Incomplete { reason: String },

    /// A field was given a value outside its legal range.
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        FrameError::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn incomplete(reason: impl Into<String>) -> Self {
        FrameError::Incomplete {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        FrameError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors reported by a `Session`, either returned from a configuration setter
/// or delivered to the application as `Event::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The operation is not allowed in the session's current state.
    #[error("Cannot {operation} while {state:?}")]
    ProtocolViolation {
        operation: &'static str,
        state: SessionState,
    },

    /// A configuration value was out of range.
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A frame could not be built for transmission.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
