//! Error taxonomy of the session layer.

use std::time::Duration;

use thiserror::Error;

/// Stable, machine-checkable kind of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad keyword name, type or value.
    InvalidArgument,
    /// Variable name that is not a legal identifier.
    InvalidIdentifier,
    /// Both the legacy and the current background flag were supplied.
    ConflictingArguments,
    /// The session behind the handle is not live.
    RejectedExecution,
    /// The remote statement failed.
    RemoteExecution,
    /// The requested workspace variable does not exist.
    VariableNotFound,
    /// A bounded wait elapsed before the call finished.
    Timeout,
    /// The call was interrupted before producing a value.
    Cancelled,
    /// A session could not be launched or attached.
    StartFailure,
}

/// Errors surfaced by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Bad keyword name, type or value. Detected before dispatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Variable name that is not a legal identifier. Detected before dispatch.
    #[error("'{0}' is not a valid variable name")]
    InvalidIdentifier(String),

    /// Mutually exclusive keywords supplied together. Detected before dispatch.
    #[error("conflicting arguments: {0}")]
    ConflictingArguments(String),

    /// The engine session is not live.
    #[error("cannot use a terminated engine session")]
    RejectedExecution,

    /// The remote statement failed; never retried.
    #[error("{message} ({identifier})")]
    RemoteExecution {
        /// Stable identifier reported by the engine.
        identifier: String,
        /// Human-readable message reported by the engine.
        message: String,
    },

    /// The requested workspace variable does not exist.
    #[error("variable '{0}' does not exist in the base workspace")]
    VariableNotFound(String),

    /// The wait elapsed; the call is still pollable.
    #[error("timed out after {0:?} waiting for the engine")]
    Timeout(Duration),

    /// The engine confirmed the call was interrupted.
    #[error("the call was cancelled")]
    Cancelled,

    /// The session could not be launched or attached.
    #[error("engine session could not be started: {0}")]
    StartFailure(String),
}

impl EngineError {
    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            EngineError::ConflictingArguments(_) => ErrorKind::ConflictingArguments,
            EngineError::RejectedExecution => ErrorKind::RejectedExecution,
            EngineError::RemoteExecution { .. } => ErrorKind::RemoteExecution,
            EngineError::VariableNotFound(_) => ErrorKind::VariableNotFound,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::StartFailure(_) => ErrorKind::StartFailure,
        }
    }

    pub(crate) fn remote(failure: &enginelink_transport::RemoteFailure) -> Self {
        EngineError::RemoteExecution {
            identifier: failure.identifier().to_string(),
            message: failure.message().to_string(),
        }
    }
}

/// Result alias for session-layer operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_keeps_boundary_message() {
        let failure = enginelink_transport::RemoteFailure::new("MATLAB:user", "boom");
        let err = EngineError::remote(&failure);
        assert_eq!(err.kind(), ErrorKind::RemoteExecution);
        assert_eq!(err.to_string(), "boom (MATLAB:user)");
    }

    #[test]
    fn anyhow_round_trip_preserves_kind() {
        let err = anyhow::Error::new(EngineError::Timeout(Duration::from_millis(5)));
        let kind = err.downcast_ref::<EngineError>().map(EngineError::kind);
        assert_eq!(kind, Some(ErrorKind::Timeout));
    }
}
