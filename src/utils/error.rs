//! Error types and handling
//!
//! Common error taxonomy for the recorder core. Budget exhaustion is
//! deliberately *not* an error: it is a normal stop trigger surfaced as a
//! [`RecorderEvent`](crate::recorder::RecorderEvent).

use crate::recorder::LifecyclePhase;
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Invalid or conflicting parameter. Rejected synchronously, no state change.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was called in a phase that does not permit it.
    #[error("{operation} not allowed in phase {phase:?}")]
    InvalidState {
        operation: &'static str,
        phase: LifecyclePhase,
    },

    /// Camera or audio device unavailable, or bound to a different id.
    #[error("resource error: {0}")]
    Resource(String),

    /// Asynchronous failure mid-recording (device error, producer death).
    #[error("runtime failure: {0}")]
    Runtime(String),

    /// A bounded wait elapsed before the operation could complete.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
