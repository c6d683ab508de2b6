//! Engine error type and the negative status codes exposed at the API boundary.
//!
//! Local, synchronous failures are returned from the call that caused them.
//! Remote failures never travel this way: they arrive as `TaskFailed` events.

use std::fmt;
use thiserror::Error;

use crate::core::encoder::EncoderError;
use crate::core::node::NodeState;
use crate::core::protocol::DecodeOutcome;

/// Result type for engine operations
pub type NlsResult<T> = Result<T, NlsError>;

/// Errors surfaced by requests, the registry and the client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NlsError {
    // ─────────────────────────────────────────────────────────────────────────────
    // Local rejections
    // ─────────────────────────────────────────────────────────────────────────────

    /// A setter or factory received an invalid value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The operation is not valid in the node's current state
    #[error("Operation '{operation}' is invalid in state {state}")]
    State {
        operation: &'static str,
        state: NodeState,
    },

    /// Queued audio exceeds the configured bound
    #[error("Audio buffer full: {queued} bytes queued, limit {limit}")]
    BufferFull { queued: usize, limit: usize },

    /// The audio encoder rejected the chunk
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// No worker runtime has been started on the client
    #[error("Work thread not started")]
    WorkThreadNotStarted,

    // ─────────────────────────────────────────────────────────────────────────────
    // Network and protocol
    // ─────────────────────────────────────────────────────────────────────────────

    /// DNS, TCP, TLS or WebSocket upgrade failed on every attempt
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The established channel failed while sending or receiving
    #[error("Transport error: {0}")]
    Transport(String),

    /// A server message could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] DecodeOutcome),

    /// The server rejected the task (sync-mode resolution of TaskFailed)
    #[error("Task failed with status {status_code}: {message}")]
    TaskFailed { status_code: i32, message: String },

    /// A deadline elapsed before the expected event arrived
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The request was cancelled while the caller was waiting
    #[error("Request was cancelled")]
    Cancelled,

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// Double release, release by a foreign client, or use after release
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl NlsError {
    /// Create a state error for `operation`
    pub fn state(operation: &'static str, state: NodeState) -> Self {
        Self::State { operation, state }
    }

    /// Create a configuration error
    pub fn config(message: impl fmt::Display) -> Self {
        Self::Configuration(message.to_string())
    }

    /// Create a lifecycle error
    pub fn lifecycle(message: impl fmt::Display) -> Self {
        Self::Lifecycle(message.to_string())
    }

    /// Stable negative code for this error
    pub fn code(&self) -> i32 {
        match self {
            Self::Configuration(_) => -10,
            Self::State { .. } => -20,
            Self::BufferFull { .. } => -21,
            Self::Encoder(_) => -22,
            Self::WorkThreadNotStarted => -23,
            Self::Connect(_) => -30,
            Self::Transport(_) => -31,
            Self::Protocol(_) => -40,
            Self::TaskFailed { .. } => -41,
            Self::Timeout(_) => -50,
            Self::Cancelled => -51,
            Self::Lifecycle(_) => -60,
        }
    }

    /// Whether the caller may reasonably retry with a fresh start
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Transport(_) | Self::Timeout(_) | Self::BufferFull { .. }
        )
    }
}

/// Collapse a result into the `0 = ok or negative code` convention.
pub fn status_code<T>(result: &NlsResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let errors = vec![
            NlsError::config("bad"),
            NlsError::state("send_audio", NodeState::Closed),
            NlsError::BufferFull {
                queued: 10,
                limit: 5,
            },
            NlsError::Encoder(EncoderError::InvalidFrameSize {
                got: 3,
                expected: 640,
            }),
            NlsError::WorkThreadNotStarted,
            NlsError::Connect("refused".into()),
            NlsError::Transport("reset".into()),
            NlsError::Protocol(DecodeOutcome::MalformedJson("eof".into())),
            NlsError::TaskFailed {
                status_code: 40000001,
                message: "bad token".into(),
            },
            NlsError::Timeout("start".into()),
            NlsError::Cancelled,
            NlsError::lifecycle("gone"),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_timeout_is_distinct_from_connect() {
        let timeout = NlsError::Timeout("start".into());
        let connect = NlsError::Connect("dns".into());
        assert_ne!(timeout.code(), connect.code());
        assert!(timeout.is_retryable());
        assert!(!NlsError::lifecycle("double release").is_retryable());
    }

    #[test]
    fn test_status_code_helper() {
        let ok: NlsResult<usize> = Ok(3);
        assert_eq!(status_code(&ok), 0);
        let err: NlsResult<usize> = Err(NlsError::state("stop", NodeState::Invalid));
        assert_eq!(status_code(&err), -20);
    }

    #[test]
    fn test_error_display() {
        let err = NlsError::state("send_audio", NodeState::Closed);
        assert_eq!(
            err.to_string(),
            "Operation 'send_audio' is invalid in state Closed"
        );
    }
}
