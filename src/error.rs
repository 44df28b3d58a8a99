//! Error types and handling
//!
//! Every failure that terminates a recording session is a `RecorderError`.
//! Packet pool exhaustion is not an error: the pipeline drops data instead.

use thiserror::Error;

use crate::pipeline::types::MediaKind;

/// Container operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOp {
    Open,
    WriteHeader,
    WritePacket,
    WriteTrailer,
    Close,
}

impl std::fmt::Display for ContainerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContainerOp::Open => "open",
            ContainerOp::WriteHeader => "write header",
            ContainerOp::WritePacket => "write packet",
            ContainerOp::WriteTrailer => "write trailer",
            ContainerOp::Close => "close",
        };
        f.write_str(name)
    }
}

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("{kind} encoder failed: {reason}")]
    Encoder { kind: MediaKind, reason: String },

    #[error("container failed to {op}: {reason}")]
    Container { op: ContainerOp, reason: String },

    #[error("audio source unavailable: {0}")]
    Source(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid recorder state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecorderError {
    pub fn encoder(kind: MediaKind, reason: impl Into<String>) -> Self {
        RecorderError::Encoder {
            kind,
            reason: reason.into(),
        }
    }

    pub fn container(op: ContainerOp, reason: impl Into<String>) -> Self {
        RecorderError::Container {
            op,
            reason: reason.into(),
        }
    }
}

/// Result type alias using RecorderError
pub type Result<T> = std::result::Result<T, RecorderError>;
