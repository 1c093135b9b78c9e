//! Error types for gpsdo-telemetry.
//!
//! Two tiers:
//! - [`TelemetryError`] terminates a pipeline (I/O failure, sink failure, bad config).
//! - [`FrameError`] / [`DecodeError`] describe recoverable skips. They are
//!   reported as values and never abort decoding.

use thiserror::Error;

/// Main error type for all telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// I/O error reading the byte source or writing a sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config and JSON-lines sink).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// Payload failed structural validation.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Output sink is gone (receiver dropped).
    #[error("Sink closed")]
    SinkClosed,

    /// Background session task panicked or was aborted.
    #[error("Session task failed: {0}")]
    Task(String),
}

/// Recoverable framing fault. Decoding continues after it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Header carried `length == 0` or a length above the configured maximum.
    #[error("invalid payload length {length} (max {max})")]
    InvalidLength { length: u16, max: u16 },

    /// Stream ended before the full payload arrived.
    #[error("payload truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },
}

/// Recoverable payload fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Empty payload.
    #[error("empty payload")]
    Empty,

    /// Verifier rejected the buffer (bad offset, vtable, alignment or size).
    #[error("malformed flatbuffer: {0}")]
    Malformed(String),

    /// Envelope carries no payload table.
    #[error("message has no payload")]
    MissingPayload,

    /// Fixed-size vector field has the wrong element count.
    #[error("field `{field}` has {actual} elements, expected {expected}")]
    InvalidVector {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Required nested table is absent.
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
}

impl From<flatbuffers::InvalidFlatbuffer> for DecodeError {
    fn from(e: flatbuffers::InvalidFlatbuffer) -> Self {
        match e {
            flatbuffers::InvalidFlatbuffer::InconsistentUnion { .. } => DecodeError::MissingPayload,
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

/// Why a frame produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// Framing layer discarded the frame.
    #[error("frame skipped: {0}")]
    Frame(#[from] FrameError),

    /// Frame arrived but its payload did not decode.
    #[error("payload skipped: {0}")]
    Decode(#[from] DecodeError),
}

/// Result type alias using TelemetryError.
pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::InvalidLength {
            length: 0,
            max: 1024,
        };
        assert_eq!(err.to_string(), "invalid payload length 0 (max 1024)");
    }

    #[test]
    fn test_skip_reason_from_decode_error() {
        let reason: SkipReason = DecodeError::MissingPayload.into();
        assert_eq!(reason, SkipReason::Decode(DecodeError::MissingPayload));
        assert!(reason.to_string().contains("no payload"));
    }

    #[test]
    fn test_verifier_error_converts() {
        let err: DecodeError = flatbuffers::root::<&str>(&[0xFF, 0, 0, 0])
            .map(|_| ())
            .unwrap_err()
            .into();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: TelemetryError = io.into();
        assert!(matches!(err, TelemetryError::Io(_)));
    }
}
