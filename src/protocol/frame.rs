//! Frame struct with typed accessors.
//!
//! Represents one extracted frame: header plus payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use gpsdo_telemetry::protocol::{Frame, Header, kinds};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::new(kinds::STATUS, 5), Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.kind(), kinds::STATUS);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the message kind.
    #[inline]
    pub fn kind(&self) -> u16 {
        self.header.kind
    }

    /// Re-encode the frame as contiguous wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_frame(&self.header, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// The header is written as given, so tests can forge invalid lengths.
///
/// # Example
///
/// ```
/// use gpsdo_telemetry::protocol::{build_frame, Header, HEADER_SIZE};
///
/// let bytes = build_frame(&Header::new(1, 5), b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Frame a payload with a correct header.
///
/// Returns `None` if the payload does not fit a 16-bit length.
pub fn frame_payload(kind: u16, payload: &[u8]) -> Option<Vec<u8>> {
    let length = u16::try_from(payload.len()).ok()?;
    Some(build_frame(&Header::new(kind, length), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::{kinds, MAGIC_BYTES};

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(Header::new(kinds::KF_DEBUG, 4), Bytes::from_static(b"test"));

        assert_eq!(frame.kind(), kinds::KF_DEBUG);
        assert_eq!(frame.payload(), b"test");
        assert_eq!(frame.payload_len(), 4);
    }

    #[test]
    fn test_build_frame_layout() {
        let bytes = build_frame(&Header::new(kinds::STATUS, 3), b"abc");
        assert_eq!(&bytes[0..2], &MAGIC_BYTES);
        assert_eq!(&bytes[HEADER_SIZE..], b"abc");
    }

    #[test]
    fn test_frame_to_bytes_matches_build() {
        let header = Header::new(7, 2);
        let frame = Frame::new(header, Bytes::from_static(b"xy"));
        assert_eq!(frame.to_bytes(), build_frame(&header, b"xy"));
    }

    #[test]
    fn test_frame_payload_sets_length() {
        let bytes = frame_payload(kinds::STATUS, &[9u8; 300]).unwrap();
        let header = Header::decode(&bytes).unwrap();
        assert_eq!(header.length, 300);
        assert!(header.has_magic());
    }

    #[test]
    fn test_frame_payload_too_large() {
        assert!(frame_payload(1, &vec![0u8; 70_000]).is_none());
    }
}
