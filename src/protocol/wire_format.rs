//! Wire format encoding and decoding.
//!
//! Implements the 6-byte frame header:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────┐
//! │ Magic    │ Kind     │ Length   │ Payload         │
//! │ 2 bytes  │ 2 bytes  │ 2 bytes  │ `length` bytes  │
//! │ uint16 LE│ uint16 LE│ uint16 LE│                 │
//! └──────────┴──────────┴──────────┴─────────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The sentinel `0xB00B` therefore
//! appears on the wire as `0B B0`.

use crate::error::FrameError;

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Frame sentinel.
pub const MAGIC: u16 = 0xB00B;

/// Sentinel as it appears on the wire.
pub const MAGIC_BYTES: [u8; 2] = MAGIC.to_le_bytes();

/// Default maximum payload size, matching the device's message buffer.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u16 = 1024;

/// Message kind discriminators.
pub mod kinds {
    /// Periodic status telemetry (carries the raw counter).
    pub const STATUS: u16 = 1;
    /// On-device Kalman filter diagnostics.
    pub const KF_DEBUG: u16 = 2;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sentinel (must equal [`MAGIC`]).
    pub magic: u16,
    /// Message discriminator (see [`kinds`]).
    pub kind: u16,
    /// Payload length in bytes.
    pub length: u16,
}

impl Header {
    /// Create a header with the correct sentinel.
    pub fn new(kind: u16, length: u16) -> Self {
        Self {
            magic: MAGIC,
            kind,
            length,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use gpsdo_telemetry::protocol::{Header, kinds};
    ///
    /// let bytes = Header::new(kinds::STATUS, 40).encode();
    /// assert_eq!(bytes, [0x0B, 0xB0, 0x01, 0x00, 0x28, 0x00]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.magic.to_le_bytes());
        buf[2..4].copy_from_slice(&self.kind.to_le_bytes());
        buf[4..6].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short. The sentinel is not checked here.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: u16::from_le_bytes([buf[0], buf[1]]),
            kind: u16::from_le_bytes([buf[2], buf[3]]),
            length: u16::from_le_bytes([buf[4], buf[5]]),
        })
    }

    /// Check the sentinel.
    #[inline]
    pub fn has_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Validate the payload length: `0 < length <= max_payload_size`.
    pub fn validate(&self, max_payload_size: u16) -> Result<(), FrameError> {
        if self.length == 0 || self.length > max_payload_size {
            return Err(FrameError::InvalidLength {
                length: self.length,
                max: max_payload_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_little_endian_byte_order() {
        let bytes = Header::new(0x0102, 0x0304).encode();
        assert_eq!(bytes, [0x0B, 0xB0, 0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn test_magic_bytes_on_wire() {
        assert_eq!(MAGIC_BYTES, [0x0B, 0xB0]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(&[0x0B, 0xB0, 1, 0, 4]).is_none());
    }

    #[test]
    fn test_decode_reports_foreign_magic() {
        let header = Header::decode(&[0xFF, 0xEE, 1, 0, 4, 0]).unwrap();
        assert!(!header.has_magic());
        assert_eq!(header.magic, 0xEEFF);
    }

    #[test]
    fn test_validate_zero_length_rejected() {
        let err = Header::new(kinds::STATUS, 0)
            .validate(DEFAULT_MAX_PAYLOAD_SIZE)
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidLength {
                length: 0,
                max: DEFAULT_MAX_PAYLOAD_SIZE
            }
        );
    }

    #[test]
    fn test_validate_length_bounds() {
        assert!(Header::new(1, 1).validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        assert!(Header::new(1, DEFAULT_MAX_PAYLOAD_SIZE)
            .validate(DEFAULT_MAX_PAYLOAD_SIZE)
            .is_ok());
        assert!(Header::new(1, DEFAULT_MAX_PAYLOAD_SIZE + 1)
            .validate(DEFAULT_MAX_PAYLOAD_SIZE)
            .is_err());
    }
}
