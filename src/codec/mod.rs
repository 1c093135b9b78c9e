//! Codec module - payload decoding for the device's FlatBuffers messages.
//!
//! Every payload is a `Message { timestamp_s: double; payload: Payload }`
//! envelope where `union Payload { Status = 1, kf_debug = 2 }`.
//!
//! # Design
//!
//! The codec is a marker struct with static methods. Dispatch runs over the
//! closed [`PayloadKind`] enum; anything outside it decodes to
//! [`DecodedRecord::Unknown`]. Decoded records own copies of their scalars and
//! never borrow the frame buffer.
//!
//! # Example
//!
//! ```
//! use gpsdo_telemetry::codec::{DecodedRecord, PayloadCodec, StatusRecord};
//! use gpsdo_telemetry::protocol::kinds;
//!
//! let status = StatusRecord { raw_counter_value: 625_001, ..Default::default() };
//! let payload = PayloadCodec::encode_status(&status, 3.0);
//!
//! let record = PayloadCodec::decode(kinds::STATUS, &payload).unwrap();
//! assert_eq!(record.raw_counter(), Some(625_001));
//! assert_eq!(record.timestamp_s(), Some(3.0));
//! ```

mod records;
pub mod schema;

pub use records::{DecodedRecord, KfCorrectionDebug, KfDebugRecord, KfStateDebug, StatusRecord};

use flatbuffers::{FlatBufferBuilder, WIPOffset};

use crate::error::DecodeError;
use crate::protocol::kinds;

/// Frame kind the device sends when it does not tag the header.
const UNTAGGED_KIND: u16 = 0;

/// Closed set of decodable payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Status,
    KfDebug,
}

impl PayloadKind {
    /// Map a frame kind to a payload kind.
    pub fn from_kind(kind: u16) -> Option<Self> {
        match kind {
            kinds::STATUS => Some(PayloadKind::Status),
            kinds::KF_DEBUG => Some(PayloadKind::KfDebug),
            _ => None,
        }
    }

    /// Map an envelope union tag to a payload kind.
    pub fn from_union_tag(tag: u8) -> Option<Self> {
        match tag {
            schema::payload_type::STATUS => Some(PayloadKind::Status),
            schema::payload_type::KF_DEBUG => Some(PayloadKind::KfDebug),
            _ => None,
        }
    }

    /// Frame kind for this payload.
    pub fn kind(self) -> u16 {
        match self {
            PayloadKind::Status => kinds::STATUS,
            PayloadKind::KfDebug => kinds::KF_DEBUG,
        }
    }

    /// Envelope union tag for this payload.
    pub fn union_tag(self) -> u8 {
        match self {
            PayloadKind::Status => schema::payload_type::STATUS,
            PayloadKind::KfDebug => schema::payload_type::KF_DEBUG,
        }
    }

    fn decode_message(self, message: &schema::Message<'_>) -> Result<DecodedRecord, DecodeError> {
        let timestamp_s = message.timestamp_s();
        Ok(match self {
            PayloadKind::Status => DecodedRecord::Status {
                timestamp_s,
                status: StatusRecord::read(&message.payload_as_status().ok_or(DecodeError::MissingPayload)?),
            },
            PayloadKind::KfDebug => DecodedRecord::KfDebug {
                timestamp_s,
                debug: KfDebugRecord::read(
                    &message.payload_as_kf_debug().ok_or(DecodeError::MissingPayload)?,
                )?,
            },
        })
    }
}

/// FlatBuffers payload codec.
pub struct PayloadCodec;

impl PayloadCodec {
    /// Decode a frame payload.
    ///
    /// Frame kinds outside the known set (other than the untagged kind 0) are
    /// not parsed and yield `Unknown`. For parsed envelopes the union tag wins
    /// over the frame kind.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the buffer fails verification or a required
    /// payload table is absent or mis-sized.
    pub fn decode(kind: u16, payload: &[u8]) -> Result<DecodedRecord, DecodeError> {
        let unknown = DecodedRecord::Unknown {
            kind,
            length: payload.len(),
        };

        let expected = PayloadKind::from_kind(kind);
        if expected.is_none() && kind != UNTAGGED_KIND {
            tracing::debug!("Unknown frame kind {} ({} bytes)", kind, payload.len());
            return Ok(unknown);
        }

        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }
        let message = flatbuffers::root::<schema::Message>(payload)?;
        let tag = message.payload_type();

        let Some(actual) = PayloadKind::from_union_tag(tag) else {
            tracing::debug!("Unknown payload type {} in frame of kind {}", tag, kind);
            return Ok(unknown);
        };

        if let Some(expected) = expected.filter(|&e| e != actual) {
            tracing::debug!(
                "Frame kind {:?} disagrees with payload type {:?}, using payload type",
                expected,
                actual
            );
        }

        actual.decode_message(&message)
    }

    /// Encode a status record in its envelope.
    pub fn encode_status(status: &StatusRecord, timestamp_s: f64) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let payload = status.build(&mut fbb);
        envelope(fbb, PayloadKind::Status.union_tag(), Some(payload), timestamp_s)
    }

    /// Encode a filter diagnostics record in its envelope.
    pub fn encode_kf_debug(debug: &KfDebugRecord, timestamp_s: f64) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let payload = debug.build(&mut fbb);
        envelope(fbb, PayloadKind::KfDebug.union_tag(), Some(payload), timestamp_s)
    }
}

fn envelope<T>(
    mut fbb: FlatBufferBuilder<'_>,
    tag: u8,
    payload: Option<WIPOffset<T>>,
    timestamp_s: f64,
) -> Vec<u8> {
    schema::finish_message(&mut fbb, tag, payload, timestamp_s);
    fbb.finished_data().to_vec()
}
