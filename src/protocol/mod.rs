//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the serial framing layer:
//! - 6-byte little-endian header encoding/decoding
//! - Self-synchronizing decoder over a blocking byte source
//! - Frame struct with typed accessors

mod frame;
mod frame_decoder;
mod wire_format;

pub use frame::{build_frame, frame_payload, Frame};
pub use frame_decoder::{FrameConfig, FrameDecoder, FrameEvent, FrameStats, Frames};
pub use wire_format::{kinds, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAGIC, MAGIC_BYTES};
