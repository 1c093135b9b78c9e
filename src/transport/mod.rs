//! Transport module - the byte source consumed by the frame decoder.
//!
//! Connection management (port discovery, baud rates, reconnects) belongs to
//! the host; this crate only needs something that yields bytes.

mod source;

pub use source::{ByteSource, ReaderSource};
