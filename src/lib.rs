//! # gpsdo-telemetry
//!
//! Host-side telemetry decoding and frequency estimation for a GPS-disciplined
//! oscillator.
//!
//! The device streams framed FlatBuffers records over a serial link. Each
//! status record carries the oscillator cycle count over one GPS second. This
//! crate recovers frames from the byte stream, decodes the records and feeds
//! the counts through an IMM bank of Kalman filters tracking phase, frequency
//! offset and drift.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): 6-byte header, sentinel resync, length checks
//! - **Payloads** ([`codec`]): FlatBuffers envelope with status/debug union
//! - **Estimation** ([`estimator`]): Kalman filters and the IMM model bank
//! - **Driving** ([`pipeline`], [`session`]): blocking loop and async wrapper
//!
//! ## Example
//!
//! ```ignore
//! use gpsdo_telemetry::{CancelToken, JsonLinesSink, Pipeline, ReaderSource, TelemetryConfig};
//!
//! fn main() -> gpsdo_telemetry::Result<()> {
//!     let config = TelemetryConfig::from_json_file("gpsdo.json")?;
//!     let port = std::fs::File::open("/dev/ttyACM0")?;
//!
//!     let mut pipeline = Pipeline::new(ReaderSource::new(port), &config)?;
//!     let mut sink = JsonLinesSink::estimates_only(std::io::stdout());
//!     let summary = pipeline.run(&mut sink, &CancelToken::new())?;
//!     eprintln!("{summary:?}");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod estimator;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

pub use codec::{DecodedRecord, PayloadCodec, StatusRecord};
pub use config::{PipelineConfig, TelemetryConfig};
pub use error::{Result, TelemetryError};
pub use estimator::{Estimator, FusedEstimate, ImmConfig, StateEstimator};
pub use pipeline::{CancelToken, EstimateRecord, Pipeline, PipelineOutput, PipelineSummary};
pub use protocol::{FrameConfig, FrameDecoder, FrameEvent};
pub use session::Session;
pub use sink::{JsonLinesSink, Sink};
pub use transport::{ByteSource, ReaderSource};
