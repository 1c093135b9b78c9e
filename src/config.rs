//! Session configuration.
//!
//! One [`TelemetryConfig`] value describes a whole session. Every section has
//! defaults, so a JSON file only needs the values it changes:
//!
//! ```json
//! {
//!   "estimator": {
//!     "filter": { "sampling": { "expected_count": 625000 } },
//!     "models": [
//!       { "name": "fast", "process_noise": 1.0 },
//!       { "name": "steady", "process_noise": 0.001 }
//!     ],
//!     "transition": [[0.95, 0.05], [0.05, 0.95]]
//!   },
//!   "pipeline": { "resume_on_end_of_stream": true }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::estimator::ImmConfig;
use crate::protocol::FrameConfig;

/// Pipeline loop behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Keep polling after end-of-stream (live links with read timeouts).
    /// When false the first end-of-stream ends the run.
    pub resume_on_end_of_stream: bool,
    /// Pause before polling again after end-of-stream, when resuming.
    pub resume_backoff_ms: u64,
    /// Output channel capacity for [`Session`](crate::session::Session).
    pub output_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resume_on_end_of_stream: false,
            resume_backoff_ms: 10,
            output_buffer: 64,
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub frame: FrameConfig,
    pub estimator: ImmConfig,
    pub pipeline: PipelineConfig,
}

impl TelemetryConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame.max_payload_size == 0 {
            return Err(TelemetryError::Config(
                "max payload size must be at least 1".to_string(),
            ));
        }
        if self.pipeline.output_buffer == 0 {
            return Err(TelemetryError::Config(
                "output buffer must hold at least one record".to_string(),
            ));
        }
        self.estimator.validate()
    }

    /// Serialize as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
