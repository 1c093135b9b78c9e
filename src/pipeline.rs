//! Pipeline - frames in, decoded records and estimates out.
//!
//! A [`Pipeline`] owns one frame decoder and one estimator. Each decoded
//! status record advances the estimator by one interval. Debug and unknown
//! records are passed through without touching the estimator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec::{DecodedRecord, PayloadCodec};
use crate::config::{PipelineConfig, TelemetryConfig};
use crate::error::{Result, SkipReason};
use crate::estimator::{Estimator, FusedEstimate, StateEstimator};
use crate::protocol::{FrameDecoder, FrameEvent, FrameStats};
use crate::sink::Sink;
use crate::transport::ByteSource;

/// Shared stop flag checked between pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Estimate emitted after one status record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateRecord {
    /// Host receive time.
    pub timestamp: DateTime<Utc>,
    /// Envelope timestamp from the device clock (seconds).
    pub device_time_s: f64,
    pub raw_counter: u32,
    /// Phase (cycles), when the state model tracks it.
    pub phase: Option<f64>,
    /// Frequency offset (Hz).
    pub frequency_offset: f64,
    /// Drift (Hz/s), when the state model tracks it.
    pub drift: Option<f64>,
    pub model_probabilities: Vec<f64>,
}

impl EstimateRecord {
    fn new(device_time_s: f64, raw_counter: u32, estimate: FusedEstimate) -> Self {
        Self {
            timestamp: Utc::now(),
            device_time_s,
            raw_counter,
            phase: estimate.phase,
            frequency_offset: estimate.frequency_offset,
            drift: estimate.drift,
            model_probabilities: estimate.model_probabilities,
        }
    }
}

/// One decoded record, with the estimate it produced if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub record: DecodedRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<EstimateRecord>,
}

/// Result of one [`Pipeline::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Output(PipelineOutput),
    /// A frame or payload was dropped; the pipeline continues.
    Skipped(SkipReason),
    EndOfStream,
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames: FrameStats,
    pub status_records: u64,
    pub kf_debug_records: u64,
    pub unknown_records: u64,
    /// Frames dropped by the decoder.
    pub frame_skips: u64,
    /// Payloads that failed to decode.
    pub decode_skips: u64,
    pub end_of_stream: u64,
}

/// Why [`Pipeline::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfStream,
    Cancelled,
}

/// Final report of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub stop: StopReason,
    pub stats: PipelineStats,
    pub estimator_cycles: u64,
    pub outliers: u64,
    pub final_estimate: FusedEstimate,
}

/// Decoder plus estimator bound to one source.
pub struct Pipeline<S> {
    decoder: FrameDecoder<S>,
    estimator: Estimator,
    config: PipelineConfig,
    stats: PipelineStats,
}

/// Closes the source when a run ends, however it ends.
struct CloseOnDrop<'a, S: ByteSource> {
    pipeline: &'a mut Pipeline<S>,
}

impl<S: ByteSource> Drop for CloseOnDrop<'_, S> {
    fn drop(&mut self) {
        self.pipeline.close();
    }
}

impl<S: ByteSource> Pipeline<S> {
    /// Validate `config` and bind a pipeline to `source`.
    pub fn new(source: S, config: &TelemetryConfig) -> Result<Self> {
        config.validate()?;
        let estimator = Estimator::new(&config.estimator)?;

        Ok(Self {
            decoder: FrameDecoder::new(source, config.frame),
            estimator,
            config: config.pipeline,
            stats: PipelineStats::default(),
        })
    }

    /// Process the next frame.
    ///
    /// Returns `Err` only when the source fails.
    pub fn step(&mut self) -> Result<PipelineEvent> {
        let event = self.decoder.next_frame();
        self.stats.frames = self.decoder.stats();

        match event? {
            FrameEvent::EndOfStream => {
                self.stats.end_of_stream += 1;
                Ok(PipelineEvent::EndOfStream)
            }
            FrameEvent::Skipped(reason) => {
                self.stats.frame_skips += 1;
                Ok(PipelineEvent::Skipped(reason.into()))
            }
            FrameEvent::Frame(frame) => match PayloadCodec::decode(frame.kind(), frame.payload()) {
                Ok(record) => {
                    let estimate = self.route(&record);
                    Ok(PipelineEvent::Output(PipelineOutput { record, estimate }))
                }
                Err(e) => {
                    self.stats.decode_skips += 1;
                    tracing::warn!(
                        "Dropping payload of kind {} ({} bytes): {}",
                        frame.kind(),
                        frame.payload_len(),
                        e
                    );
                    Ok(PipelineEvent::Skipped(e.into()))
                }
            },
        }
    }

    fn route(&mut self, record: &DecodedRecord) -> Option<EstimateRecord> {
        match record {
            DecodedRecord::Status {
                timestamp_s,
                status,
            } => {
                self.stats.status_records += 1;
                let raw = status.raw_counter_value;
                let estimate = self.estimator.step(raw);
                tracing::trace!(
                    "Counter {} -> offset {:.6} Hz",
                    raw,
                    estimate.frequency_offset
                );
                Some(EstimateRecord::new(*timestamp_s, raw, estimate))
            }
            DecodedRecord::KfDebug { .. } => {
                self.stats.kf_debug_records += 1;
                None
            }
            DecodedRecord::Unknown { kind, length } => {
                self.stats.unknown_records += 1;
                tracing::debug!("Passing through unknown record (kind {}, {} bytes)", kind, length);
                None
            }
        }
    }

    /// Drive the pipeline until end-of-stream or cancellation, feeding every
    /// output into `sink`.
    ///
    /// The source is closed when this returns, on success or error.
    /// Cancellation is observed between steps, so a source blocked in a read
    /// stops at its next timeout or byte.
    pub fn run<K: Sink + ?Sized>(
        &mut self,
        sink: &mut K,
        cancel: &CancelToken,
    ) -> Result<PipelineSummary> {
        tracing::info!(
            "Pipeline started ({} models: {})",
            self.estimator.model_names().len(),
            self.estimator.model_names().join(", ")
        );

        let guard = CloseOnDrop { pipeline: self };
        let backoff = Duration::from_millis(guard.pipeline.config.resume_backoff_ms);

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            match guard.pipeline.step()? {
                PipelineEvent::Output(output) => sink.emit(&output)?,
                PipelineEvent::Skipped(_) => {}
                PipelineEvent::EndOfStream => {
                    if !guard.pipeline.config.resume_on_end_of_stream {
                        break StopReason::EndOfStream;
                    }
                    if !backoff.is_zero() {
                        std::thread::sleep(backoff);
                    }
                }
            }
        };
        sink.flush()?;

        let summary = guard.pipeline.summary(stop);
        tracing::info!(
            "Pipeline stopped ({:?}): {} status records, {} skipped, {} outliers",
            summary.stop,
            summary.stats.status_records,
            summary.stats.frame_skips + summary.stats.decode_skips,
            summary.outliers
        );
        Ok(summary)
    }

    fn summary(&self, stop: StopReason) -> PipelineSummary {
        PipelineSummary {
            stop,
            stats: self.stats,
            estimator_cycles: self.estimator.cycles(),
            outliers: self.estimator.outlier_count(),
            final_estimate: self.estimator.estimate(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Close the underlying source.
    pub fn close(&mut self) {
        self.decoder.close();
    }

    pub fn into_source(self) -> S {
        self.decoder.into_inner()
    }
}
