//! Background session - a pipeline on a blocking thread, outputs over a
//! channel.
//!
//! ```ignore
//! let mut session = Session::spawn(ReaderSource::new(port), TelemetryConfig::default())?;
//! while let Some(output) = session.recv().await {
//!     if let Some(estimate) = output.estimate {
//!         println!("{:.3} Hz", estimate.frequency_offset);
//!     }
//! }
//! let summary = session.join().await?;
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::pipeline::{CancelToken, Pipeline, PipelineOutput, PipelineSummary};
use crate::sink::ChannelSink;
use crate::transport::ByteSource;

/// Handle to a running pipeline.
///
/// Dropping the handle cancels the pipeline; it stops after its current step
/// and closes the source, even if it was idle and had nothing to send.
pub struct Session {
    outputs: mpsc::Receiver<PipelineOutput>,
    cancel: CancelToken,
    task: JoinHandle<Result<PipelineSummary>>,
}

impl Session {
    /// Validate `config` and start the pipeline on tokio's blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(source: S, config: TelemetryConfig) -> Result<Self>
    where
        S: ByteSource + Send + 'static,
    {
        let mut pipeline = Pipeline::new(source, &config)?;
        let (tx, outputs) = mpsc::channel(config.pipeline.output_buffer);
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut sink = ChannelSink::new(tx);
            pipeline.run(&mut sink, &token)
        });
        tracing::debug!("Session started");

        Ok(Self {
            outputs,
            cancel,
            task,
        })
    }

    /// Next output, or `None` once the pipeline has stopped and the channel
    /// is drained.
    pub async fn recv(&mut self) -> Option<PipelineOutput> {
        self.outputs.recv().await
    }

    /// Ask the pipeline to stop after its current step.
    pub fn cancel(&self) {
        tracing::info!("Session cancel requested");
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the pipeline to stop, discarding undelivered outputs.
    pub async fn join(mut self) -> Result<PipelineSummary> {
        while self.outputs.recv().await.is_some() {}

        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(TelemetryError::Task(e.to_string())),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            tracing::debug!("Session dropped, cancelling pipeline");
        }
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PayloadCodec, StatusRecord};
    use crate::pipeline::StopReason;
    use crate::protocol::{frame_payload, kinds};
    use crate::transport::ReaderSource;
    use std::io::{self, Cursor};

    const N0: u32 = 625_000;

    fn status_frames(counts: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (i, &raw) in counts.iter().enumerate() {
            let status = StatusRecord {
                raw_counter_value: raw,
                ..StatusRecord::default()
            };
            let payload = PayloadCodec::encode_status(&status, i as f64);
            bytes.extend(frame_payload(kinds::STATUS, &payload).unwrap());
        }
        bytes
    }

    #[tokio::test]
    async fn test_session_streams_outputs() {
        let source = ReaderSource::new(Cursor::new(status_frames(&[N0; 10])));
        let mut session = Session::spawn(source, TelemetryConfig::default()).unwrap();

        let mut received = 0;
        while let Some(output) = session.recv().await {
            assert!(output.estimate.is_some());
            received += 1;
        }
        assert_eq!(received, 10);

        let summary = session.join().await.unwrap();
        assert_eq!(summary.stop, StopReason::EndOfStream);
        assert_eq!(summary.estimator_cycles, 10);
    }

    #[tokio::test]
    async fn test_join_without_receiving() {
        let mut config = TelemetryConfig::default();
        config.pipeline.output_buffer = 1;
        let source = ReaderSource::new(Cursor::new(status_frames(&[N0; 8])));
        let session = Session::spawn(source, config).unwrap();

        let summary = session.join().await.unwrap();
        assert_eq!(summary.stats.status_records, 8);
    }

    #[tokio::test]
    async fn test_cancel_stops_live_session() {
        /// Never ends; reports a read timeout after every frame.
        struct Live {
            frame: Vec<u8>,
            remaining: Vec<u8>,
        }
        impl ByteSource for Live {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.remaining.is_empty() {
                    self.remaining = self.frame.clone();
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "idle"));
                }
                let n = self.remaining.len().min(buf.len());
                buf[..n].copy_from_slice(&self.remaining[..n]);
                self.remaining.drain(..n);
                Ok(n)
            }
        }

        let mut config = TelemetryConfig::default();
        config.pipeline.resume_on_end_of_stream = true;
        config.pipeline.resume_backoff_ms = 1;
        let frame = status_frames(&[N0]);
        let source = Live {
            remaining: frame.clone(),
            frame,
        };
        let mut session = Session::spawn(source, config).unwrap();

        for _ in 0..3 {
            assert!(session.recv().await.is_some());
        }
        session.cancel();

        let summary = session.join().await.unwrap();
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert!(summary.stats.status_records >= 3);
    }

    #[tokio::test]
    async fn test_drop_cancels_idle_session() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        /// Always idle; never produces a frame.
        struct Idle {
            closed: Arc<AtomicBool>,
        }
        impl ByteSource for Idle {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::TimedOut, "idle"))
            }
            fn close(&mut self) {
                self.closed.store(true, Ordering::SeqCst);
            }
        }

        let mut config = TelemetryConfig::default();
        config.pipeline.resume_on_end_of_stream = true;
        config.pipeline.resume_backoff_ms = 1;
        let closed = Arc::new(AtomicBool::new(false));
        let session = Session::spawn(
            Idle {
                closed: closed.clone(),
            },
            config,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closed.load(Ordering::SeqCst));
        drop(session);

        for _ in 0..200 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let mut config = TelemetryConfig::default();
        config.estimator.models.clear();
        let source = ReaderSource::new(Cursor::new(Vec::new()));
        assert!(matches!(
            Session::spawn(source, config),
            Err(TelemetryError::Config(_))
        ));
    }
}
