//! Output sinks for pipeline records.

use std::io::Write;

use tokio::sync::mpsc;

use crate::error::{Result, TelemetryError};
use crate::pipeline::PipelineOutput;

/// Consumer of pipeline outputs.
pub trait Sink {
    fn emit(&mut self, output: &PipelineOutput) -> Result<()>;

    /// Flush buffered output. Called once when a run ends.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Sink for Vec<PipelineOutput> {
    fn emit(&mut self, output: &PipelineOutput) -> Result<()> {
        self.push(output.clone());
        Ok(())
    }
}

impl<K: Sink + ?Sized> Sink for &mut K {
    fn emit(&mut self, output: &PipelineOutput) -> Result<()> {
        (**self).emit(output)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    estimates_only: bool,
}

impl<W: Write> JsonLinesSink<W> {
    /// Write every output record.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            estimates_only: false,
        }
    }

    /// Write only the estimate of each status record.
    pub fn estimates_only(writer: W) -> Self {
        Self {
            writer,
            estimates_only: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for JsonLinesSink<W> {
    fn emit(&mut self, output: &PipelineOutput) -> Result<()> {
        if self.estimates_only {
            match &output.estimate {
                Some(estimate) => serde_json::to_writer(&mut self.writer, estimate)?,
                None => return Ok(()),
            }
        } else {
            serde_json::to_writer(&mut self.writer, output)?;
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards outputs into a tokio channel from a blocking thread.
///
/// Must not be used from inside an async task: `blocking_send` panics there.
pub struct ChannelSink {
    tx: mpsc::Sender<PipelineOutput>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<PipelineOutput>) -> Self {
        Self { tx }
    }
}

impl Sink for ChannelSink {
    fn emit(&mut self, output: &PipelineOutput) -> Result<()> {
        self.tx
            .blocking_send(output.clone())
            .map_err(|_| TelemetryError::SinkClosed)
    }
}
