//! Self-synchronizing frame decoder.
//!
//! Pulls bytes from a [`ByteSource`] and yields frames. Implements a state
//! machine over a single `BytesMut` buffer:
//! - `WaitingForHeader`: need 6 bytes starting with the sentinel
//! - `WaitingForPayload`: header accepted, need `length` more bytes
//!
//! When the first two buffered bytes are not the sentinel the decoder slides
//! forward one byte at a time over everything it has buffered (including the
//! rejected header) until the two-byte window matches `0B B0`. A bad length
//! never triggers a byte-level resync: the header is consumed and nothing else.
//!
//! End-of-stream while assembling a header keeps the partial bytes, so a later
//! call resumes where this one stopped. End-of-stream inside a payload drops
//! the frame.
//!
//! # Example
//!
//! ```
//! use gpsdo_telemetry::protocol::{frame_payload, FrameConfig, FrameDecoder, FrameEvent};
//! use gpsdo_telemetry::transport::ReaderSource;
//!
//! let mut bytes = vec![0xFF, 0x0B, 0x00];
//! bytes.extend(frame_payload(1, b"hi").unwrap());
//!
//! let source = ReaderSource::new(std::io::Cursor::new(bytes));
//! let mut decoder = FrameDecoder::new(source, FrameConfig::default());
//!
//! match decoder.next_frame().unwrap() {
//!     FrameEvent::Frame(frame) => assert_eq!(frame.payload(), b"hi"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! assert_eq!(decoder.next_frame().unwrap(), FrameEvent::EndOfStream);
//! ```

use std::io;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAGIC_BYTES};
use super::Frame;
use crate::error::{FrameError, Result};
use crate::transport::ByteSource;

/// Framing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Largest accepted payload; longer headers are discarded.
    pub max_payload_size: u16,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Outcome of one [`FrameDecoder::next_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete frame with a valid header.
    Frame(Frame),
    /// A header was consumed but its frame was discarded.
    Skipped(FrameError),
    /// The source has no more bytes for now.
    EndOfStream,
}

/// Framing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Frames delivered.
    pub frames: u64,
    /// Times the decoder lost alignment and searched for the sentinel.
    pub resyncs: u64,
    /// Bytes dropped while searching for the sentinel.
    pub discarded_bytes: u64,
    /// Headers discarded for a zero or oversized length.
    pub invalid_lengths: u64,
    /// Frames dropped because the payload was cut short.
    pub truncated: u64,
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Assembling a header.
    WaitingForHeader,
    /// Header accepted, waiting for payload bytes.
    WaitingForPayload { header: Header },
}

/// Extracts frames from one byte source for its whole lifetime.
pub struct FrameDecoder<S> {
    /// Bound source.
    source: S,
    /// Candidate header bytes or payload bytes read so far.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u16,
    /// Bytes dropped in the current resync, if one is in progress.
    resync: Option<u64>,
    stats: FrameStats,
}

impl<S: ByteSource> FrameDecoder<S> {
    /// Bind a decoder to a source.
    pub fn new(source: S, config: FrameConfig) -> Self {
        Self {
            source,
            buffer: BytesMut::with_capacity(HEADER_SIZE + config.max_payload_size as usize),
            state: State::WaitingForHeader,
            max_payload_size: config.max_payload_size,
            resync: None,
            stats: FrameStats::default(),
        }
    }

    /// Decode the next frame.
    ///
    /// Returns `Err` only for an I/O failure of the source. Framing faults are
    /// reported as [`FrameEvent::Skipped`] and the decoder stays usable.
    pub fn next_frame(&mut self) -> Result<FrameEvent> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    if !self.fill(HEADER_SIZE)? {
                        return Ok(FrameEvent::EndOfStream);
                    }

                    if self.buffer[..2] != MAGIC_BYTES {
                        self.slide_to_sentinel();
                        continue;
                    }

                    if let Some(discarded) = self.resync.take() {
                        tracing::debug!("Resynchronized after discarding {} bytes", discarded);
                    }

                    let header = match Header::decode(&self.buffer.split_to(HEADER_SIZE)) {
                        Some(header) => header,
                        None => continue,
                    };

                    if let Err(e) = header.validate(self.max_payload_size) {
                        self.stats.invalid_lengths += 1;
                        tracing::warn!("Discarding frame of kind {}: {}", header.kind, e);
                        return Ok(FrameEvent::Skipped(e));
                    }

                    self.state = State::WaitingForPayload { header };
                }

                State::WaitingForPayload { header } => {
                    let length = header.length as usize;
                    self.state = State::WaitingForHeader;

                    let filled = match self.fill(length) {
                        Ok(filled) => filled,
                        Err(e) => {
                            self.buffer.clear();
                            return Err(e);
                        }
                    };

                    if !filled {
                        let received = self.buffer.len();
                        self.buffer.clear();
                        self.stats.truncated += 1;
                        tracing::warn!(
                            "Dropping frame of kind {}: {}",
                            header.kind,
                            FrameError::Truncated {
                                expected: length,
                                received
                            }
                        );
                        return Ok(FrameEvent::EndOfStream);
                    }

                    // Extract payload (zero-copy freeze)
                    let payload = self.buffer.split_to(length).freeze();
                    self.stats.frames += 1;
                    return Ok(FrameEvent::Frame(Frame::new(header, payload)));
                }
            }
        }
    }

    /// Iterate over frames until end-of-stream, skipping discarded frames.
    ///
    /// The iterator can be recreated after it ends; decoding resumes where it
    /// stopped.
    pub fn frames(&mut self) -> Frames<'_, S> {
        Frames { decoder: self }
    }

    /// Framing counters so far.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Number of buffered bytes not yet delivered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Mutable access to the bound source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Close the bound source.
    pub fn close(&mut self) {
        self.source.close();
    }

    /// Unbind and return the source.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Read until `target` bytes are buffered. Returns `false` at end-of-stream.
    fn fill(&mut self, target: usize) -> Result<bool> {
        while self.buffer.len() < target {
            let start = self.buffer.len();
            self.buffer.resize(target, 0);
            let result = self.source.read(&mut self.buffer[start..]);

            match result {
                Ok(0) => {
                    self.buffer.truncate(start);
                    return Ok(false);
                }
                Ok(n) => self.buffer.truncate(start + n.min(target - start)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.buffer.truncate(start),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    self.buffer.truncate(start);
                    return Ok(false);
                }
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e.into());
                }
            }
        }
        Ok(true)
    }

    /// Drop leading bytes up to the next possible sentinel position.
    ///
    /// A trailing `0B` is kept since its partner may not have arrived yet.
    fn slide_to_sentinel(&mut self) {
        if self.resync.is_none() {
            self.stats.resyncs += 1;
            self.resync = Some(0);
            tracing::debug!("Lost frame alignment, searching for sentinel");
        }

        let len = self.buffer.len();
        let skip = (1..len)
            .find(|&i| {
                self.buffer[i] == MAGIC_BYTES[0] && (i + 1 == len || self.buffer[i + 1] == MAGIC_BYTES[1])
            })
            .unwrap_or(len);

        let _ = self.buffer.split_to(skip);
        self.stats.discarded_bytes += skip as u64;
        if let Some(discarded) = self.resync.as_mut() {
            *discarded += skip as u64;
        }
    }
}

/// Iterator returned by [`FrameDecoder::frames`].
pub struct Frames<'a, S> {
    decoder: &'a mut FrameDecoder<S>,
}

impl<S: ByteSource> Iterator for Frames<'_, S> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.decoder.next_frame() {
                Ok(FrameEvent::Frame(frame)) => return Some(Ok(frame)),
                Ok(FrameEvent::Skipped(_)) => continue,
                Ok(FrameEvent::EndOfStream) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::protocol::wire_format::kinds;
    use crate::protocol::{build_frame, frame_payload};
    use std::collections::VecDeque;

    /// Source that replays scripted reads. `None` entries read as end-of-stream.
    struct ScriptedSource {
        reads: VecDeque<Option<Vec<u8>>>,
    }

    impl ScriptedSource {
        fn new(reads: Vec<Option<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
            }
        }
    }

    impl ByteSource for ScriptedSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Some(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(Some(chunk.split_off(n)));
                    }
                    Ok(n)
                }
                Some(None) | None => Ok(0),
            }
        }
    }

    /// Source whose every read fails with the given error kind.
    struct FailingSource(io::ErrorKind);

    impl ByteSource for FailingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "scripted failure"))
        }
    }

    fn decoder_over(bytes: Vec<u8>) -> FrameDecoder<ScriptedSource> {
        FrameDecoder::new(ScriptedSource::new(vec![Some(bytes)]), FrameConfig::default())
    }

    fn expect_frame(event: FrameEvent) -> Frame {
        match event {
            FrameEvent::Frame(frame) => frame,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = decoder_over(frame_payload(kinds::STATUS, b"hello").unwrap());

        let frame = expect_frame(decoder.next_frame().unwrap());
        assert_eq!(frame.kind(), kinds::STATUS);
        assert_eq!(frame.payload(), b"hello");
        assert_eq!(decoder.next_frame().unwrap(), FrameEvent::EndOfStream);
        assert_eq!(decoder.stats().frames, 1);
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let bytes = frame_payload(kinds::KF_DEBUG, b"fragmented").unwrap();
        let reads = bytes.into_iter().map(|b| Some(vec![b])).collect();
        let mut decoder = FrameDecoder::new(ScriptedSource::new(reads), FrameConfig::default());

        let frame = expect_frame(decoder.next_frame().unwrap());
        assert_eq!(frame.payload(), b"fragmented");
    }

    #[test]
    fn test_multiple_frames_in_sequence() {
        let mut bytes = Vec::new();
        for i in 1u8..=3 {
            bytes.extend(frame_payload(i as u16, &[i; 4]).unwrap());
        }
        let mut decoder = decoder_over(bytes);

        let kinds: Vec<u16> = decoder.frames().map(|f| f.unwrap().kind()).collect();
        assert_eq!(kinds, vec![1, 2, 3]);
    }

    #[test]
    fn test_garbage_only_reaches_end_of_stream() {
        let mut decoder = decoder_over(vec![0x00, 0xB0, 0x0B, 0x0B, 0xFF, 0x12, 0x34, 0x0B]);

        assert_eq!(decoder.next_frame().unwrap(), FrameEvent::EndOfStream);
        assert_eq!(decoder.stats().resyncs, 1);
        // The tail shorter than a header waits for more bytes.
        assert_eq!(decoder.buffered(), 2);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut bytes = vec![0x12, 0x34, 0x56];
        bytes.extend(frame_payload(kinds::STATUS, b"ok").unwrap());
        let mut decoder = decoder_over(bytes);

        let frame = expect_frame(decoder.next_frame().unwrap());
        assert_eq!(frame.payload(), b"ok");
        assert_eq!(decoder.stats().resyncs, 1);
        assert_eq!(decoder.stats().discarded_bytes, 3);
    }

    #[test]
    fn test_resync_with_overlapping_false_sentinel() {
        // A lone 0x0B directly before the real sentinel must not eat its first byte.
        let mut bytes = vec![0x0B, 0x0B, 0x0B];
        bytes.extend(frame_payload(kinds::STATUS, b"xyz").unwrap());
        let mut decoder = decoder_over(bytes);

        let frame = expect_frame(decoder.next_frame().unwrap());
        assert_eq!(frame.payload(), b"xyz");
        assert_eq!(decoder.stats().discarded_bytes, 3);
    }

    #[test]
    fn test_resync_when_sentinel_inside_rejected_header() {
        // Garbage shorter than a header: the real sentinel sits inside the first 6 bytes.
        let mut bytes = vec![0xAA];
        bytes.extend(frame_payload(9, b"inner").unwrap());
        let mut decoder = decoder_over(bytes);

        let frame = expect_frame(decoder.next_frame().unwrap());
        assert_eq!(frame.kind(), 9);
        assert_eq!(frame.payload(), b"inner");
    }

    #[test]
    fn test_zero_length_keeps_alignment() {
        let mut bytes = build_frame(&Header::new(kinds::STATUS, 0), &[]);
        bytes.extend(frame_payload(kinds::STATUS, b"next").unwrap());
        let mut decoder = decoder_over(bytes);

        assert_eq!(
            decoder.next_frame().unwrap(),
            FrameEvent::Skipped(FrameError::InvalidLength {
                length: 0,
                max: DEFAULT_MAX_PAYLOAD_SIZE
            })
        );
        let frame = expect_frame(decoder.next_frame().unwrap());
        assert_eq!(frame.payload(), b"next");
        assert_eq!(decoder.stats().resyncs, 0);
        assert_eq!(decoder.stats().invalid_lengths, 1);
    }

    #[test]
    fn test_oversized_length_consumes_header_only() {
        let config = FrameConfig {
            max_payload_size: 8,
        };
        let mut bytes = Header::new(kinds::STATUS, 9).encode().to_vec();
        bytes.extend(frame_payload(kinds::KF_DEBUG, b"fits").unwrap());
        let mut decoder = FrameDecoder::new(ScriptedSource::new(vec![Some(bytes)]), config);

        assert!(matches!(
            decoder.next_frame().unwrap(),
            FrameEvent::Skipped(FrameError::InvalidLength { length: 9, max: 8 })
        ));
        assert_eq!(expect_frame(decoder.next_frame().unwrap()).kind(), kinds::KF_DEBUG);
    }

    #[test]
    fn test_truncated_payload_reports_end_of_stream() {
        let mut bytes = frame_payload(kinds::STATUS, b"complete payload").unwrap();
        bytes.truncate(bytes.len() - 4);
        let mut decoder = decoder_over(bytes);

        assert_eq!(decoder.next_frame().unwrap(), FrameEvent::EndOfStream);
        assert_eq!(decoder.stats().truncated, 1);
        assert_eq!(decoder.stats().frames, 0);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_resume_after_end_of_stream_mid_header() {
        let bytes = frame_payload(kinds::STATUS, b"split").unwrap();
        let (first, second) = bytes.split_at(3);
        let source = ScriptedSource::new(vec![Some(first.to_vec()), None, Some(second.to_vec())]);
        let mut decoder = FrameDecoder::new(source, FrameConfig::default());

        assert_eq!(decoder.next_frame().unwrap(), FrameEvent::EndOfStream);
        assert_eq!(decoder.buffered(), 3);
        let frame = expect_frame(decoder.next_frame().unwrap());
        assert_eq!(frame.payload(), b"split");
    }

    #[test]
    fn test_frames_iterator_restarts() {
        let first = frame_payload(1, b"a").unwrap();
        let second = frame_payload(2, b"b").unwrap();
        let source = ScriptedSource::new(vec![Some(first), None, Some(second)]);
        let mut decoder = FrameDecoder::new(source, FrameConfig::default());

        assert_eq!(decoder.frames().count(), 1);
        assert_eq!(decoder.frames().count(), 1);
        assert_eq!(decoder.stats().frames, 2);
    }

    #[test]
    fn test_timeout_is_end_of_stream() {
        let mut decoder = FrameDecoder::new(
            FailingSource(io::ErrorKind::TimedOut),
            FrameConfig::default(),
        );
        assert_eq!(decoder.next_frame().unwrap(), FrameEvent::EndOfStream);
    }

    #[test]
    fn test_hard_io_error_propagates() {
        let mut decoder = FrameDecoder::new(
            FailingSource(io::ErrorKind::BrokenPipe),
            FrameConfig::default(),
        );
        assert!(matches!(decoder.next_frame(), Err(TelemetryError::Io(_))));
    }
}
