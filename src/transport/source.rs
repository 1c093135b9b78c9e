//! Blocking byte sources.
//!
//! # Example
//!
//! ```
//! use gpsdo_telemetry::transport::{ByteSource, ReaderSource};
//!
//! let mut source = ReaderSource::new(std::io::Cursor::new(vec![1u8, 2, 3]));
//! let mut buf = [0u8; 8];
//! assert_eq!(source.read(&mut buf).unwrap(), 3);
//! source.close();
//! assert_eq!(source.read(&mut buf).unwrap(), 0);
//! ```

use std::io::{self, Read};

/// A readable byte stream.
///
/// `read` may block and may return fewer bytes than requested. `Ok(0)` means
/// end-of-stream. Serial sources may also report `TimedOut`/`WouldBlock`,
/// which the decoder treats as a resumable end-of-stream.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the underlying resource. Must be idempotent; a closed source
    /// reads as end-of-stream.
    fn close(&mut self) {}
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Adapts any [`Read`] (file replay, opened serial port, cursor) into a
/// [`ByteSource`]. Closing drops the reader.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: Option<R>,
}

impl<R: Read> ReaderSource<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            inner: Some(reader),
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Take back the reader, if still open.
    pub fn into_inner(self) -> Option<R> {
        self.inner
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }

    fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("Byte source closed");
        }
    }
}
