//! [`OutputStream`] adapter over any blocking [`std::io::Write`].

use std::io::Write;
use super::{EventTarget, OutputStream, StreamError};

/// Wraps a writer such as a `TcpStream` or `BufWriter<TcpStream>`.
///
/// `close` flushes and then drops the writer, which for a socket shuts the
/// connection. Every instance gets a distinct [`EventTarget`].
pub struct IoStream<W: Write + Send> {
    writer: Option<W>,
    target: EventTarget,
}

impl<W: Write + Send> IoStream<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            target: EventTarget::next(),
        }
    }

    /// The wrapped writer, or `None` once the stream is closed.
    pub fn get_ref(&self) -> Option<&W> {
        self.writer.as_ref()
    }

    /// Unwraps the writer without flushing it.
    pub fn into_inner(mut self) -> Option<W> {
        self.writer.take()
    }

    fn writer(&mut self) -> Result<&mut W, StreamError> {
        self.writer.as_mut().ok_or(StreamError::Closed)
    }
}

impl<W: Write + Send> OutputStream for IoStream<W> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.writer()?.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.writer()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn event_target(&self) -> EventTarget {
        self.target
    }
}
