//! The output stream contract the connection encoder writes frames into.
//!
//! A stream is a byte sink with an explicit flush/close lifecycle. The
//! encoder owns its stream exclusively and hands it one complete frame per
//! `write` call, so implementations never see a partial message.
//!
//! Two adapters ship with the crate:
//! - [`IoStream`] wraps any [`std::io::Write`] (a `TcpStream`, a `BufWriter`).
//! - [`MemoryStream`] records every write in memory for tests and benches.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

pub mod io_stream;
pub mod memory;

pub use io_stream::IoStream;
pub use memory::{MemoryStream, StreamProbe};

/// Errors reported by an [`OutputStream`].
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stream is closed")]
    Closed,
}

/// Opaque handle identifying a stream in the surrounding event system.
///
/// The encoder never interprets it; it only hands it back through
/// `ClientConnection::event_target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventTarget(pub u64);

static NEXT_TARGET: AtomicU64 = AtomicU64::new(1);

impl EventTarget {
    /// Allocates a process-unique target.
    pub fn next() -> Self {
        EventTarget(NEXT_TARGET.fetch_add(1, Ordering::Relaxed))
    }
}

/// Byte sink with flush/close lifecycle.
#[cfg_attr(test, mockall::automock)]
pub trait OutputStream: Send {
    /// Writes `bytes` in full or fails.
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError>;

    /// Pushes buffered bytes to the transport. A no-op when nothing is pending.
    fn flush(&mut self) -> Result<(), StreamError>;

    /// Flushes and releases the underlying transport.
    fn close(&mut self) -> Result<(), StreamError>;

    /// The handle the event system uses to address this stream.
    fn event_target(&self) -> EventTarget;
}

impl<S: OutputStream + ?Sized> OutputStream for Box<S> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        (**self).close()
    }

    fn event_target(&self) -> EventTarget {
        (**self).event_target()
    }
}
