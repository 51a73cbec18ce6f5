//! In-memory [`OutputStream`] for tests and benchmarks.
//!
//! Every `write` call is recorded as its own entry, so tests can assert that
//! each message reached the stream as exactly one write.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EventTarget, OutputStream, StreamError};

#[derive(Debug, Default)]
struct Recorded {
    writes: Vec<Vec<u8>>,
    flushes: usize,
    closes: usize,
    closed: bool,
    fail_with: Option<io::ErrorKind>,
}

/// An output stream that keeps everything written to it.
///
/// Inspect it through a [`StreamProbe`] obtained before the stream is moved
/// into a connection.
pub struct MemoryStream {
    recorded: Arc<Mutex<Recorded>>,
    target: EventTarget,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            target: EventTarget::next(),
        }
    }

    /// A handle that observes this stream after it has been moved away.
    pub fn probe(&self) -> StreamProbe {
        StreamProbe {
            recorded: Arc::clone(&self.recorded),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().expect("lock poisoned")
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStream for MemoryStream {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let mut recorded = self.lock();
        if recorded.closed {
            return Err(StreamError::Closed);
        }
        if let Some(kind) = recorded.fail_with {
            return Err(io::Error::new(kind, "injected write failure").into());
        }
        recorded.writes.push(bytes.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        let mut recorded = self.lock();
        if recorded.closed {
            return Err(StreamError::Closed);
        }
        recorded.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let mut recorded = self.lock();
        recorded.closes += 1;
        recorded.closed = true;
        Ok(())
    }

    fn event_target(&self) -> EventTarget {
        self.target
    }
}

/// Shared view of a [`MemoryStream`].
#[derive(Clone)]
pub struct StreamProbe {
    recorded: Arc<Mutex<Recorded>>,
}

impl StreamProbe {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().expect("lock poisoned")
    }

    /// Each write call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All written bytes concatenated.
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().writes.concat()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Makes every following write fail with `kind` until [`heal`](Self::heal).
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.lock().fail_with = Some(kind);
    }

    pub fn heal(&self) {
        self.lock().fail_with = None;
    }
}
