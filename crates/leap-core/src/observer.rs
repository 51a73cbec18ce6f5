//! Send observers: the logging seam of the connection encoder.
//!
//! Every send except keep-alive hands one [`SendRecord`] to the connection's
//! observer before the frame is written. Observers cannot fail, so logging
//! never changes the outcome of a send.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{info, trace};

/// How loud a send record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Coarse, human-scale events (enter, key press, option changes).
    Info,
    /// High-rate pointer motion.
    Trace,
}

/// Description of one outgoing message.
#[derive(Debug, Clone, Copy)]
pub struct SendRecord<'a> {
    /// Screen name of the receiving peer.
    pub peer: &'a str,
    /// Descriptor name of the message, e.g. `"key down"`.
    pub message: &'static str,
    pub severity: Severity,
    /// Formatted field values. Only rendered if the observer asks for it.
    pub details: fmt::Arguments<'a>,
}

/// Receives a record for each outgoing message.
pub trait SendObserver {
    fn on_send(&self, record: &SendRecord<'_>);
}

/// Forwards records to `tracing`: `info!` for [`Severity::Info`], `trace!`
/// for [`Severity::Trace`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SendObserver for TracingObserver {
    fn on_send(&self, record: &SendRecord<'_>) {
        match record.severity {
            Severity::Info => info!(peer = record.peer, kind = record.message, "send {}", record.details),
            Severity::Trace => trace!(peer = record.peer, kind = record.message, "send {}", record.details),
        }
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SendObserver for NullObserver {
    fn on_send(&self, _record: &SendRecord<'_>) {}
}

/// A [`SendRecord`] with its details rendered, as kept by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub peer: String,
    pub message: &'static str,
    pub severity: Severity,
    pub details: String,
}

/// Keeps every record in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    records: Arc<Mutex<Vec<RecordedSend>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RecordedSend> {
        self.records.lock().expect("lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SendObserver for RecordingObserver {
    fn on_send(&self, record: &SendRecord<'_>) {
        self.records.lock().expect("lock poisoned").push(RecordedSend {
            peer: record.peer.to_string(),
            message: record.message,
            severity: record.severity,
            details: record.details.to_string(),
        });
    }
}

impl<T: SendObserver + ?Sized> SendObserver for Arc<T> {
    fn on_send(&self, record: &SendRecord<'_>) {
        (**self).on_send(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_renders_details() {
        // Arrange
        let observer = RecordingObserver::new();
        let shared = observer.clone();

        // Act
        observer.on_send(&SendRecord {
            peer: "laptop",
            message: "mouse down",
            severity: Severity::Info,
            details: format_args!("button={}", 1),
        });

        // Assert
        assert_eq!(
            shared.records(),
            vec![RecordedSend {
                peer: "laptop".to_string(),
                message: "mouse down",
                severity: Severity::Info,
                details: "button=1".to_string(),
            }]
        );
    }

    #[test]
    fn test_tracing_observer_does_not_panic_without_subscriber() {
        TracingObserver.on_send(&SendRecord {
            peer: "laptop",
            message: "mouse move",
            severity: Severity::Trace,
            details: format_args!("x={} y={}", 1, 2),
        });
    }
}
