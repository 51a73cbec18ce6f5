//! The connection encoder: one typed send operation per protocol message.
//!
//! A [`ClientConnection`] exclusively owns the output stream to one peer.
//! Its dialect is fixed at construction, so each send resolves its message
//! descriptor through a named catalog field, encodes one complete frame in
//! memory and hands it to the stream in a single `write`.
//!
//! # Lifecycle
//!
//! ```text
//! new() ─► Open ──close()──► Closed
//!           │                  ▲
//!           └──── drop ────────┘  (stream closed if still open)
//! ```
//!
//! Sends and `flush` on a closed connection fail with
//! [`ConnectionError::InvalidState`]. `close` is idempotent.

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::observer::{SendObserver, SendRecord, Severity, TracingObserver};
use crate::protocol::catalog::{Catalog, Dialect, MessageDescriptor};
use crate::protocol::codec::{self, CodecError, FieldValue};
use crate::protocol::types::{ButtonId, ClipboardId, KeyButton, KeyId, KeyModifierMask, OptionsList};
use crate::stream::{EventTarget, OutputStream, StreamError};

/// Errors returned by [`ClientConnection`] operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The output stream rejected a write, flush or close.
    #[error("stream to {peer} failed: {source}")]
    StreamWrite {
        peer: String,
        #[source]
        source: StreamError,
    },

    /// The message could not be encoded; nothing was written.
    #[error("cannot encode {message}: {source}")]
    Encode {
        message: &'static str,
        #[source]
        source: CodecError,
    },

    /// The connection has already been closed.
    #[error("connection to {peer} is closed")]
    InvalidState { peer: String },

    /// The negotiated dialect does not carry this message.
    #[error("{message} is not part of protocol {dialect}")]
    Unsupported {
        message: &'static str,
        dialect: Dialect,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// Outbound encoder bound to one peer.
pub struct ClientConnection<S: OutputStream, O: SendObserver = TracingObserver> {
    name: String,
    stream: S,
    catalog: &'static Catalog,
    observer: O,
    state: State,
}

impl<S: OutputStream> ClientConnection<S> {
    /// Creates an open connection that logs through `tracing`.
    pub fn new(name: impl Into<String>, stream: S, dialect: Dialect) -> Self {
        Self::with_observer(name, stream, dialect, TracingObserver)
    }
}

impl<S: OutputStream, O: SendObserver> ClientConnection<S, O> {
    /// Creates an open connection reporting sends to `observer`.
    pub fn with_observer(name: impl Into<String>, stream: S, dialect: Dialect, observer: O) -> Self {
        let name = name.into();
        debug!(peer = %name, %dialect, "connection opened");
        Self {
            name,
            stream,
            catalog: dialect.catalog(),
            observer,
            state: State::Open,
        }
    }

    /// The peer's screen name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.catalog.dialect
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// The stream's event-system handle, passed through unchanged.
    pub fn event_target(&self) -> EventTarget {
        self.stream.event_target()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    // ── Screen transitions ────────────────────────────────────────────────────

    /// Asks the peer to report its screen shape.
    pub fn send_query_info(&mut self) -> Result<(), ConnectionError> {
        let d = self.catalog.query_info;
        self.send(d, &[], Some((Severity::Info, format_args!(""))))
    }

    /// Cursor entered the peer's screen at an absolute position.
    ///
    /// `seq_num` is written as given; keeping it increasing is the caller's job.
    pub fn send_enter(
        &mut self,
        x_abs: i32,
        y_abs: i32,
        seq_num: u32,
        mask: KeyModifierMask,
    ) -> Result<(), ConnectionError> {
        let d = self.catalog.enter;
        self.send(
            d,
            &[
                FieldValue::I32(x_abs),
                FieldValue::I32(y_abs),
                FieldValue::U32(seq_num),
                FieldValue::U32(mask.0),
            ],
            Some((
                Severity::Info,
                format_args!("{x_abs},{y_abs} seq={seq_num} mask={:04x}", mask),
            )),
        )
    }

    /// Cursor left the peer's screen.
    pub fn send_leave(&mut self) -> Result<(), ConnectionError> {
        let d = self.catalog.leave;
        self.send(d, &[], Some((Severity::Info, format_args!(""))))
    }

    // ── Keyboard ──────────────────────────────────────────────────────────────

    pub fn send_key_down(
        &mut self,
        key: KeyId,
        mask: KeyModifierMask,
        button: KeyButton,
    ) -> Result<(), ConnectionError> {
        let d = self.catalog.key_down;
        self.send(
            d,
            &[FieldValue::U32(key.0), FieldValue::U32(mask.0), FieldValue::U16(button.0)],
            Some((
                Severity::Info,
                format_args!("key={} mask={:04x} button={:04x}", key.0, mask, button),
            )),
        )
    }

    pub fn send_key_up(
        &mut self,
        key: KeyId,
        mask: KeyModifierMask,
        button: KeyButton,
    ) -> Result<(), ConnectionError> {
        let d = self.catalog.key_up;
        self.send(
            d,
            &[FieldValue::U32(key.0), FieldValue::U32(mask.0), FieldValue::U16(button.0)],
            Some((
                Severity::Info,
                format_args!("key={} mask={:04x} button={:04x}", key.0, mask, button),
            )),
        )
    }

    /// Auto-repeat of a held key; `count` is the number of repeats it stands for.
    pub fn send_key_repeat(
        &mut self,
        key: KeyId,
        mask: KeyModifierMask,
        count: i32,
        button: KeyButton,
    ) -> Result<(), ConnectionError> {
        let d = self.catalog.key_repeat;
        self.send(
            d,
            &[
                FieldValue::U32(key.0),
                FieldValue::U32(mask.0),
                FieldValue::I32(count),
                FieldValue::U16(button.0),
            ],
            Some((
                Severity::Info,
                format_args!(
                    "key={} mask={:04x} count={} button={:04x}",
                    key.0, mask, count, button
                ),
            )),
        )
    }

    // ── Mouse ─────────────────────────────────────────────────────────────────

    pub fn send_mouse_down(&mut self, button: ButtonId) -> Result<(), ConnectionError> {
        let d = self.catalog.mouse_down;
        self.send(
            d,
            &[FieldValue::U8(button.0)],
            Some((Severity::Info, format_args!("button={}", button.0))),
        )
    }

    pub fn send_mouse_up(&mut self, button: ButtonId) -> Result<(), ConnectionError> {
        let d = self.catalog.mouse_up;
        self.send(
            d,
            &[FieldValue::U8(button.0)],
            Some((Severity::Info, format_args!("button={}", button.0))),
        )
    }

    /// Absolute pointer position on the peer's screen.
    pub fn send_mouse_move(&mut self, x_abs: i32, y_abs: i32) -> Result<(), ConnectionError> {
        let d = self.catalog.mouse_move;
        self.send(
            d,
            &[FieldValue::I32(x_abs), FieldValue::I32(y_abs)],
            Some((Severity::Trace, format_args!("{x_abs},{y_abs}"))),
        )
    }

    /// Pointer motion relative to the current position.
    pub fn send_mouse_relative_move(&mut self, x_rel: i32, y_rel: i32) -> Result<(), ConnectionError> {
        let d = self.catalog.mouse_relative_move;
        self.send(
            d,
            &[FieldValue::I32(x_rel), FieldValue::I32(y_rel)],
            Some((Severity::Trace, format_args!("{x_rel:+},{y_rel:+}"))),
        )
    }

    pub fn send_mouse_wheel(&mut self, x_delta: i32, y_delta: i32) -> Result<(), ConnectionError> {
        let d = self.catalog.mouse_wheel;
        self.send(
            d,
            &[FieldValue::I32(x_delta), FieldValue::I32(y_delta)],
            Some((Severity::Trace, format_args!("{x_delta:+},{y_delta:+}"))),
        )
    }

    /// Announces a file drag. `blob` is the file list, forwarded untouched.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Unsupported`] on a dialect without drag support.
    pub fn send_drag_info(&mut self, file_count: u32, blob: &[u8]) -> Result<(), ConnectionError> {
        let d = self.catalog.drag_info.ok_or(ConnectionError::Unsupported {
            message: "drag info",
            dialect: self.catalog.dialect,
        })?;
        self.send(
            d,
            &[FieldValue::U32(file_count), FieldValue::bytes(blob)],
            Some((
                Severity::Info,
                format_args!("files={file_count} bytes={}", blob.len()),
            )),
        )
    }

    // ── Screen saver and options ──────────────────────────────────────────────

    pub fn send_screensaver(&mut self, on: bool) -> Result<(), ConnectionError> {
        let d = self.catalog.screensaver;
        self.send(
            d,
            &[FieldValue::U8(u8::from(on))],
            Some((Severity::Info, format_args!("{}", if on { "on" } else { "off" }))),
        )
    }

    pub fn send_reset_options(&mut self) -> Result<(), ConnectionError> {
        let d = self.catalog.reset_options;
        self.send(d, &[], Some((Severity::Info, format_args!(""))))
    }

    /// Pushes option values in list order.
    pub fn send_set_options(&mut self, options: &OptionsList) -> Result<(), ConnectionError> {
        let d = self.catalog.set_options;
        self.send(
            d,
            &[FieldValue::options(options.as_slice())],
            Some((Severity::Info, format_args!("{} options", options.len()))),
        )
    }

    /// Acknowledges a screen info report.
    pub fn send_info_ack(&mut self) -> Result<(), ConnectionError> {
        let d = self.catalog.info_ack;
        self.send(d, &[], Some((Severity::Info, format_args!(""))))
    }

    /// Heartbeat. Sent continuously, so it is never reported to the observer.
    pub fn send_keep_alive(&mut self) -> Result<(), ConnectionError> {
        let d = self.catalog.keep_alive;
        self.send(d, &[], None)
    }

    /// Writes a pre-formatted close or error message such as
    /// `CloseReason::Busy.message()`. The body is framed but not interpreted.
    pub fn send_close(&mut self, message: &[u8]) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let frame = codec::frame_raw(message).map_err(|source| ConnectionError::Encode {
            message: "close",
            source,
        })?;
        let tag = &message[..message.len().min(4)];
        self.observer.on_send(&SendRecord {
            peer: &self.name,
            message: "close",
            severity: Severity::Info,
            details: format_args!("{}", String::from_utf8_lossy(tag)),
        });
        self.write_frame(&frame)
    }

    /// Tells the peer the server now owns clipboard `id`.
    pub fn send_grab_clipboard(&mut self, id: ClipboardId) -> Result<(), ConnectionError> {
        let d = self.catalog.grab_clipboard;
        // The sequence field is reserved and always zero on this path.
        self.send(
            d,
            &[FieldValue::U8(id.0), FieldValue::U32(0)],
            Some((Severity::Info, format_args!("id={}", id.0))),
        )
    }

    // ── Stream lifecycle ──────────────────────────────────────────────────────

    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let result = self.stream.flush();
        result.map_err(|source| self.stream_error(source))
    }

    /// Closes the stream. A second call returns `Ok` without touching it.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Closed;
        debug!(peer = %self.name, "closing connection");
        let result = self.stream.close();
        result.map_err(|source| self.stream_error(source))
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn send(
        &mut self,
        descriptor: &'static MessageDescriptor,
        fields: &[FieldValue<'_>],
        log: Option<(Severity, fmt::Arguments<'_>)>,
    ) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let frame = codec::encode_frame(descriptor, fields).map_err(|source| {
            ConnectionError::Encode {
                message: descriptor.name,
                source,
            }
        })?;
        if let Some((severity, details)) = log {
            self.observer.on_send(&SendRecord {
                peer: &self.name,
                message: descriptor.name,
                severity,
                details,
            });
        }
        self.write_frame(&frame)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let result = self.stream.write(frame);
        result.map_err(|source| self.stream_error(source))
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(ConnectionError::InvalidState {
                peer: self.name.clone(),
            }),
        }
    }

    fn stream_error(&self, source: StreamError) -> ConnectionError {
        ConnectionError::StreamWrite {
            peer: self.name.clone(),
            source,
        }
    }
}

impl<S: OutputStream, O: SendObserver> Drop for ClientConnection<S, O> {
    fn drop(&mut self) {
        if self.state == State::Open {
            self.state = State::Closed;
            if let Err(e) = self.stream.close() {
                warn!(peer = %self.name, "failed to close stream on drop: {}", e);
            }
        }
    }
}

impl<S: OutputStream, O: SendObserver> fmt::Debug for ClientConnection<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("name", &self.name)
            .field("dialect", &self.catalog.dialect)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::stream::MockOutputStream;
    use std::io;

    fn accepting_stream(writes: usize) -> MockOutputStream {
        let mut stream = MockOutputStream::new();
        stream.expect_write().times(writes).returning(|_| Ok(()));
        stream
    }

    #[test]
    fn test_each_send_is_one_write() {
        // Arrange
        let mut stream = accepting_stream(3);
        stream.expect_close().times(1).returning(|| Ok(()));
        let mut conn = ClientConnection::with_observer("laptop", stream, Dialect::V1_6, RecordingObserver::new());

        // Act
        conn.send_mouse_move(1, 2).expect("move");
        conn.send_key_down(KeyId::from('a'), KeyModifierMask::default(), KeyButton(0x1E))
            .expect("key down");
        conn.send_grab_clipboard(ClipboardId::CLIPBOARD).expect("grab");

        // Assert – mock verifies the write count on drop
        conn.close().expect("close");
    }

    #[test]
    fn test_close_twice_closes_stream_once() {
        // Arrange
        let mut stream = MockOutputStream::new();
        stream.expect_close().times(1).returning(|| Ok(()));
        let mut conn = ClientConnection::new("laptop", stream, Dialect::V1_6);

        // Act
        let first = conn.close();
        let second = conn.close();

        // Assert
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(conn.is_closed());
    }

    #[test]
    fn test_send_after_close_is_invalid_state_and_writes_nothing() {
        // Arrange
        let mut stream = MockOutputStream::new();
        stream.expect_write().never();
        stream.expect_flush().never();
        stream.expect_close().times(1).returning(|| Ok(()));
        let mut conn = ClientConnection::new("laptop", stream, Dialect::V1_6);
        conn.close().expect("close");

        // Act
        let send = conn.send_leave();
        let flush = conn.flush();

        // Assert
        assert!(matches!(send, Err(ConnectionError::InvalidState { ref peer }) if peer == "laptop"));
        assert!(matches!(flush, Err(ConnectionError::InvalidState { .. })));
    }

    #[test]
    fn test_write_failure_propagates_and_close_still_works() {
        // Arrange
        let mut stream = MockOutputStream::new();
        stream
            .expect_write()
            .times(1)
            .returning(|_| Err(StreamError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))));
        stream.expect_close().times(1).returning(|| Ok(()));
        let mut conn = ClientConnection::new("laptop", stream, Dialect::V1_6);

        // Act
        let result = conn.send_mouse_down(ButtonId::LEFT);

        // Assert
        assert!(matches!(
            result,
            Err(ConnectionError::StreamWrite { source: StreamError::Io(_), .. })
        ));
        assert!(!conn.is_closed(), "a failed write does not change state");
        conn.close().expect("close after failure");
    }

    #[test]
    fn test_close_failure_is_reported_once() {
        let mut stream = MockOutputStream::new();
        stream.expect_close().times(1).returning(|| Err(StreamError::Closed));
        let mut conn = ClientConnection::new("laptop", stream, Dialect::V1_6);

        assert!(matches!(conn.close(), Err(ConnectionError::StreamWrite { .. })));
        assert!(conn.close().is_ok());
    }

    #[test]
    fn test_drop_closes_open_stream() {
        let mut stream = MockOutputStream::new();
        stream.expect_close().times(1).returning(|| Ok(()));
        let conn = ClientConnection::new("laptop", stream, Dialect::V1_6);
        drop(conn);
    }

    #[test]
    fn test_flush_passes_through() {
        let mut stream = MockOutputStream::new();
        stream.expect_flush().times(1).returning(|| Ok(()));
        stream.expect_close().times(1).returning(|| Ok(()));
        let mut conn = ClientConnection::new("laptop", stream, Dialect::V1_6);

        conn.flush().expect("flush");
    }

    #[test]
    fn test_event_target_is_passed_through() {
        let mut stream = MockOutputStream::new();
        stream.expect_event_target().return_const(EventTarget(42));
        stream.expect_close().returning(|| Ok(()));
        let conn = ClientConnection::new("laptop", stream, Dialect::V1_3);

        assert_eq!(conn.event_target(), EventTarget(42));
    }

    #[test]
    fn test_drag_info_unsupported_on_v1_3_writes_nothing() {
        // Arrange
        let mut stream = MockOutputStream::new();
        stream.expect_write().never();
        stream.expect_close().returning(|| Ok(()));
        let observer = RecordingObserver::new();
        let mut conn = ClientConnection::with_observer("old", stream, Dialect::V1_3, observer.clone());

        // Act
        let result = conn.send_drag_info(1, b"file");

        // Assert
        assert!(matches!(
            result,
            Err(ConnectionError::Unsupported { message: "drag info", dialect: Dialect::V1_3 })
        ));
        assert!(observer.is_empty());
    }

    #[test]
    fn test_observer_severity_per_message() {
        // Arrange
        let stream = {
            let mut s = accepting_stream(6);
            s.expect_close().returning(|| Ok(()));
            s
        };
        let observer = RecordingObserver::new();
        let mut conn = ClientConnection::with_observer("laptop", stream, Dialect::V1_6, observer.clone());

        // Act
        conn.send_enter(0, 0, 1, KeyModifierMask::default()).expect("enter");
        conn.send_mouse_move(5, 5).expect("move");
        conn.send_mouse_relative_move(-1, 1).expect("rel");
        conn.send_mouse_wheel(0, 120).expect("wheel");
        conn.send_keep_alive().expect("keep alive");
        conn.send_screensaver(true).expect("screensaver");

        // Assert
        let seen: Vec<(&str, Severity)> = observer
            .records()
            .iter()
            .map(|r| (r.message, r.severity))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("enter", Severity::Info),
                ("mouse move", Severity::Trace),
                ("mouse relative move", Severity::Trace),
                ("mouse wheel", Severity::Trace),
                ("screensaver", Severity::Info),
            ]
        );
        assert!(observer.records().iter().all(|r| r.peer == "laptop"));
    }

    #[test]
    fn test_debug_output_names_peer_and_dialect() {
        let mut stream = MockOutputStream::new();
        stream.expect_close().returning(|| Ok(()));
        let conn = ClientConnection::new("laptop", stream, Dialect::V1_6);

        let text = format!("{:?}", conn);

        assert!(text.contains("laptop"));
        assert!(text.contains("V1_6"));
    }
}
