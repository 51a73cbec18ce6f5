//! # leap-core
//!
//! Outbound message encoder for the input-leap remote input-sharing
//! protocol.
//!
//! The crate turns typed input events (key presses, pointer motion,
//! clipboard grabs, option changes) into the exact byte frames a peer
//! expects for its negotiated protocol version:
//!
//! - **`protocol`** – payload types, the per-dialect message catalog and the
//!   wire codec (length-prefixed frames, big-endian fields).
//! - **`connection`** – [`ClientConnection`], one send operation per message,
//!   writing whole frames into an exclusively owned stream.
//! - **`stream`** – the [`OutputStream`] contract plus an `io::Write` adapter
//!   and an in-memory recorder.
//! - **`observer`** – the injected logging seam for outgoing messages.
//!
//! The crate performs no socket I/O of its own and makes no decision about
//! *when* a message is sent; that belongs to the session layer.

pub mod connection;
pub mod observer;
pub mod protocol;
pub mod stream;

pub use connection::{ClientConnection, ConnectionError};
pub use observer::{RecordingObserver, SendObserver, SendRecord, Severity, TracingObserver};
pub use protocol::catalog::{CloseReason, Dialect, ProtocolVersion};
pub use protocol::codec::CodecError;
pub use protocol::types::{
    ButtonId, ClipboardId, KeyButton, KeyId, KeyModifierMask, OptionId, OptionPair, OptionsList,
};
pub use stream::{EventTarget, IoStream, MemoryStream, OutputStream, StreamError, StreamProbe};
