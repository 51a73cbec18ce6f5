//! Protocol module: payload types, the message catalog and the wire codec.

pub mod catalog;
pub mod codec;
pub mod types;

pub use catalog::{Catalog, CloseReason, Dialect, MessageDescriptor, ProtocolVersion};
pub use codec::{encode_frame, encode_message, CodecError, FieldType, FieldValue};
pub use types::*;
