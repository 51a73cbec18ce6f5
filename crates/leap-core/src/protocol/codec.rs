//! Binary codec for input-leap message fields and frames.
//!
//! Wire format:
//! ```text
//! [body_len:4][opcode:N][field_1]...[field_n]
//! ```
//! `body_len` counts the opcode and fields, not itself. All integers are
//! big-endian with no padding. Field encodings:
//!
//! | Field type   | Encoding |
//! |--------------|----------|
//! | `U8`         | 1 byte |
//! | `U16`        | 2 bytes |
//! | `U32`/`I32`  | 4 bytes (two's complement for `I32`) |
//! | `Bytes`      | u32 length, then the raw bytes (no terminator) |
//! | `OptionList` | u32 count of 32-bit words (two per pair), then `id`,`value` words in list order |
//!
//! Encoding validates the field values against the descriptor's signature
//! and computes every length prefix before a single byte is produced, so a
//! message is either built whole or not at all.
//!
//! The decoder is a reference implementation used by tests and by the server
//! handshake. It performs no semantic validation of field values.

use std::borrow::Cow;

use thiserror::Error;

use crate::protocol::catalog::{Catalog, MessageDescriptor};
use crate::protocol::types::{OptionId, OptionPair};

/// Size of the length prefix in front of every message body.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest message body the decoder accepts.
pub const MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;

/// Errors that can occur during field encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The number of values does not match the descriptor's signature.
    #[error("{message}: expected {expected} fields, got {found}")]
    ArityMismatch {
        message: &'static str,
        expected: usize,
        found: usize,
    },

    /// A value's type does not match the descriptor's signature.
    #[error("{message}: field {index} must be {expected:?}, got {found:?}")]
    TypeMismatch {
        message: &'static str,
        index: usize,
        expected: FieldType,
        found: FieldType,
    },

    /// A variable-length field does not fit its u32 length prefix.
    #[error("{message}: field {index} has {len} units; its length prefix holds at most {max}")]
    LengthOverflow {
        message: &'static str,
        index: usize,
        len: usize,
        max: u64,
    },

    /// The whole body does not fit the u32 frame length prefix.
    #[error("message body of {len} bytes does not fit the frame length prefix")]
    FrameOverflow { len: usize },

    /// The byte slice is shorter than the layout requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The body starts with an opcode the catalog does not know.
    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),

    /// The body does not start with the expected opcode.
    #[error("expected opcode {expected}")]
    OpcodeMismatch { expected: &'static str },

    /// Bytes remain after the last field of the message.
    #[error("{message}: {extra} unexpected trailing bytes")]
    TrailingBytes { message: &'static str, extra: usize },

    /// A frame announces a body larger than [`MAX_MESSAGE_LENGTH`].
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// An option list holds an odd number of 32-bit words.
    #[error("option list has an odd word count ({0})")]
    MalformedOptionList(u32),
}

impl CodecError {
    /// `true` for errors raised because a length does not fit its prefix.
    pub fn is_overflow(&self) -> bool {
        matches!(self, CodecError::LengthOverflow { .. } | CodecError::FrameOverflow { .. })
    }
}

// ── Field types and values ────────────────────────────────────────────────────

/// Wire type of one message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    U8,
    U16,
    U32,
    I32,
    Bytes,
    OptionList,
}

/// A field value ready to encode, or produced by the decoder.
///
/// Variable-length variants borrow on the encode path and own on the decode
/// path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    Bytes(Cow<'a, [u8]>),
    OptionList(Cow<'a, [OptionPair]>),
}

impl<'a> FieldValue<'a> {
    /// Borrows a byte blob.
    pub fn bytes(data: &'a [u8]) -> Self {
        FieldValue::Bytes(Cow::Borrowed(data))
    }

    /// Borrows an option list.
    pub fn options(pairs: &'a [OptionPair]) -> Self {
        FieldValue::OptionList(Cow::Borrowed(pairs))
    }

    /// The wire type of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::U8(_) => FieldType::U8,
            FieldValue::U16(_) => FieldType::U16,
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::Bytes(_) => FieldType::Bytes,
            FieldValue::OptionList(_) => FieldType::OptionList,
        }
    }

    /// Detaches the value from any borrowed buffer.
    pub fn into_owned(self) -> FieldValue<'static> {
        match self {
            FieldValue::U8(v) => FieldValue::U8(v),
            FieldValue::U16(v) => FieldValue::U16(v),
            FieldValue::U32(v) => FieldValue::U32(v),
            FieldValue::I32(v) => FieldValue::I32(v),
            FieldValue::Bytes(b) => FieldValue::Bytes(Cow::Owned(b.into_owned())),
            FieldValue::OptionList(o) => FieldValue::OptionList(Cow::Owned(o.into_owned())),
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            FieldValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            FieldValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            FieldValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    pub fn as_options(&self) -> Option<&[OptionPair]> {
        match self {
            FieldValue::OptionList(o) => Some(o.as_ref()),
            _ => None,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a message body (opcode and fields, no length prefix).
///
/// # Errors
///
/// Returns [`CodecError::ArityMismatch`] or [`CodecError::TypeMismatch`] when
/// `fields` does not follow `descriptor.signature`, and
/// [`CodecError::LengthOverflow`] when a blob or list is too long for its
/// prefix.
///
/// # Examples
///
/// ```rust
/// use leap_core::protocol::catalog::MOUSE_MOVE;
/// use leap_core::protocol::codec::{encode_message, FieldValue};
///
/// let body = encode_message(&MOUSE_MOVE, &[FieldValue::I32(10), FieldValue::I32(-5)]).unwrap();
/// assert_eq!(&body[..4], b"DMMV");
/// assert_eq!(&body[4..], &[0, 0, 0, 10, 0xFF, 0xFF, 0xFF, 0xFB]);
/// ```
pub fn encode_message(
    descriptor: &MessageDescriptor,
    fields: &[FieldValue<'_>],
) -> Result<Vec<u8>, CodecError> {
    let body_len = body_len(descriptor, fields)?;
    let mut buf = Vec::with_capacity(body_len);
    write_body(&mut buf, descriptor, fields);
    Ok(buf)
}

/// Encodes a complete frame: length prefix followed by the message body.
///
/// All validation happens before the buffer is filled.
///
/// # Errors
///
/// Everything [`encode_message`] returns, plus [`CodecError::FrameOverflow`]
/// when the body is longer than `u32::MAX`.
pub fn encode_frame(
    descriptor: &MessageDescriptor,
    fields: &[FieldValue<'_>],
) -> Result<Vec<u8>, CodecError> {
    let body_len = body_len(descriptor, fields)?;
    let prefix = frame_prefix(body_len)?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + body_len);
    buf.extend_from_slice(&prefix.to_be_bytes());
    write_body(&mut buf, descriptor, fields);
    debug_assert_eq!(buf.len(), FRAME_HEADER_SIZE + body_len);
    Ok(buf)
}

/// Frames a pre-formatted body without consulting any descriptor.
///
/// # Errors
///
/// Returns [`CodecError::FrameOverflow`] when `body` is longer than `u32::MAX`.
pub fn frame_raw(body: &[u8]) -> Result<Vec<u8>, CodecError> {
    let prefix = frame_prefix(body.len())?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.extend_from_slice(&prefix.to_be_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Splits one frame off the front of `bytes`.
///
/// Returns the body and the total number of bytes consumed (prefix + body),
/// so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`CodecError::InsufficientData`] for a truncated frame and
/// [`CodecError::FrameTooLarge`] when the prefix exceeds [`MAX_MESSAGE_LENGTH`].
pub fn split_frame(bytes: &[u8]) -> Result<(&[u8], usize), CodecError> {
    let len = read_u32(bytes, 0)? as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_MESSAGE_LENGTH,
        });
    }
    let total = FRAME_HEADER_SIZE + len;
    require_len(bytes, total)?;
    Ok((&bytes[FRAME_HEADER_SIZE..total], total))
}

/// A body decoded against a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub descriptor: &'static MessageDescriptor,
    pub fields: Vec<FieldValue<'static>>,
}

/// Decodes a message body, resolving its opcode through `catalog`.
///
/// # Errors
///
/// Returns [`CodecError::UnknownOpcode`] when no descriptor matches, and any
/// field-level decode error.
///
/// # Examples
///
/// ```rust
/// use leap_core::protocol::catalog::{Dialect, KEEP_ALIVE};
/// use leap_core::protocol::codec::decode_message;
///
/// let decoded = decode_message(Dialect::V1_6.catalog(), b"CALV").unwrap();
/// assert_eq!(decoded.descriptor, &KEEP_ALIVE);
/// assert!(decoded.fields.is_empty());
/// ```
pub fn decode_message(catalog: &Catalog, body: &[u8]) -> Result<DecodedMessage, CodecError> {
    let descriptor = catalog.lookup(body).ok_or_else(|| {
        let tag = &body[..body.len().min(4)];
        CodecError::UnknownOpcode(String::from_utf8_lossy(tag).into_owned())
    })?;
    let fields = decode_with(descriptor, body)?;
    Ok(DecodedMessage { descriptor, fields })
}

/// Decodes a body that is expected to carry `descriptor`'s message.
///
/// # Errors
///
/// Returns [`CodecError::OpcodeMismatch`] when the opcode differs,
/// [`CodecError::TrailingBytes`] when the fields do not consume the whole
/// body, and any field-level decode error.
pub fn decode_with(
    descriptor: &MessageDescriptor,
    body: &[u8],
) -> Result<Vec<FieldValue<'static>>, CodecError> {
    if !descriptor.matches(body) {
        return Err(CodecError::OpcodeMismatch {
            expected: descriptor.opcode,
        });
    }
    let start = descriptor.opcode.len();
    let (fields, end) = decode_fields(descriptor.signature, body, start)?;
    if end != body.len() {
        return Err(CodecError::TrailingBytes {
            message: descriptor.name,
            extra: body.len() - end,
        });
    }
    Ok(fields)
}

/// Decodes fields following `signature` starting at `offset`.
///
/// Returns the values and the offset of the byte after the last field.
///
/// # Errors
///
/// Returns [`CodecError::InsufficientData`] when `buf` ends early and
/// [`CodecError::MalformedOptionList`] for an odd option word count.
pub fn decode_fields(
    signature: &[FieldType],
    buf: &[u8],
    offset: usize,
) -> Result<(Vec<FieldValue<'static>>, usize), CodecError> {
    let mut fields = Vec::with_capacity(signature.len());
    let mut off = offset;
    for field_type in signature {
        let (value, next) = decode_field(*field_type, buf, off)?;
        fields.push(value);
        off = next;
    }
    Ok((fields, off))
}

// ── Encoding internals ────────────────────────────────────────────────────────

/// Validates `fields` against the signature and returns the body length.
fn body_len(descriptor: &MessageDescriptor, fields: &[FieldValue<'_>]) -> Result<usize, CodecError> {
    let signature = descriptor.signature;
    if fields.len() != signature.len() {
        return Err(CodecError::ArityMismatch {
            message: descriptor.name,
            expected: signature.len(),
            found: fields.len(),
        });
    }

    let mut total = descriptor.opcode.len();
    for (index, (expected, value)) in signature.iter().zip(fields).enumerate() {
        let found = value.field_type();
        if found != *expected {
            return Err(CodecError::TypeMismatch {
                message: descriptor.name,
                index,
                expected: *expected,
                found,
            });
        }
        let len = encoded_len(value).ok_or_else(|| CodecError::LengthOverflow {
            message: descriptor.name,
            index,
            len: unit_count(value),
            max: u64::from(u32::MAX),
        })?;
        total = total
            .checked_add(len)
            .ok_or(CodecError::FrameOverflow { len: usize::MAX })?;
    }
    Ok(total)
}

/// Encoded size of one value, or `None` if its length prefix would overflow.
fn encoded_len(value: &FieldValue<'_>) -> Option<usize> {
    match value {
        FieldValue::U8(_) => Some(1),
        FieldValue::U16(_) => Some(2),
        FieldValue::U32(_) | FieldValue::I32(_) => Some(4),
        FieldValue::Bytes(b) => {
            length_prefix(b.len())?;
            4usize.checked_add(b.len())
        }
        FieldValue::OptionList(o) => {
            let words = option_word_count(o.len())?;
            (words as usize).checked_mul(4)?.checked_add(4)
        }
    }
}

/// Number of length-prefixed units a variable-length value carries.
fn unit_count(value: &FieldValue<'_>) -> usize {
    match value {
        FieldValue::Bytes(b) => b.len(),
        FieldValue::OptionList(o) => o.len().saturating_mul(2),
        _ => 0,
    }
}

/// The u32 length prefix for a blob of `len` bytes, if it fits.
fn length_prefix(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

/// The u32 word count for an option list of `pairs` entries, if it fits.
fn option_word_count(pairs: usize) -> Option<u32> {
    pairs.checked_mul(2).and_then(length_prefix)
}

fn frame_prefix(body_len: usize) -> Result<u32, CodecError> {
    length_prefix(body_len).ok_or(CodecError::FrameOverflow { len: body_len })
}

/// Writes opcode and fields. Callers must have validated them with [`body_len`].
fn write_body(buf: &mut Vec<u8>, descriptor: &MessageDescriptor, fields: &[FieldValue<'_>]) {
    buf.extend_from_slice(descriptor.opcode.as_bytes());
    for value in fields {
        write_field(buf, value);
    }
}

fn write_field(buf: &mut Vec<u8>, value: &FieldValue<'_>) {
    match value {
        FieldValue::U8(v) => buf.push(*v),
        FieldValue::U16(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::U32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::I32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Bytes(b) => {
            buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
            buf.extend_from_slice(b);
        }
        FieldValue::OptionList(pairs) => {
            let words = (pairs.len() * 2) as u32;
            buf.extend_from_slice(&words.to_be_bytes());
            for pair in pairs.iter() {
                buf.extend_from_slice(&pair.id.0.to_be_bytes());
                buf.extend_from_slice(&pair.value.to_be_bytes());
            }
        }
    }
}

// ── Decoding internals ────────────────────────────────────────────────────────

fn decode_field(
    field_type: FieldType,
    buf: &[u8],
    off: usize,
) -> Result<(FieldValue<'static>, usize), CodecError> {
    match field_type {
        FieldType::U8 => {
            require_len(buf, off + 1)?;
            Ok((FieldValue::U8(buf[off]), off + 1))
        }
        FieldType::U16 => {
            require_len(buf, off + 2)?;
            let v = u16::from_be_bytes([buf[off], buf[off + 1]]);
            Ok((FieldValue::U16(v), off + 2))
        }
        FieldType::U32 => Ok((FieldValue::U32(read_u32(buf, off)?), off + 4)),
        FieldType::I32 => Ok((FieldValue::I32(read_u32(buf, off)? as i32), off + 4)),
        FieldType::Bytes => {
            let len = read_u32(buf, off)? as usize;
            let start = off + 4;
            require_len(buf, start + len)?;
            let data = buf[start..start + len].to_vec();
            Ok((FieldValue::Bytes(Cow::Owned(data)), start + len))
        }
        FieldType::OptionList => {
            let words = read_u32(buf, off)?;
            if words % 2 != 0 {
                return Err(CodecError::MalformedOptionList(words));
            }
            let mut pos = off + 4;
            require_len(buf, pos + words as usize * 4)?;
            let mut pairs = Vec::with_capacity(words as usize / 2);
            for _ in 0..words / 2 {
                let id = OptionId(read_u32(buf, pos)?);
                let value = read_u32(buf, pos + 4)? as i32;
                pairs.push(OptionPair::new(id, value));
                pos += 8;
            }
            Ok((FieldValue::OptionList(Cow::Owned(pairs)), pos))
        }
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        Err(CodecError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, CodecError> {
    require_len(buf, offset + 4)?;
    Ok(u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
