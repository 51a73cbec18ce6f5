//! The message catalog: opcode tags and field signatures per protocol dialect.
//!
//! Every message the server can send is described by a static
//! [`MessageDescriptor`]. Descriptors are grouped into one [`Catalog`] per
//! [`Dialect`]; a connection picks its catalog once, when the protocol
//! version has been negotiated, and from then on every send resolves to a
//! fixed descriptor through a named field. Nothing is looked up by string on
//! the send path.
//!
//! A new protocol version adds new descriptors and a new catalog. Existing
//! descriptors are never edited: an old peer must keep receiving exactly the
//! bytes it was built for.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::{self, FieldType, FieldValue};

// ── Protocol version ──────────────────────────────────────────────────────────

/// A `major.minor` protocol version as exchanged in the hello handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Newest version this implementation speaks.
    pub const CURRENT: ProtocolVersion = ProtocolVersion::new(1, 6);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error returned when a version string is not `major.minor`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid protocol version {0:?}; expected \"major.minor\"")]
pub struct ParseVersionError(String);

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| ParseVersionError(s.to_string()))?;
        let major = major.parse().map_err(|_| ParseVersionError(s.to_string()))?;
        let minor = minor.parse().map_err(|_| ParseVersionError(s.to_string()))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = ParseVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(v: ProtocolVersion) -> Self {
        v.to_string()
    }
}

// ── Descriptors ───────────────────────────────────────────────────────────────

/// Static description of one message shape.
#[derive(Debug, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Human-readable message name used in logs and errors.
    pub name: &'static str,
    /// ASCII opcode tag written first on the wire.
    pub opcode: &'static str,
    /// Field types in wire order.
    pub signature: &'static [FieldType],
    /// First protocol version that carries this message shape.
    pub since: ProtocolVersion,
}

impl MessageDescriptor {
    /// Returns `true` when `body` starts with this descriptor's opcode.
    pub fn matches(&self, body: &[u8]) -> bool {
        body.starts_with(self.opcode.as_bytes())
    }
}

const V1_0: ProtocolVersion = ProtocolVersion::new(1, 0);
const V1_1: ProtocolVersion = ProtocolVersion::new(1, 1);
const V1_2: ProtocolVersion = ProtocolVersion::new(1, 2);
const V1_3: ProtocolVersion = ProtocolVersion::new(1, 3);
const V1_5: ProtocolVersion = ProtocolVersion::new(1, 5);

use FieldType::{Bytes, OptionList, I32, U16, U32, U8};

pub static QUERY_INFO: MessageDescriptor = MessageDescriptor {
    name: "query info",
    opcode: "QINF",
    signature: &[],
    since: V1_0,
};

/// `x_abs`, `y_abs`, `seq_num`, `mask`.
pub static ENTER: MessageDescriptor = MessageDescriptor {
    name: "enter",
    opcode: "CINN",
    signature: &[I32, I32, U32, U32],
    since: V1_0,
};

pub static LEAVE: MessageDescriptor = MessageDescriptor {
    name: "leave",
    opcode: "COUT",
    signature: &[],
    since: V1_0,
};

/// `key`, `mask`, `button`.
pub static KEY_DOWN: MessageDescriptor = MessageDescriptor {
    name: "key down",
    opcode: "DKDN",
    signature: &[U32, U32, U16],
    since: V1_1,
};

/// `key`, `mask`, `button`.
pub static KEY_UP: MessageDescriptor = MessageDescriptor {
    name: "key up",
    opcode: "DKUP",
    signature: &[U32, U32, U16],
    since: V1_1,
};

/// `key`, `mask`, `count`, `button`.
pub static KEY_REPEAT: MessageDescriptor = MessageDescriptor {
    name: "key repeat",
    opcode: "DKRP",
    signature: &[U32, U32, I32, U16],
    since: V1_1,
};

pub static MOUSE_DOWN: MessageDescriptor = MessageDescriptor {
    name: "mouse down",
    opcode: "DMDN",
    signature: &[U8],
    since: V1_0,
};

pub static MOUSE_UP: MessageDescriptor = MessageDescriptor {
    name: "mouse up",
    opcode: "DMUP",
    signature: &[U8],
    since: V1_0,
};

pub static MOUSE_MOVE: MessageDescriptor = MessageDescriptor {
    name: "mouse move",
    opcode: "DMMV",
    signature: &[I32, I32],
    since: V1_0,
};

pub static MOUSE_RELATIVE_MOVE: MessageDescriptor = MessageDescriptor {
    name: "mouse relative move",
    opcode: "DMRM",
    signature: &[I32, I32],
    since: V1_2,
};

/// `x_delta`, `y_delta`.
pub static MOUSE_WHEEL: MessageDescriptor = MessageDescriptor {
    name: "mouse wheel",
    opcode: "DMWM",
    signature: &[I32, I32],
    since: V1_3,
};

/// `file_count`, opaque file-list blob.
pub static DRAG_INFO: MessageDescriptor = MessageDescriptor {
    name: "drag info",
    opcode: "DDRG",
    signature: &[U32, Bytes],
    since: V1_5,
};

/// `on` as 0 or 1.
pub static SCREENSAVER: MessageDescriptor = MessageDescriptor {
    name: "screensaver",
    opcode: "CSEC",
    signature: &[U8],
    since: V1_0,
};

pub static RESET_OPTIONS: MessageDescriptor = MessageDescriptor {
    name: "reset options",
    opcode: "CROP",
    signature: &[],
    since: V1_1,
};

pub static SET_OPTIONS: MessageDescriptor = MessageDescriptor {
    name: "set options",
    opcode: "DSOP",
    signature: &[OptionList],
    since: V1_1,
};

pub static INFO_ACK: MessageDescriptor = MessageDescriptor {
    name: "info ack",
    opcode: "CIAK",
    signature: &[],
    since: V1_1,
};

pub static KEEP_ALIVE: MessageDescriptor = MessageDescriptor {
    name: "keep alive",
    opcode: "CALV",
    signature: &[],
    since: V1_3,
};

/// `clipboard_id`, reserved sequence number (always 0).
pub static GRAB_CLIPBOARD: MessageDescriptor = MessageDescriptor {
    name: "grab clipboard",
    opcode: "CCLP",
    signature: &[U8, U32],
    since: V1_0,
};

// ── Handshake and close messages (outside the dialect tables) ─────────────────

/// Server hello: `major`, `minor`.
pub static HELLO: MessageDescriptor = MessageDescriptor {
    name: "hello",
    opcode: "Barrier",
    signature: &[U16, U16],
    since: V1_0,
};

/// Client reply to [`HELLO`]: `major`, `minor`, screen name.
pub static HELLO_BACK: MessageDescriptor = MessageDescriptor {
    name: "hello back",
    opcode: "Barrier",
    signature: &[U16, U16, Bytes],
    since: V1_0,
};

pub static CLOSE: MessageDescriptor = MessageDescriptor {
    name: "close",
    opcode: "CBYE",
    signature: &[],
    since: V1_0,
};

/// Server's `major`, `minor`.
pub static INCOMPATIBLE: MessageDescriptor = MessageDescriptor {
    name: "incompatible version",
    opcode: "EICV",
    signature: &[U16, U16],
    since: V1_0,
};

pub static BUSY: MessageDescriptor = MessageDescriptor {
    name: "server busy",
    opcode: "EBSY",
    signature: &[],
    since: V1_0,
};

pub static UNKNOWN_CLIENT: MessageDescriptor = MessageDescriptor {
    name: "unknown client",
    opcode: "EUNK",
    signature: &[],
    since: V1_0,
};

pub static PROTOCOL_ERROR: MessageDescriptor = MessageDescriptor {
    name: "protocol error",
    opcode: "EBAD",
    signature: &[],
    since: V1_0,
};

/// Pre-formatted messages a session hands to `send_close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly shutdown.
    Bye,
    /// The peer speaks a version this server cannot serve; carries ours.
    Incompatible(ProtocolVersion),
    /// A peer with the same name is already connected.
    Busy,
    /// The peer's screen name is not in the configuration.
    UnknownClient,
    /// The peer violated the protocol.
    ProtocolError,
}

impl CloseReason {
    /// Message body (opcode and fields, no length prefix).
    pub fn message(&self) -> Vec<u8> {
        let encoded = match self {
            CloseReason::Bye => codec::encode_message(&CLOSE, &[]),
            CloseReason::Incompatible(v) => codec::encode_message(
                &INCOMPATIBLE,
                &[FieldValue::U16(v.major), FieldValue::U16(v.minor)],
            ),
            CloseReason::Busy => codec::encode_message(&BUSY, &[]),
            CloseReason::UnknownClient => codec::encode_message(&UNKNOWN_CLIENT, &[]),
            CloseReason::ProtocolError => codec::encode_message(&PROTOCOL_ERROR, &[]),
        };
        // Fixed-size signatures with matching fields cannot fail to encode.
        encoded.unwrap_or_default()
    }
}

// ── Dialects ──────────────────────────────────────────────────────────────────

/// The closed set of message dialects this encoder can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Peers speaking 1.3 through 1.5: everything except drag info.
    V1_3,
    /// Peers speaking 1.6 or later.
    V1_6,
}

impl Dialect {
    /// The catalog for this dialect.
    pub fn catalog(self) -> &'static Catalog {
        match self {
            Dialect::V1_3 => &CATALOG_1_3,
            Dialect::V1_6 => &CATALOG_1_6,
        }
    }

    /// The version this server announces when it speaks this dialect.
    pub fn version(self) -> ProtocolVersion {
        match self {
            Dialect::V1_3 => V1_3,
            Dialect::V1_6 => ProtocolVersion::new(1, 6),
        }
    }

    /// Picks the dialect for a connection where we speak `ours` and the peer
    /// answered with `peer`.
    ///
    /// Returns `None` when the majors differ or the common version predates
    /// 1.3 (no keep-alive, single-axis wheel).
    pub fn negotiate(ours: ProtocolVersion, peer: ProtocolVersion) -> Option<Dialect> {
        if ours.major != peer.major {
            return None;
        }
        let common = ours.min(peer);
        match (common.major, common.minor) {
            (1, minor) if minor >= 6 => Some(Dialect::V1_6),
            (1, minor) if minor >= 3 => Some(Dialect::V1_3),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version())
    }
}

// ── Catalogs ──────────────────────────────────────────────────────────────────

/// One descriptor slot per semantic message. `None` means the dialect does
/// not carry that message.
#[derive(Debug)]
pub struct Catalog {
    pub dialect: Dialect,
    pub query_info: &'static MessageDescriptor,
    pub enter: &'static MessageDescriptor,
    pub leave: &'static MessageDescriptor,
    pub key_down: &'static MessageDescriptor,
    pub key_up: &'static MessageDescriptor,
    pub key_repeat: &'static MessageDescriptor,
    pub mouse_down: &'static MessageDescriptor,
    pub mouse_up: &'static MessageDescriptor,
    pub mouse_move: &'static MessageDescriptor,
    pub mouse_relative_move: &'static MessageDescriptor,
    pub mouse_wheel: &'static MessageDescriptor,
    pub drag_info: Option<&'static MessageDescriptor>,
    pub screensaver: &'static MessageDescriptor,
    pub reset_options: &'static MessageDescriptor,
    pub set_options: &'static MessageDescriptor,
    pub info_ack: &'static MessageDescriptor,
    pub keep_alive: &'static MessageDescriptor,
    pub grab_clipboard: &'static MessageDescriptor,
}

impl Catalog {
    /// Every descriptor this dialect carries.
    pub fn entries(&self) -> impl Iterator<Item = &'static MessageDescriptor> {
        [
            Some(self.query_info),
            Some(self.enter),
            Some(self.leave),
            Some(self.key_down),
            Some(self.key_up),
            Some(self.key_repeat),
            Some(self.mouse_down),
            Some(self.mouse_up),
            Some(self.mouse_move),
            Some(self.mouse_relative_move),
            Some(self.mouse_wheel),
            self.drag_info,
            Some(self.screensaver),
            Some(self.reset_options),
            Some(self.set_options),
            Some(self.info_ack),
            Some(self.keep_alive),
            Some(self.grab_clipboard),
        ]
        .into_iter()
        .flatten()
    }

    /// Finds the descriptor whose opcode starts `body`.
    pub fn lookup(&self, body: &[u8]) -> Option<&'static MessageDescriptor> {
        self.entries().find(|d| d.matches(body))
    }
}

pub static CATALOG_1_3: Catalog = Catalog {
    dialect: Dialect::V1_3,
    query_info: &QUERY_INFO,
    enter: &ENTER,
    leave: &LEAVE,
    key_down: &KEY_DOWN,
    key_up: &KEY_UP,
    key_repeat: &KEY_REPEAT,
    mouse_down: &MOUSE_DOWN,
    mouse_up: &MOUSE_UP,
    mouse_move: &MOUSE_MOVE,
    mouse_relative_move: &MOUSE_RELATIVE_MOVE,
    mouse_wheel: &MOUSE_WHEEL,
    drag_info: None,
    screensaver: &SCREENSAVER,
    reset_options: &RESET_OPTIONS,
    set_options: &SET_OPTIONS,
    info_ack: &INFO_ACK,
    keep_alive: &KEEP_ALIVE,
    grab_clipboard: &GRAB_CLIPBOARD,
};

pub static CATALOG_1_6: Catalog = Catalog {
    dialect: Dialect::V1_6,
    query_info: &QUERY_INFO,
    enter: &ENTER,
    leave: &LEAVE,
    key_down: &KEY_DOWN,
    key_up: &KEY_UP,
    key_repeat: &KEY_REPEAT,
    mouse_down: &MOUSE_DOWN,
    mouse_up: &MOUSE_UP,
    mouse_move: &MOUSE_MOVE,
    mouse_relative_move: &MOUSE_RELATIVE_MOVE,
    mouse_wheel: &MOUSE_WHEEL,
    drag_info: Some(&DRAG_INFO),
    screensaver: &SCREENSAVER,
    reset_options: &RESET_OPTIONS,
    set_options: &SET_OPTIONS,
    info_ack: &INFO_ACK,
    keep_alive: &KEEP_ALIVE,
    grab_clipboard: &GRAB_CLIPBOARD,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Pins the 1.6 wire contract. Changing any row breaks deployed peers.
    #[test]
    fn test_catalog_1_6_opcodes_and_signatures_are_pinned() {
        let c = Dialect::V1_6.catalog();
        let expected: &[(&MessageDescriptor, &str, &[FieldType])] = &[
            (c.query_info, "QINF", &[]),
            (c.enter, "CINN", &[I32, I32, U32, U32]),
            (c.leave, "COUT", &[]),
            (c.key_down, "DKDN", &[U32, U32, U16]),
            (c.key_up, "DKUP", &[U32, U32, U16]),
            (c.key_repeat, "DKRP", &[U32, U32, I32, U16]),
            (c.mouse_down, "DMDN", &[U8]),
            (c.mouse_up, "DMUP", &[U8]),
            (c.mouse_move, "DMMV", &[I32, I32]),
            (c.mouse_relative_move, "DMRM", &[I32, I32]),
            (c.mouse_wheel, "DMWM", &[I32, I32]),
            (c.screensaver, "CSEC", &[U8]),
            (c.reset_options, "CROP", &[]),
            (c.set_options, "DSOP", &[OptionList]),
            (c.info_ack, "CIAK", &[]),
            (c.keep_alive, "CALV", &[]),
            (c.grab_clipboard, "CCLP", &[U8, U32]),
        ];
        for (descriptor, opcode, signature) in expected {
            assert_eq!(descriptor.opcode, *opcode, "{}", descriptor.name);
            assert_eq!(descriptor.signature, *signature, "{}", descriptor.name);
        }
        let drag = c.drag_info.expect("1.6 carries drag info");
        assert_eq!(drag.opcode, "DDRG");
        assert_eq!(drag.signature, &[U32, Bytes]);
    }

    #[test]
    fn test_catalog_opcodes_are_unique_and_four_bytes() {
        for dialect in [Dialect::V1_3, Dialect::V1_6] {
            let mut seen = HashSet::new();
            for d in dialect.catalog().entries() {
                assert_eq!(d.opcode.len(), 4, "{}", d.name);
                assert!(seen.insert(d.opcode), "duplicate opcode {}", d.opcode);
            }
        }
    }

    #[test]
    fn test_catalog_entries_never_newer_than_dialect() {
        for dialect in [Dialect::V1_3, Dialect::V1_6] {
            for d in dialect.catalog().entries() {
                assert!(
                    d.since <= dialect.version(),
                    "{} (since {}) listed in dialect {}",
                    d.name,
                    d.since,
                    dialect
                );
            }
        }
    }

    #[test]
    fn test_catalog_1_3_lacks_drag_info() {
        assert!(Dialect::V1_3.catalog().drag_info.is_none());
        assert_eq!(Dialect::V1_3.catalog().entries().count(), 17);
        assert_eq!(Dialect::V1_6.catalog().entries().count(), 18);
    }

    #[test]
    fn test_catalog_lookup_finds_descriptor_by_opcode() {
        let c = Dialect::V1_6.catalog();
        assert_eq!(c.lookup(b"DMMV\0\0\0\x01\0\0\0\x02"), Some(&MOUSE_MOVE));
        assert_eq!(c.lookup(b"ZZZZ"), None);
        assert_eq!(Dialect::V1_3.catalog().lookup(b"DDRG"), None);
    }

    #[test]
    fn test_dialect_catalog_reports_its_dialect() {
        assert_eq!(Dialect::V1_3.catalog().dialect, Dialect::V1_3);
        assert_eq!(Dialect::V1_6.catalog().dialect, Dialect::V1_6);
    }

    // ── Negotiation ───────────────────────────────────────────────────────────

    #[test]
    fn test_negotiate_same_version_is_v1_6() {
        let v = ProtocolVersion::CURRENT;
        assert_eq!(Dialect::negotiate(v, v), Some(Dialect::V1_6));
    }

    #[test]
    fn test_negotiate_newer_peer_falls_back_to_ours() {
        let peer = ProtocolVersion::new(1, 8);
        assert_eq!(Dialect::negotiate(ProtocolVersion::CURRENT, peer), Some(Dialect::V1_6));
    }

    #[test]
    fn test_negotiate_older_peer_selects_v1_3() {
        for minor in 3..=5 {
            let peer = ProtocolVersion::new(1, minor);
            assert_eq!(
                Dialect::negotiate(ProtocolVersion::CURRENT, peer),
                Some(Dialect::V1_3),
                "peer 1.{minor}"
            );
        }
    }

    #[test]
    fn test_negotiate_rejects_ancient_or_foreign_major() {
        assert_eq!(Dialect::negotiate(ProtocolVersion::CURRENT, ProtocolVersion::new(1, 2)), None);
        assert_eq!(Dialect::negotiate(ProtocolVersion::CURRENT, ProtocolVersion::new(2, 0)), None);
    }

    // ── ProtocolVersion ───────────────────────────────────────────────────────

    #[test]
    fn test_protocol_version_parses_and_displays() {
        let v: ProtocolVersion = "1.6".parse().expect("valid version");
        assert_eq!(v, ProtocolVersion::new(1, 6));
        assert_eq!(v.to_string(), "1.6");
    }

    #[test]
    fn test_protocol_version_rejects_garbage() {
        assert!("1".parse::<ProtocolVersion>().is_err());
        assert!("one.six".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_protocol_version_orders_by_major_then_minor() {
        assert!(ProtocolVersion::new(1, 6) > ProtocolVersion::new(1, 3));
        assert!(ProtocolVersion::new(2, 0) > ProtocolVersion::new(1, 9));
    }

    // ── Close reasons ─────────────────────────────────────────────────────────

    #[test]
    fn test_close_reason_messages() {
        assert_eq!(CloseReason::Bye.message(), b"CBYE");
        assert_eq!(CloseReason::Busy.message(), b"EBSY");
        assert_eq!(CloseReason::UnknownClient.message(), b"EUNK");
        assert_eq!(CloseReason::ProtocolError.message(), b"EBAD");
        assert_eq!(
            CloseReason::Incompatible(ProtocolVersion::new(1, 6)).message(),
            b"EICV\x00\x01\x00\x06"
        );
    }
}
