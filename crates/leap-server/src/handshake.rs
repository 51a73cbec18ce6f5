//! Hello exchange and protocol version negotiation.
//!
//! ```text
//! server                                   peer
//!   │── HELLO  "Barrier" major minor ───────►│
//!   │◄─ HELLO_BACK "Barrier" major minor name│
//!   │                                        │
//!   │  common = min(ours, peer)              │
//!   │  unsupported → EICV, then fail         │
//! ```
//!
//! The exchange runs on a blocking stream before the connection encoder is
//! created; the negotiated [`Dialect`] selects the encoder's catalog.

use std::io::{self, Read, Write};

use leap_core::protocol::catalog::{HELLO, HELLO_BACK};
use leap_core::protocol::codec::{self, CodecError, FieldValue, FRAME_HEADER_SIZE, MAX_MESSAGE_LENGTH};
use leap_core::{CloseReason, Dialect, ProtocolVersion};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while greeting a peer.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),

    #[error("malformed handshake message: {0}")]
    Codec(#[from] CodecError),

    #[error("peer speaks protocol {peer}, server speaks {ours}")]
    Incompatible {
        ours: ProtocolVersion,
        peer: ProtocolVersion,
    },

    #[error("peer screen name is not valid UTF-8")]
    InvalidName,

    #[error("peer did not answer the hello in time")]
    TimedOut,
}

/// Maps a read-deadline expiry to [`HandshakeError::TimedOut`].
fn read_error(e: io::Error) -> HandshakeError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => HandshakeError::TimedOut,
        _ => HandshakeError::Io(e),
    }
}

/// Result of a successful hello exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Screen name the peer announced.
    pub peer_name: String,
    /// Version the peer announced.
    pub peer_version: ProtocolVersion,
    pub dialect: Dialect,
}

/// Reads one length-prefixed frame and returns its body.
///
/// # Errors
///
/// Returns [`HandshakeError::Io`] on a short read, [`HandshakeError::TimedOut`]
/// when the reader's deadline expires, and
/// [`HandshakeError::Codec`] with [`CodecError::FrameTooLarge`] when the prefix
/// exceeds [`MAX_MESSAGE_LENGTH`].
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, HandshakeError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header).map_err(read_error)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_MESSAGE_LENGTH,
        }
        .into());
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(read_error)?;
    Ok(body)
}

/// Greets the peer and settles the dialect.
///
/// Sends HELLO with `ours`, waits for HELLO_BACK and picks the dialect for
/// the lower of the two versions. An incompatible peer is told so with an
/// EICV message before the error is returned.
///
/// # Errors
///
/// See [`HandshakeError`].
pub fn negotiate<S: Read + Write>(
    stream: &mut S,
    ours: ProtocolVersion,
) -> Result<Negotiated, HandshakeError> {
    let hello = codec::encode_frame(&HELLO, &[FieldValue::U16(ours.major), FieldValue::U16(ours.minor)])?;
    stream.write_all(&hello)?;
    stream.flush()?;
    debug!(version = %ours, "hello sent");

    let body = read_frame(stream)?;
    let fields = codec::decode_with(&HELLO_BACK, &body)?;
    let (major, minor, name) = match fields.as_slice() {
        [FieldValue::U16(major), FieldValue::U16(minor), FieldValue::Bytes(name)] => {
            (*major, *minor, name.to_vec())
        }
        _ => {
            return Err(CodecError::ArityMismatch {
                message: HELLO_BACK.name,
                expected: HELLO_BACK.signature.len(),
                found: fields.len(),
            }
            .into())
        }
    };
    let peer_version = ProtocolVersion::new(major, minor);
    let peer_name = String::from_utf8(name).map_err(|_| HandshakeError::InvalidName)?;

    match Dialect::negotiate(ours, peer_version) {
        Some(dialect) => {
            info!(peer = %peer_name, peer_version = %peer_version, %dialect, "handshake complete");
            Ok(Negotiated {
                peer_name,
                peer_version,
                dialect,
            })
        }
        None => {
            warn!(peer = %peer_name, peer_version = %peer_version, "incompatible protocol version");
            let reject = codec::frame_raw(&CloseReason::Incompatible(ours).message())?;
            stream.write_all(&reject)?;
            stream.flush()?;
            Err(HandshakeError::Incompatible {
                ours,
                peer: peer_version,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex: reads from a script, records writes.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn hello_back(major: u16, minor: u16, name: &[u8]) -> Vec<u8> {
        codec::encode_frame(
            &HELLO_BACK,
            &[FieldValue::U16(major), FieldValue::U16(minor), FieldValue::bytes(name)],
        )
        .expect("encode hello back")
    }

    #[test]
    fn test_negotiate_same_version_selects_v1_6() {
        // Arrange
        let mut duplex = Duplex::new(hello_back(1, 6, b"laptop"));

        // Act
        let negotiated = negotiate(&mut duplex, ProtocolVersion::CURRENT).expect("negotiate");

        // Assert
        assert_eq!(
            negotiated,
            Negotiated {
                peer_name: "laptop".to_string(),
                peer_version: ProtocolVersion::new(1, 6),
                dialect: Dialect::V1_6,
            }
        );
        assert_eq!(duplex.output, b"\x00\x00\x00\x0BBarrier\x00\x01\x00\x06");
    }

    #[test]
    fn test_negotiate_older_peer_selects_v1_3() {
        let mut duplex = Duplex::new(hello_back(1, 4, b"old"));

        let negotiated = negotiate(&mut duplex, ProtocolVersion::CURRENT).expect("negotiate");

        assert_eq!(negotiated.dialect, Dialect::V1_3);
    }

    #[test]
    fn test_negotiate_incompatible_peer_writes_eicv() {
        // Arrange
        let mut duplex = Duplex::new(hello_back(1, 2, b"ancient"));

        // Act
        let result = negotiate(&mut duplex, ProtocolVersion::CURRENT);

        // Assert
        assert!(matches!(result, Err(HandshakeError::Incompatible { .. })));
        let hello_len = FRAME_HEADER_SIZE + 11;
        assert_eq!(&duplex.output[hello_len..], b"\x00\x00\x00\x08EICV\x00\x01\x00\x06");
    }

    #[test]
    fn test_negotiate_rejects_non_utf8_name() {
        let mut duplex = Duplex::new(hello_back(1, 6, &[0xFF, 0xFE]));
        let result = negotiate(&mut duplex, ProtocolVersion::CURRENT);
        assert!(matches!(result, Err(HandshakeError::InvalidName)));
    }

    #[test]
    fn test_negotiate_peer_hangup_is_io_error() {
        let mut duplex = Duplex::new(Vec::new());
        let result = negotiate(&mut duplex, ProtocolVersion::CURRENT);
        assert!(matches!(result, Err(HandshakeError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_negotiate_wrong_reply_is_codec_error() {
        let mut duplex = Duplex::new(b"\x00\x00\x00\x04CALV".to_vec());
        let result = negotiate(&mut duplex, ProtocolVersion::CURRENT);
        assert!(matches!(result, Err(HandshakeError::Codec(CodecError::OpcodeMismatch { .. }))));
    }

    #[test]
    fn test_read_frame_rejects_oversized_prefix() {
        let mut reader = Cursor::new(vec![0x7F, 0xFF, 0xFF, 0xFF]);
        let result = read_frame(&mut reader);
        assert!(matches!(result, Err(HandshakeError::Codec(CodecError::FrameTooLarge { .. }))));
    }

    /// Reader whose deadline has already passed.
    struct Expired;

    impl Read for Expired {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "deadline"))
        }
    }

    #[test]
    fn test_read_frame_deadline_is_timed_out() {
        let result = read_frame(&mut Expired);
        assert!(matches!(result, Err(HandshakeError::TimedOut)));
    }

    #[test]
    fn test_read_frame_returns_body() {
        let mut reader = Cursor::new(b"\x00\x00\x00\x04DINFrest".to_vec());
        assert_eq!(read_frame(&mut reader).expect("read"), b"DINF");
    }
}
