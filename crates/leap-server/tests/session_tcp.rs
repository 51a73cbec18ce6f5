//! End-to-end session tests over loopback TCP.
//!
//! A scripted peer performs the hello exchange and reads what the server
//! sends, exercising handshake, admission, session start and keep-alive
//! together.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use leap_core::protocol::catalog::{HELLO, HELLO_BACK};
use leap_core::protocol::codec::{decode_message, decode_with, encode_frame, FieldValue};
use leap_core::{CloseReason, Dialect};
use leap_server::config::ServerConfig;
use leap_server::handshake::{read_frame, HandshakeError};
use leap_server::session::{serve_peer, PeerRegistry, SessionError};

fn test_config() -> ServerConfig {
    let mut cfg = ServerConfig::default();
    cfg.server.keep_alive_ms = 5;
    cfg
}

/// Starts `serve_peer` for one connection and returns the peer's socket.
fn spawn_server(
    config: ServerConfig,
    registry: Arc<PeerRegistry>,
    stop: Arc<AtomicBool>,
) -> (TcpStream, thread::JoinHandle<Result<(), SessionError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().expect("accept");
        serve_peer(socket, &config, &registry, &stop)
    });
    let peer = TcpStream::connect(addr).expect("connect");
    (peer, server)
}

/// Reads the server hello and answers with `name` at version `major.minor`.
fn greet(peer: &mut TcpStream, major: u16, minor: u16, name: &str) {
    let hello = read_frame(peer).expect("read hello");
    let fields = decode_with(&HELLO, &hello).expect("decode hello");
    assert_eq!(fields, vec![FieldValue::U16(1), FieldValue::U16(6)]);

    let reply = encode_frame(
        &HELLO_BACK,
        &[FieldValue::U16(major), FieldValue::U16(minor), FieldValue::bytes(name.as_bytes())],
    )
    .expect("encode hello back");
    peer.write_all(&reply).expect("send hello back");
}

fn opcode(body: &[u8]) -> String {
    String::from_utf8_lossy(&body[..body.len().min(4)]).into_owned()
}

#[test]
fn test_session_starts_keeps_alive_and_says_goodbye() {
    // Arrange
    let stop = Arc::new(AtomicBool::new(false));
    let (mut peer, server) = spawn_server(test_config(), Arc::new(PeerRegistry::new()), Arc::clone(&stop));

    // Act
    greet(&mut peer, 1, 6, "laptop");
    let opening: Vec<String> = (0..3).map(|_| opcode(&read_frame(&mut peer).expect("read"))).collect();
    let first_heartbeat = read_frame(&mut peer).expect("read heartbeat");
    stop.store(true, Ordering::Relaxed);

    let mut tail = Vec::new();
    loop {
        let body = read_frame(&mut peer).expect("read until goodbye");
        let op = opcode(&body);
        tail.push(op.clone());
        if op == "CBYE" {
            break;
        }
    }

    // Assert
    assert_eq!(opening, vec!["QINF", "CROP", "DSOP"]);
    let decoded = decode_message(Dialect::V1_6.catalog(), &first_heartbeat).expect("decode");
    assert_eq!(decoded.descriptor.opcode, "CALV");
    assert!(tail[..tail.len() - 1].iter().all(|op| op == "CALV"));
    server.join().expect("server thread").expect("session result");
}

#[test]
fn test_incompatible_peer_receives_eicv() {
    // Arrange
    let stop = Arc::new(AtomicBool::new(false));
    let (mut peer, server) = spawn_server(test_config(), Arc::new(PeerRegistry::new()), stop);

    // Act
    greet(&mut peer, 1, 2, "ancient");
    let reply = read_frame(&mut peer).expect("read reject");

    // Assert
    assert_eq!(reply, CloseReason::Incompatible(leap_core::ProtocolVersion::CURRENT).message());
    let result = server.join().expect("server thread");
    assert!(matches!(result, Err(SessionError::Handshake(_))));
}

#[test]
fn test_unknown_client_receives_eunk() {
    // Arrange
    let mut cfg = test_config();
    cfg.server.allowed_clients = vec!["laptop".to_string()];
    let (mut peer, server) = spawn_server(cfg, Arc::new(PeerRegistry::new()), Arc::new(AtomicBool::new(false)));

    // Act
    greet(&mut peer, 1, 6, "intruder");
    let reply = read_frame(&mut peer).expect("read reject");

    // Assert
    assert_eq!(reply, b"EUNK");
    let result = server.join().expect("server thread");
    assert!(matches!(result, Err(SessionError::Rejected(name, CloseReason::UnknownClient)) if name == "intruder"));
}

#[test]
fn test_duplicate_name_receives_ebsy() {
    // Arrange
    let registry = Arc::new(PeerRegistry::new());
    let held = Arc::clone(&registry);
    let _claim = held.claim("laptop").expect("first claim");
    let (mut peer, server) = spawn_server(test_config(), registry, Arc::new(AtomicBool::new(false)));

    // Act
    greet(&mut peer, 1, 6, "laptop");
    let reply = read_frame(&mut peer).expect("read reject");

    // Assert
    assert_eq!(reply, b"EBSY");
    let result = server.join().expect("server thread");
    assert!(matches!(result, Err(SessionError::Rejected(_, CloseReason::Busy))));
}

#[test]
fn test_peer_hangup_ends_session() {
    // Arrange
    let (mut peer, server) =
        spawn_server(test_config(), Arc::new(PeerRegistry::new()), Arc::new(AtomicBool::new(false)));
    greet(&mut peer, 1, 6, "laptop");
    for _ in 0..3 {
        read_frame(&mut peer).expect("read opening");
    }

    // Act
    drop(peer);

    // Assert – the session notices the closed socket and returns
    let _ = server.join().expect("server thread");
}

#[test]
fn test_silent_peer_times_out_during_handshake() {
    // Arrange
    let mut cfg = test_config();
    cfg.server.handshake_timeout_ms = 100;
    let stop = Arc::new(AtomicBool::new(false));
    let started = Instant::now();
    let (mut peer, server) = spawn_server(cfg, Arc::new(PeerRegistry::new()), Arc::clone(&stop));

    // Act – read the hello but never answer it
    read_frame(&mut peer).expect("read hello");
    stop.store(true, Ordering::Relaxed);
    let result = server.join().expect("server thread");

    // Assert
    assert!(matches!(result, Err(SessionError::Handshake(HandshakeError::TimedOut))));
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(peer);
}
