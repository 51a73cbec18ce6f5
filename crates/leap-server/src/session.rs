//! Per-peer session: owns one connection encoder and decides when to send.
//!
//! ```text
//! serve_peer()
//!  ├─ handshake::negotiate()          -- HELLO / HELLO_BACK, pick dialect
//!  ├─ admission (allowed, not busy)   -- else EUNK / EBSY and close
//!  ├─ PeerSession::start()            -- QINF, CROP, DSOP
//!  ├─ inbound reader thread           -- logs peer frames, detects hangup
//!  └─ PeerSession::run_keep_alive()   -- CALV every interval, CBYE on stop
//! ```

use std::collections::HashSet;
use std::io::{self, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use leap_core::observer::{SendObserver, TracingObserver};
use leap_core::{ClientConnection, CloseReason, ConnectionError, IoStream, OptionsList, OutputStream};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handshake::{self, HandshakeError};

/// Upper bound on one sleep slice while waiting for the next keep-alive.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Errors that end a peer session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),

    #[error("peer {0} rejected: {1:?}")]
    Rejected(String, CloseReason),
}

// ── Peer registry ─────────────────────────────────────────────────────────────

/// Screen names with a live session.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    names: Mutex<HashSet<String>>,
}

/// Holds a name in the registry until dropped.
#[derive(Debug)]
pub struct PeerClaim<'a> {
    registry: &'a PeerRegistry,
    name: String,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name`, or returns `None` if a session already holds it.
    pub fn claim(&self, name: &str) -> Option<PeerClaim<'_>> {
        let mut names = self.names.lock().expect("lock poisoned");
        if names.insert(name.to_string()) {
            Some(PeerClaim {
                registry: self,
                name: name.to_string(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().expect("lock poisoned").contains(name)
    }
}

impl Drop for PeerClaim<'_> {
    fn drop(&mut self) {
        self.registry.names.lock().expect("lock poisoned").remove(&self.name);
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Drives one peer's connection encoder.
pub struct PeerSession<S: OutputStream, O: SendObserver = TracingObserver> {
    conn: ClientConnection<S, O>,
}

impl<S: OutputStream, O: SendObserver> PeerSession<S, O> {
    pub fn new(conn: ClientConnection<S, O>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &ClientConnection<S, O> {
        &self.conn
    }

    /// Opening sequence after the handshake: query the peer's screen, then
    /// replace its options with `options`.
    pub fn start(&mut self, options: &OptionsList) -> Result<(), ConnectionError> {
        self.conn.send_query_info()?;
        self.conn.send_reset_options()?;
        self.conn.send_set_options(options)?;
        self.conn.flush()
    }

    /// Sends `reason` and closes the connection.
    pub fn reject(mut self, reason: CloseReason) -> Result<(), ConnectionError> {
        let sent = self.conn.send_close(&reason.message());
        let closed = self.conn.close();
        sent.and(closed)
    }

    /// Sends a keep-alive every `interval` until `should_stop` returns true,
    /// then says goodbye and closes. A failed write closes the connection and
    /// is returned.
    pub fn run_keep_alive<F>(&mut self, should_stop: F, interval: Duration) -> Result<(), ConnectionError>
    where
        F: Fn() -> bool,
    {
        let result = self.keep_alive_loop(&should_stop, interval);
        match result {
            Ok(()) => {
                let bye = self.conn.send_close(&CloseReason::Bye.message());
                let closed = self.conn.close();
                bye.and(closed)
            }
            Err(e) => {
                // The stream already failed; closing is best effort.
                if let Err(close_err) = self.conn.close() {
                    debug!(peer = self.conn.name(), "close after failure: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn keep_alive_loop<F>(&mut self, should_stop: &F, interval: Duration) -> Result<(), ConnectionError>
    where
        F: Fn() -> bool,
    {
        while !should_stop() {
            self.conn.send_keep_alive()?;
            self.conn.flush()?;
            let deadline = Instant::now() + interval;
            loop {
                let now = Instant::now();
                if now >= deadline || should_stop() {
                    break;
                }
                thread::sleep((deadline - now).min(STOP_POLL));
            }
        }
        Ok(())
    }
}

// ── Socket entry point ────────────────────────────────────────────────────────

/// Runs a complete session on an accepted socket. Blocks until the peer
/// hangs up, a write fails, or `stop` is set. A peer that does not answer the
/// hello within the configured handshake timeout ends the session with
/// [`HandshakeError::TimedOut`].
///
/// # Errors
///
/// Returns the error that ended the session; [`SessionError::Rejected`] when
/// the peer was turned away after the handshake.
pub fn serve_peer(
    mut socket: TcpStream,
    config: &ServerConfig,
    registry: &PeerRegistry,
    stop: &AtomicBool,
) -> Result<(), SessionError> {
    socket.set_nodelay(true)?;
    socket.set_read_timeout(Some(config.handshake_timeout()))?;
    let negotiated = handshake::negotiate(&mut socket, config.server.protocol_version)?;
    socket.set_read_timeout(None)?;
    let name = negotiated.peer_name;

    let reader = socket.try_clone()?;
    let control = socket.try_clone()?;
    let conn = ClientConnection::new(name.clone(), IoStream::new(BufWriter::new(socket)), negotiated.dialect);
    let session = PeerSession::new(conn);

    if !config.is_client_allowed(&name) {
        warn!(peer = %name, "unknown client");
        session.reject(CloseReason::UnknownClient)?;
        return Err(SessionError::Rejected(name, CloseReason::UnknownClient));
    }
    let Some(_claim) = registry.claim(&name) else {
        warn!(peer = %name, "a client with this name is already connected");
        session.reject(CloseReason::Busy)?;
        return Err(SessionError::Rejected(name, CloseReason::Busy));
    };

    let mut session = session;
    session.start(&config.options_list())?;

    let hung_up = Arc::new(AtomicBool::new(false));
    let reader_thread = spawn_reader(reader, name.clone(), Arc::clone(&hung_up));

    let result = session.run_keep_alive(
        || stop.load(Ordering::Relaxed) || hung_up.load(Ordering::Relaxed),
        config.keep_alive_interval(),
    );
    drop(session);
    // Unblocks the reader, which holds its own handle to the socket.
    if let Err(e) = control.shutdown(Shutdown::Both) {
        debug!(peer = %name, "socket shutdown: {}", e);
    }
    if reader_thread.join().is_err() {
        warn!(peer = %name, "inbound reader panicked");
    }
    info!(peer = %name, "session ended");
    result.map_err(SessionError::from)
}

/// Reads and logs inbound frames until the peer hangs up.
///
/// Inbound messages are not interpreted here; the thread only notices when
/// the socket goes away.
fn spawn_reader(mut reader: TcpStream, name: String, hung_up: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match handshake::read_frame(&mut reader) {
                Ok(body) => {
                    let tag = String::from_utf8_lossy(&body[..body.len().min(4)]).into_owned();
                    debug!(peer = %name, opcode = %tag, len = body.len(), "inbound frame");
                }
                Err(e) => {
                    debug!(peer = %name, "inbound stream ended: {}", e);
                    break;
                }
            }
        }
        hung_up.store(true, Ordering::Relaxed);
    })
}
