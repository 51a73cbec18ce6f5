//! input-leap server entry point.
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML, defaults when absent
//!  └─ TcpListener accept loop
//!       └─ spawn_blocking(serve_peer)   -- one encoder per peer
//! ```
//!
//! Usage: `leap-server [CONFIG_PATH]` (default `leap-server.toml`).

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use leap_server::config::load_config;
use leap_server::session::{serve_peer, PeerRegistry, SessionError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("leap-server.toml"));
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(
        name = %config.server.name,
        version = %config.server.protocol_version,
        "input-leap server starting"
    );

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("binding {}", config.listen_addr()))?;
    info!("listening on {}", config.listen_addr());

    let config = Arc::new(config);
    let registry = Arc::new(PeerRegistry::new());
    // Shutdown flag shared with every session.
    let shutdown = Arc::new(AtomicBool::new(false));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                info!("connection from {addr}");

                // Sessions use blocking I/O; hand the socket over as a std stream.
                let socket = match socket.into_std().and_then(|s| s.set_nonblocking(false).map(|_| s)) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("cannot prepare socket from {addr}: {e}");
                        continue;
                    }
                };

                let config = Arc::clone(&config);
                let registry = Arc::clone(&registry);
                let shutdown = Arc::clone(&shutdown);
                tokio::task::spawn_blocking(move || {
                    match serve_peer(socket, &config, &registry, &shutdown) {
                        Ok(()) => {}
                        Err(SessionError::Rejected(name, reason)) => {
                            info!("rejected {name} from {addr}: {reason:?}")
                        }
                        Err(e) => error!("session with {addr} failed: {e}"),
                    }
                });
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("cannot listen for shutdown signal: {e}");
                }
                info!("shutdown signal received");
                shutdown.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    info!("input-leap server stopped");
    Ok(())
}
