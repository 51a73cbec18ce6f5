//! TOML configuration for the server.
//!
//! ```toml
//! [server]
//! name = "desk"
//! bind_address = "0.0.0.0"
//! port = 24800
//! protocol_version = "1.6"
//! keep_alive_ms = 3000
//! handshake_timeout_ms = 10000
//! log_level = "info"
//! allowed_clients = ["laptop"]
//!
//! [options]
//! heartbeat_ms = 5000
//! half_duplex_caps_lock = false
//! half_duplex_num_lock = false
//! half_duplex_scroll_lock = false
//! screen_saver_sync = true
//! relative_mouse_moves = false
//! ```
//!
//! Every field is optional; missing ones take the defaults shown above
//! (`allowed_clients` defaults to empty, which admits any screen name).

use std::path::{Path, PathBuf};
use std::time::Duration;

use leap_core::{OptionId, OptionsList, ProtocolVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub options: OptionsSection,
}

/// Listener and protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// This server's screen name.
    #[serde(default = "default_name")]
    pub name: String,
    /// IP address to listen on. `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Highest protocol version offered in the hello.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: ProtocolVersion,
    /// Interval between keep-alive messages.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// How long a peer may take to answer the hello.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Screen names allowed to connect. Empty admits everyone.
    #[serde(default)]
    pub allowed_clients: Vec<String>,
}

/// Option values pushed to every peer after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionsSection {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: i32,
    #[serde(default)]
    pub half_duplex_caps_lock: bool,
    #[serde(default)]
    pub half_duplex_num_lock: bool,
    #[serde(default)]
    pub half_duplex_scroll_lock: bool,
    #[serde(default = "default_true")]
    pub screen_saver_sync: bool,
    #[serde(default)]
    pub relative_mouse_moves: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "server".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    24800
}
fn default_protocol_version() -> ProtocolVersion {
    ProtocolVersion::CURRENT
}
fn default_keep_alive_ms() -> u64 {
    3000
}
fn default_handshake_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_heartbeat_ms() -> i32 {
    5000
}
fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            bind_address: default_bind_address(),
            port: default_port(),
            protocol_version: default_protocol_version(),
            keep_alive_ms: default_keep_alive_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            log_level: default_log_level(),
            allowed_clients: Vec::new(),
        }
    }
}

impl Default for OptionsSection {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            half_duplex_caps_lock: false,
            half_duplex_num_lock: false,
            half_duplex_scroll_lock: false,
            screen_saver_sync: default_true(),
            relative_mouse_moves: false,
        }
    }
}

impl ServerConfig {
    /// `bind_address:port`, ready for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.server.keep_alive_ms)
    }

    /// Read deadline for the hello exchange. Zero is raised to one
    /// millisecond because the socket API rejects a zero timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.server.handshake_timeout_ms.max(1))
    }

    /// Whether a peer announcing `name` may connect.
    pub fn is_client_allowed(&self, name: &str) -> bool {
        self.server.allowed_clients.is_empty() || self.server.allowed_clients.iter().any(|c| c == name)
    }

    /// The option assignments sent to each peer, in wire order.
    pub fn options_list(&self) -> OptionsList {
        let o = &self.options;
        [
            (OptionId::HALF_DUPLEX_CAPS_LOCK, i32::from(o.half_duplex_caps_lock)),
            (OptionId::HALF_DUPLEX_NUM_LOCK, i32::from(o.half_duplex_num_lock)),
            (OptionId::HALF_DUPLEX_SCROLL_LOCK, i32::from(o.half_duplex_scroll_lock)),
            (OptionId::HEARTBEAT, o.heartbeat_ms),
            (OptionId::SCREEN_SAVER_SYNC, i32::from(o.screen_saver_sync)),
            (OptionId::RELATIVE_MOUSE_MOVES, i32::from(o.relative_mouse_moves)),
        ]
        .into_iter()
        .collect()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Parses a TOML document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed or a value has
/// the wrong type (including an unparsable `protocol_version`).
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads the config at `path`, returning `ServerConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
