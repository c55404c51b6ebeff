//! Configuration system for meshtx.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHTX_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshtx/config.toml
//!   3. ~/.config/meshtx/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::receiver::ReceiverOptions;
use crate::sender::Pacing;
use crate::transport::NodeId;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshTxConfig {
    pub node: NodeConfig,
    pub transfer: TransferConfig,
    pub receiver: ReceiverConfig,
    /// Kept last so it serializes as trailing `[[peers]]` tables.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's mesh identifier.
    pub node_id: NodeId,
    /// UDP address the emulated mesh link binds to.
    pub bind: SocketAddr,
}

/// A reachable neighbour on the emulated link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: NodeId,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Delay between CHUNK frames, in milliseconds.
    pub chunk_interval_ms: u64,
    /// How long `send` listens for ACK/ERROR replies afterwards. 0 = don't wait.
    pub reply_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Reject END when fewer chunks arrived than START announced.
    pub strict_chunk_count: bool,
    /// Where delivered payloads are written. None = log only.
    pub spool_dir: Option<PathBuf>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(1),
            bind: SocketAddr::from(([127, 0, 0, 1], 4403)),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 100,
            reply_wait_ms: 2000,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            strict_chunk_count: false,
            spool_dir: Some(data_dir().join("spool")),
        }
    }
}

impl TransferConfig {
    pub fn pacing(&self) -> Pacing {
        Pacing {
            chunk_interval: Duration::from_millis(self.chunk_interval_ms),
        }
    }

    pub fn reply_wait(&self) -> Duration {
        Duration::from_millis(self.reply_wait_ms)
    }
}

impl ReceiverConfig {
    pub fn options(&self) -> ReceiverOptions {
        ReceiverOptions {
            strict_chunk_count: self.strict_chunk_count,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshtx")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("meshtx")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshTxConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            MeshTxConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHTX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshTxConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Look up a peer's link address.
    pub fn peer_addr(&self, node_id: NodeId) -> Option<SocketAddr> {
        self.peers
            .iter()
            .find(|p| p.node_id == node_id)
            .map(|p| p.addr)
    }

    /// Apply MESHTX_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("MESHTX_NODE__NODE_ID") {
            match v.parse() {
                Ok(id) => self.node.node_id = id,
                Err(e) => tracing::warn!(value = v, error = %e, "ignoring MESHTX_NODE__NODE_ID"),
            }
        }
        if let Some(v) = var("MESHTX_NODE__BIND") {
            match v.parse() {
                Ok(addr) => self.node.bind = addr,
                Err(e) => tracing::warn!(value = v, error = %e, "ignoring MESHTX_NODE__BIND"),
            }
        }
        if let Some(v) = var("MESHTX_TRANSFER__CHUNK_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.transfer.chunk_interval_ms = ms;
            }
        }
        if let Some(v) = var("MESHTX_RECEIVER__STRICT_CHUNK_COUNT") {
            self.receiver.strict_chunk_count = v == "true" || v == "1";
        }
    }
}
