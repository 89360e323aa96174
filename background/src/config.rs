//! Pipeline configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::BackgroundError;

/// Configuration for the background service and its approval surface.
///
/// Can be loaded from a TOML file via [`PipelineConfig::from_toml_file`]
/// or built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Data directory for the event store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the local wallet-bridge daemon.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Port for the approval surface HTTP/WebSocket server.
    #[serde(default = "default_surface_port")]
    pub surface_port: u16,

    /// Seconds an approval may stay pending before the gate resolves it as
    /// rejected. Unset means wait forever.
    #[serde(default)]
    pub approval_timeout_secs: Option<u64>,

    /// Completed records older than this are purged when viewers read the
    /// completed queue.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Capacity of the relay → background request channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./keybridge_data")
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:1646".to_string()
}

fn default_surface_port() -> u16 {
    7345
}

fn default_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_channel_capacity() -> usize {
    256
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, BackgroundError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| BackgroundError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, BackgroundError> {
        toml::from_str(s).map_err(|e| BackgroundError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("PipelineConfig is always serializable to TOML")
    }

    /// Retention window in milliseconds.
    pub fn retention_ms(&self) -> u64 {
        self.retention_secs.saturating_mul(1_000)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bridge_url: default_bridge_url(),
            surface_port: default_surface_port(),
            approval_timeout_secs: None,
            retention_secs: default_retention_secs(),
            channel_capacity: default_channel_capacity(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
