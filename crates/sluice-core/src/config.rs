//! Configuration system for the bridge.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SLUICE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sluice/config.toml
//!   3. ~/.config/sluice/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub input: HttpServerConfig,
    pub outputs: Vec<HttpClientConfig>,
    pub api: ApiConfig,
}

/// HTTP ingress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Listen address, host:port.
    pub address: String,
    /// Path POSTs are accepted on.
    pub path: String,
    /// How long a POST waits for its acknowledgement, in milliseconds.
    pub timeout_ms: u64,
}

/// One HTTP egress endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// URL messages are POSTed to.
    pub url: String,
    /// Per-request timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Pause between delivery attempts, in milliseconds.
    pub retry_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Loopback port for the status endpoint. 0 disables it.
    pub status_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4195".to_string(),
            path: "/post".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/post".to_string(),
            timeout_ms: 5_000,
            retry_period_ms: 1_000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { status_port: 4196 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("sluice")
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

impl BridgeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
        } else {
            Ok(BridgeConfig::default())
        }
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SLUICE_CONFIG")
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
            let text = toml::to_string_pretty(&BridgeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply SLUICE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SLUICE_INPUT__ADDRESS") {
            self.input.address = v;
        }
        if let Ok(v) = std::env::var("SLUICE_INPUT__PATH") {
            self.input.path = v;
        }
        if let Ok(v) = std::env::var("SLUICE_INPUT__TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.input.timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_API__STATUS_PORT") {
            if let Ok(port) = v.parse() {
                self.api.status_port = port;
            }
        }
    }
}
