//! Engine configuration
//!
//! The sandboxed process has no filesystem discovery of its own; the
//! embedder either injects a TOML string or a path it is allowed to read.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Largest command or response APDU accepted by default (extended APDU).
pub const DEFAULT_MAX_APDU_LEN: usize = 65_548;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Log filter applied when `RUST_LOG` is unset
    #[serde(default = "ConnectorConfig::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub transfers: TransferSettings,
    #[serde(default)]
    pub pcsc: PcscSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// How long a worker thread waits for a transfer reply before a
    /// best-effort cancellation, in milliseconds
    #[serde(default = "TransferSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcscSettings {
    /// Largest accepted command APDU in bytes
    #[serde(default = "PcscSettings::default_max_apdu_len")]
    pub max_apdu_len: usize,
}

impl ConnectorConfig {
    /// Parse a TOML configuration string
    pub fn from_toml(input: &str) -> common::Result<Self> {
        toml::from_str(input).map_err(|e| common::Error::Config(e.to_string()))
    }

    /// Load configuration from a file path
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            transfers: TransferSettings::default(),
            pcsc: PcscSettings::default(),
        }
    }
}

impl TransferSettings {
    /// Transfer wait as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn default_timeout_ms() -> u64 {
        5_000
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl PcscSettings {
    fn default_max_apdu_len() -> usize {
        DEFAULT_MAX_APDU_LEN
    }
}

impl Default for PcscSettings {
    fn default() -> Self {
        Self {
            max_apdu_len: Self::default_max_apdu_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.transfers.timeout(), Duration::from_secs(5));
        assert_eq!(config.pcsc.max_apdu_len, DEFAULT_MAX_APDU_LEN);
    }

    #[test]
    fn toml_roundtrip() {
        let config = ConnectorConfig::default();
        let encoded = toml::to_string(&config).expect("serialize");
        let parsed = ConnectorConfig::from_toml(&encoded).expect("parse");
        assert_eq!(parsed.transfers.timeout_ms, config.transfers.timeout_ms);
        assert_eq!(parsed.pcsc.max_apdu_len, config.pcsc.max_apdu_len);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed = ConnectorConfig::from_toml("[transfers]\ntimeout_ms = 250\n").unwrap();
        assert_eq!(parsed.transfers.timeout_ms, 250);
        assert_eq!(parsed.pcsc.max_apdu_len, DEFAULT_MAX_APDU_LEN);
        assert_eq!(parsed.log_level, "info");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connector.toml");
        std::fs::write(&path, "log_level = \"debug\"\n").unwrap();

        let parsed = ConnectorConfig::load(&path).unwrap();
        assert_eq!(parsed.log_level, "debug");
    }
}
