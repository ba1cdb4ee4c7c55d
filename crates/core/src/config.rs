//! Client configuration.
//!
//! All sections are defaulted so an empty file (or no file at all) plus a
//! couple of environment variables is a usable configuration. The binary
//! layers a TOML file and `LARDER_`-prefixed environment variables on top of
//! these defaults.

use crate::chunker::{AVG_SIZE_CEIL, AVG_SIZE_FLOOR};
use crate::compression::Compression;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the cache server.
    #[serde(default = "default_server")]
    pub server: String,
    /// Cache namespace for every operation.
    #[serde(default = "default_cache")]
    pub cache: String,
    /// Bearer token. Never logged.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Timeout for a single HTTP request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum hashes per existence query.
    #[serde(default = "default_existence_batch_size")]
    pub existence_batch_size: usize,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Directory for the local chunk cache. Disabled when unset.
    #[serde(default)]
    pub local_cache_dir: Option<PathBuf>,
    /// File holding the `name:base64` secret key used to sign manifests.
    #[serde(default)]
    pub signing_key_file: Option<PathBuf>,
    /// Trusted public keys in `name:base64` form.
    #[serde(default)]
    pub trusted_keys: Vec<String>,
}

/// Chunking parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target (average) chunk size in bytes.
    ///
    /// Chunk boundaries depend on this value alone, so every pusher of a
    /// cache should agree on it. It never follows measured bandwidth.
    #[serde(default = "default_target_size")]
    pub target_size: u64,
}

/// Transfer scheduling parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Explicit concurrency. Takes precedence over everything else.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Assumed bandwidth in Mbit/s. Skips the live probe.
    #[serde(default)]
    pub bandwidth_mbps: Option<f64>,
    /// Attempts per chunk before a transient failure becomes final.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on any single backoff, in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Compression for uploaded chunks. Chunks that do not shrink are sent raw.
    #[serde(default)]
    pub compression: Compression,
}

/// Bandwidth probe parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Deadline for the whole probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    /// Bytes requested from the probe endpoint.
    #[serde(default = "default_probe_bytes")]
    pub bytes: u64,
    /// How long a measured estimate may be reused, in seconds.
    #[serde(default = "default_memo_ttl_secs")]
    pub memo_ttl_secs: u64,
}

fn default_target_size() -> u64 {
    crate::DEFAULT_TARGET_CHUNK_SIZE
}

fn default_server() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_cache() -> String {
    "default".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_existence_batch_size() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_probe_bytes() -> u64 {
    256 * 1024
}

fn default_memo_ttl_secs() -> u64 {
    300
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            cache: default_cache(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
            existence_batch_size: default_existence_batch_size(),
            chunking: ChunkingConfig::default(),
            transfer: TransferConfig::default(),
            probe: ProbeConfig::default(),
            local_cache_dir: None,
            signing_key_file: None,
            trusted_keys: Vec::new(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            bandwidth_mbps: None,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            compression: Compression::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            bytes: default_probe_bytes(),
            memo_ttl_secs: default_memo_ttl_secs(),
        }
    }
}

impl ClientConfig {
    /// Reject settings that cannot produce a working transfer.
    pub fn validate(&self) -> crate::Result<()> {
        let err = |msg: String| Err(crate::Error::Config(msg));

        if !(self.server.starts_with("http://") || self.server.starts_with("https://")) {
            return err(format!(
                "server must be an http:// or https:// URL, got {:?}",
                self.server
            ));
        }
        if self.cache.is_empty() {
            return err("cache name cannot be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            return err("request_timeout_secs must be greater than 0".to_string());
        }
        if self.existence_batch_size == 0 {
            return err("existence_batch_size must be greater than 0".to_string());
        }
        let target = self.chunking.target_size;
        if !(AVG_SIZE_FLOOR as u64..=AVG_SIZE_CEIL as u64).contains(&target) {
            return err(format!(
                "chunking.target_size {target} outside {AVG_SIZE_FLOOR}..={AVG_SIZE_CEIL}"
            ));
        }
        if self.transfer.concurrency == Some(0) {
            return err("transfer.concurrency must be greater than 0".to_string());
        }
        if let Some(mbps) = self.transfer.bandwidth_mbps
            && !(mbps.is_finite() && mbps > 0.0)
        {
            return err(format!("transfer.bandwidth_mbps must be positive, got {mbps}"));
        }
        if self.transfer.max_attempts == 0 {
            return err("transfer.max_attempts must be greater than 0".to_string());
        }
        if self.transfer.backoff_max_ms < self.transfer.backoff_base_ms {
            return err("transfer.backoff_max_ms must be >= backoff_base_ms".to_string());
        }
        if self.probe.timeout_ms == 0 || self.probe.bytes == 0 {
            return err("probe.timeout_ms and probe.bytes must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TransferConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn memo_ttl(&self) -> Duration {
        Duration::from_secs(self.memo_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.transfer.max_attempts, 3);
        assert_eq!(config.transfer.backoff_base(), Duration::from_millis(100));
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.existence_batch_size, 256);
        assert_eq!(config.chunking.target_size, crate::DEFAULT_TARGET_CHUNK_SIZE);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            server = "https://cache.example.com"
            cache = "main"

            [transfer]
            concurrency = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.transfer.concurrency, Some(6));
        assert_eq!(config.transfer.max_attempts, 3);
        assert_eq!(config.probe.timeout_ms, 2_000);
        assert_eq!(config.transfer.compression, Compression::Zstd);
        config.validate().unwrap();
    }

    #[test]
    fn test_compression_and_chunk_target_from_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            [chunking]
            target_size = 65536

            [transfer]
            compression = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.target_size, 65_536);
        assert_eq!(config.transfer.compression, Compression::None);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.transfer.concurrency = Some(0);
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.transfer.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.chunking.target_size = 64 * 1024 * 1024;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.server = "cache.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.transfer.bandwidth_mbps = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_not_serialized() {
        let config = ClientConfig {
            token: Some("secret".to_string()),
            ..ClientConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
