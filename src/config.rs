//! Manager configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::plugin::TrustClass;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Configuration for the plugin manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Root directory for core plugins shipped with the host (read-only).
    pub core_root: PathBuf,

    /// Root directory for bundled plugins shipped with the host (read-only).
    pub bundled_root: PathBuf,

    /// Root directory for externally installed plugins (read-write, mutated
    /// by the installer).
    pub external_root: PathBuf,

    /// Whether the host runs in development mode. Unsigned plugins are
    /// admitted in development mode.
    pub dev_mode: bool,

    /// Plugin IDs allowed to run unsigned in production.
    pub allow_unsigned: Vec<String>,

    /// Trusted manifest signing keys, base64-encoded ed25519 public keys.
    pub signing_keys: Vec<String>,

    /// Log filter directive, e.g. `info` or `corvus_plugin_manager=debug`.
    pub log_level: String,

    /// Listen address for the Prometheus metrics exporter, if enabled.
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            core_root: PathBuf::from("plugins/core"),
            bundled_root: PathBuf::from("plugins/bundled"),
            external_root: PathBuf::from("plugins/external"),
            dev_mode: false,
            allow_unsigned: Vec::new(),
            signing_keys: Vec::new(),
            log_level: "info".to_string(),
            prometheus_addr: None,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The configured plugin roots in classification order.
    pub fn roots(&self) -> [&Path; 3] {
        [&self.core_root, &self.bundled_root, &self.external_root]
    }

    /// Whether plugins of the given trust class must carry a valid signature.
    ///
    /// Core and bundled plugins ship with the host and are exempt.
    pub fn signature_required(&self, class: TrustClass) -> bool {
        matches!(class, TrustClass::External | TrustClass::Unknown)
    }

    /// Decode the configured trusted signing keys.
    ///
    /// Keys that fail to decode are logged and skipped so one bad entry does
    /// not take down the whole manager.
    pub fn verifying_keys(&self) -> Vec<VerifyingKey> {
        let mut keys = Vec::with_capacity(self.signing_keys.len());
        for encoded in &self.signing_keys {
            let bytes = match BASE64_STANDARD.decode(encoded) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("Skipping malformed signing key: {}", err);
                    continue;
                }
            };
            let key_array: [u8; ed25519_dalek::PUBLIC_KEY_LENGTH] = match bytes.try_into() {
                Ok(arr) => arr,
                Err(_) => {
                    warn!("Skipping signing key: must be 32 bytes");
                    continue;
                }
            };
            match VerifyingKey::from_bytes(&key_array) {
                Ok(key) => keys.push(key),
                Err(err) => warn!("Skipping invalid signing key: {}", err),
            }
        }
        keys
    }
}
