//! Mockasite configuration
//!
//! Fixture location, replay listener and fingerprint tuning, loaded from TOML.

use crate::mock::fingerprint::Fingerprinter;
use crate::mock::store::{FixtureStore, DEFAULT_INDEX_FILE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub fingerprint: FingerprintConfig,
}

impl MockConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `MOCKASITE_CONFIG` or the default path, falling back to defaults
    pub fn from_env() -> Self {
        let path =
            std::env::var("MOCKASITE_CONFIG").unwrap_or_else(|_| "mockasite.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default mockasite config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn fingerprinter(&self) -> Fingerprinter {
        Fingerprinter::with_extra_volatile(self.fingerprint.extra_volatile_params.iter().cloned())
    }

    /// An empty store handle for this configuration.
    pub fn store_handle(&self) -> FixtureStore {
        FixtureStore::new(&self.store.root)
            .with_index_file(&self.store.index_file)
            .with_body_cache(self.store.cache_bodies)
    }
}

/// Where fixtures and the index live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Index file, relative to `root`
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,

    /// Keep decoded fixtures in memory while serving
    #[serde(default = "default_true")]
    pub cache_bodies: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("mock_data")
}

fn default_index_file() -> PathBuf {
    PathBuf::from(DEFAULT_INDEX_FILE)
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            index_file: default_index_file(),
            cache_bodies: true,
        }
    }
}

/// Replay listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Fill in `Access-Control-Allow-Origin` when a fixture has none
    #[serde(default = "default_true")]
    pub cors: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: true,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Fingerprint tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Tracking query names ignored in addition to the built-in set
    #[serde(default)]
    pub extra_volatile_params: Vec<String>,
}
