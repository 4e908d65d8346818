//! Configuration loading and management

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use subscription_core::{PeerId, StoreBackend};

const CONFIG_FILE: &str = "config.json";

/// Main configuration for the subscription daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Our peer ID (generated and written back on first start)
    pub peer_id: Option<PeerId>,

    /// Address to listen on for incoming connections
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Peers to dial (`host:port` or `ws://` URLs)
    #[serde(default)]
    pub connect: Vec<String>,

    /// Seconds between attempts to re-dial a lost peer
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// Subscription store
    #[serde(default)]
    pub store: StoreConfig,

    /// Share-bases we export, in index order
    #[serde(default)]
    pub shares: Vec<ShareConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Store file; relative paths are resolved against the config directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Name peers use to subscribe
    pub name: String,
    /// Local directory behind the name (never sent to peers)
    pub path: PathBuf,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_reconnect_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: None,
            listen: default_listen(),
            connect: Vec::new(),
            reconnect_secs: default_reconnect_secs(),
            store: StoreConfig::default(),
            shares: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory, creating a default one if absent.
    ///
    /// A missing peer ID is generated and saved so it survives restarts;
    /// peers key their subscriptions by it.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join(CONFIG_FILE);

        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", config_file))?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            Config::default()
        };
        config.validate()?;

        if config.peer_id.is_none() || !config_file.exists() {
            if config.peer_id.is_none() {
                let peer_id = PeerId::generate();
                tracing::info!("Generated peer ID: {}", peer_id);
                config.peer_id = Some(peer_id);
            }
            config.save(config_dir)?;
        }

        Ok(config)
    }

    /// Write the configuration to `config.json` in the config directory.
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        let config_file = config_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_file, content)
            .with_context(|| format!("Failed to write config: {:?}", config_file))?;
        tracing::info!("Wrote config to {:?}", config_file);
        Ok(())
    }

    /// Reject share lists peers could not address unambiguously.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for share in &self.shares {
            if share.name.is_empty() {
                bail!("Share for {:?} has an empty name", share.path);
            }
            if !seen.insert(share.name.as_str()) {
                bail!("Share name '{}' is configured twice", share.name);
            }
        }
        Ok(())
    }

    /// Where the subscription store lives.
    pub fn store_path(&self, config_dir: &Path) -> PathBuf {
        let path = self.store.path.clone().unwrap_or_else(|| {
            PathBuf::from(match self.store.backend {
                StoreBackend::Sqlite => "subscriptions.db",
                StoreBackend::Snapshot => "subscriptions.json",
            })
        });
        if path.is_absolute() {
            path
        } else {
            config_dir.join(path)
        }
    }
}
