use anyhow::{bail, Context, Result};
use filebridge_base::ServerModel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Known remote servers
    #[serde(default)]
    pub servers: Vec<ServerModel>,

    /// Directory for staged transfer files
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Connect timeout given to newly added servers, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("org", "filebridge", "filebridge") {
        dirs.cache_dir().join("staging")
    } else {
        std::env::temp_dir().join("filebridge-staging")
    }
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            cache_dir: default_cache_dir(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl BridgeConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("org", "filebridge", "filebridge") {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("filebridge-config.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Load the config at `path`, or the defaults when there is none yet
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Look a server up by uuid, then by name
    pub fn find_server(&self, key: &str) -> Option<&ServerModel> {
        self.servers
            .iter()
            .find(|s| s.uuid == key)
            .or_else(|| self.servers.iter().find(|s| s.name == key))
    }

    /// Register a server. Names must be unique.
    pub fn add_server(&mut self, server: ServerModel) -> Result<&ServerModel> {
        if self.servers.iter().any(|s| s.name == server.name) {
            bail!("a server named {:?} already exists", server.name);
        }
        self.servers.push(server);
        self.servers
            .last()
            .context("server list empty after insert")
    }
}
