//! CLI configuration

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Overrides the config file location
pub const CONFIG_ENV: &str = "XREG_CONFIG";

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".xreg")
}

/// Location of the config file
pub fn config_file_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => default_data_dir().join("config.toml"),
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redb,
    Sqlite,
    Memory,
}

impl Backend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "redb" => Some(Self::Redb),
            "sqlite" => Some(Self::Sqlite),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    /// Database file name inside the data directory
    pub fn file_name(&self) -> Option<&'static str> {
        match self {
            Self::Redb => Some("xreg.redb"),
            Self::Sqlite => Some("xreg.db"),
            Self::Memory => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Redb => "redb",
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Configuration for the CLI, as stored in `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Config {
    pub fn keys() -> &'static [&'static str] {
        &[
            "data_dir",
            "backend",
            "listen",
            "model_file",
            "registry_id",
            "auth_token",
        ]
    }

    /// A starting config with every key filled in
    pub fn initial() -> Self {
        Self {
            data_dir: Some(default_data_dir()),
            backend: Some(Backend::default()),
            listen: Some(xreg_server::DEFAULT_LISTEN.to_string()),
            model_file: None,
            registry_id: Some(xreg_server::service::DEFAULT_REGISTRY_ID.to_string()),
            auth_token: None,
        }
    }

    /// Load the config file, falling back to defaults when it is missing
    /// or unreadable
    pub fn load() -> Self {
        let path = config_file_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "data_dir" => self.data_dir.as_ref().map(|p| p.display().to_string()),
            "backend" => self.backend.map(|b| b.to_string()),
            "listen" => self.listen.clone(),
            "model_file" => self.model_file.as_ref().map(|p| p.display().to_string()),
            "registry_id" => self.registry_id.clone(),
            "auth_token" => self.auth_token.clone(),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let text = Some(value.to_string()).filter(|v| !v.is_empty());
        match key {
            "data_dir" => self.data_dir = text.map(PathBuf::from),
            "backend" => {
                self.backend = match text {
                    Some(v) => Some(Backend::parse(&v).ok_or_else(|| {
                        anyhow::anyhow!("Unknown backend {:?} (expected redb, sqlite or memory)", v)
                    })?),
                    None => None,
                }
            }
            "listen" => self.listen = text,
            "model_file" => self.model_file = text.map(PathBuf::from),
            "registry_id" => self.registry_id = text,
            "auth_token" => self.auth_token = text,
            _ => anyhow::bail!(
                "Unknown config key: {}. Available keys: {}",
                key,
                Self::keys().join(", ")
            ),
        }
        Ok(())
    }
}
