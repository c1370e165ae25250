// Configuration management for the MECP CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/mecp/config.json
// - Linux: ~/.config/mecp/config.json
// - Windows: %APPDATA%\mecp\config.json

use anyhow::{Context, Result};
use mecp_core::MeshSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Node preferences shared with the core
    #[serde(flatten)]
    pub mesh: MeshSettings,

    /// Storage path for the message database
    #[serde(default)]
    pub storage_path: Option<String>,
}

const KEYS: &[&str] = &[
    "language",
    "auto_gps",
    "auto_timestamp",
    "notify_mayday",
    "notify_urgent",
    "notify_safety",
    "notify_routine",
    "dedup_window_secs",
    "ack_timeout_secs",
    "drill_max_transmits",
    "storage_path",
];

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("mecp");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("mecp");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Where the sled database lives: the configured path, or the data directory
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("store")),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.mesh.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    /// Set a config value in memory. The result must still validate.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        let mesh = &mut next.mesh;
        match key {
            "language" => mesh.language = value.to_string(),
            "auto_gps" => mesh.auto_gps = parse_bool(value)?,
            "auto_timestamp" => mesh.auto_timestamp = parse_bool(value)?,
            "notify_mayday" => mesh.notify_mayday = parse_bool(value)?,
            "notify_urgent" => mesh.notify_urgent = parse_bool(value)?,
            "notify_safety" => mesh.notify_safety = parse_bool(value)?,
            "notify_routine" => mesh.notify_routine = parse_bool(value)?,
            "dedup_window_secs" => {
                mesh.dedup_window_secs = value.parse().context("Invalid number")?;
            }
            "ack_timeout_secs" => {
                mesh.ack_timeout_secs = value.parse().context("Invalid number")?;
            }
            "drill_max_transmits" => {
                mesh.drill_max_transmits = value.parse().context("Invalid number")?;
            }
            "storage_path" => {
                next.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        next.mesh.validate()?;
        *self = next;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        let mesh = &self.mesh;
        match key {
            "language" => Some(mesh.language.clone()),
            "auto_gps" => Some(mesh.auto_gps.to_string()),
            "auto_timestamp" => Some(mesh.auto_timestamp.to_string()),
            "notify_mayday" => Some(mesh.notify_mayday.to_string()),
            "notify_urgent" => Some(mesh.notify_urgent.to_string()),
            "notify_safety" => Some(mesh.notify_safety.to_string()),
            "notify_routine" => Some(mesh.notify_routine.to_string()),
            "dedup_window_secs" => Some(mesh.dedup_window_secs.to_string()),
            "ack_timeout_secs" => Some(mesh.ack_timeout_secs.to_string()),
            "drill_max_transmits" => Some(mesh.drill_max_transmits.to_string()),
            "storage_path" => self.storage_path.clone(),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key).unwrap_or_else(|| "(auto)".to_string());
                (key.to_string(), value)
            })
            .collect()
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    value.parse().context("Invalid boolean value")
}
