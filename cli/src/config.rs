// Configuration management for the proxtrace CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/proxtrace/config.json
// - Linux: ~/.config/proxtrace/config.json
// - Windows: %APPDATA%\proxtrace\config.json

use anyhow::{Context, Result};
use proxtrace_core::ProximityConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage path for the current identifier
    pub storage_path: Option<String>,

    /// Advertise/scan session length in milliseconds
    pub session_duration_ms: u64,

    /// Identifier rotation interval in milliseconds
    pub rotation_interval_ms: u64,

    /// RSSI readings kept per device
    pub max_signal_readings: usize,

    /// Virtual peers placed around the local device by `simulate`
    pub simulated_peers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let core = ProximityConfig::default();
        Self {
            storage_path: None,
            session_duration_ms: core.session_duration_ms,
            rotation_interval_ms: core.rotation_interval_ms,
            max_signal_readings: core.max_signal_readings,
            simulated_peers: 3,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("proxtrace");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("proxtrace");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Identifier storage location, defaulting to the data directory
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("identifier")),
        }
    }

    /// Core configuration with this file's overrides applied
    pub fn proximity_config(&self) -> Result<ProximityConfig> {
        let config = ProximityConfig {
            session_duration_ms: self.session_duration_ms,
            rotation_interval_ms: self.rotation_interval_ms,
            max_signal_readings: self.max_signal_readings,
            ..ProximityConfig::default()
        };
        config.validate().context("Invalid proximity configuration")?;
        Ok(config)
    }

    /// Set a config value without saving
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "session_duration_ms" => {
                self.session_duration_ms = value.parse().context("Invalid number")?;
            }
            "rotation_interval_ms" => {
                self.rotation_interval_ms = value.parse().context("Invalid number")?;
            }
            "max_signal_readings" => {
                self.max_signal_readings = value.parse().context("Invalid number")?;
            }
            "simulated_peers" => {
                self.simulated_peers = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.proximity_config()?;
        Ok(())
    }

    /// Set a config value and save
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "storage_path" => self.storage_path.clone(),
            "session_duration_ms" => Some(self.session_duration_ms.to_string()),
            "rotation_interval_ms" => Some(self.rotation_interval_ms.to_string()),
            "max_signal_readings" => Some(self.max_signal_readings.to_string()),
            "simulated_peers" => Some(self.simulated_peers.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "storage_path".to_string(),
                self.storage_path
                    .clone()
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
            (
                "session_duration_ms".to_string(),
                self.session_duration_ms.to_string(),
            ),
            (
                "rotation_interval_ms".to_string(),
                self.rotation_interval_ms.to_string(),
            ),
            (
                "max_signal_readings".to_string(),
                self.max_signal_readings.to_string(),
            ),
            ("simulated_peers".to_string(), self.simulated_peers.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session_duration_ms, 30_000);
        assert_eq!(config.rotation_interval_ms, 900_000);
        assert!(config.proximity_config().is_ok());
    }

    #[test]
    fn test_apply_validates() {
        let mut config = Config::default();
        config.apply("session_duration_ms", "5000").unwrap();
        assert_eq!(config.get("session_duration_ms").as_deref(), Some("5000"));

        assert!(config.apply("max_signal_readings", "0").is_err());
        assert!(config.apply("listen_port", "80").is_err());
    }
}
