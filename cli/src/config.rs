// Configuration management for the netlayer CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/netlayer/config.json
// - Linux: ~/.config/netlayer/config.json
// - Windows: %APPDATA%\netlayer\config.json

use anyhow::{Context, Result};
use netlayer_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log filter used when RUST_LOG is not set
    pub log_filter: String,

    /// Record every hook stage during `simulate`
    pub capture: bool,

    /// Engine settings applied to every simulation
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            capture: false,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("netlayer");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config = serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.engine.validate().context("Invalid engine settings in config file")?;
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

    /// Set a config value; engine keys are validated by the engine config
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "log_filter" => self.log_filter = value.to_string(),
            "capture" => self.capture = value.parse().context("Invalid boolean value")?,
            _ => self.engine.set(key, value)?,
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.list().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let engine = &self.engine;
        vec![
            ("log_filter".to_string(), self.log_filter.clone()),
            ("capture".to_string(), self.capture.to_string()),
            ("default_ttl".to_string(), engine.default_ttl.to_string()),
            ("default_multicast_ttl".to_string(), engine.default_multicast_ttl.to_string()),
            ("fragment_timeout_ms".to_string(), engine.fragment_timeout_ms.to_string()),
            ("force_broadcast".to_string(), engine.force_broadcast.to_string()),
            (
                "protocols".to_string(),
                engine
                    .protocols
                    .iter()
                    .map(u8::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            (
                "bit_error_seed".to_string(),
                engine
                    .bit_error_seed
                    .map_or_else(|| "none".to_string(), |seed| seed.to_string()),
            ),
        ]
    }
}
