//! Server configuration
//!
//! Read from the JSON file named by `SIMLINK_CONFIG`, falling back to
//! `<config dir>/simlink/config.json`. A missing file means defaults; a
//! file that exists but does not parse is an error. Durations are
//! milliseconds, and any omitted field keeps its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simlink_adapters::DemoConfig;
use simlink_engine::{HealthMonitorConfig, PollingConfig};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_ENV: &str = "SIMLINK_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the status API listens on
    pub bind_address: SocketAddr,

    pub health: HealthMonitorConfig,
    pub polling: PollingConfig,
    pub demo: DemoConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 9100)),
            health: HealthMonitorConfig::default(),
            polling: PollingConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from the environment-selected or per-user config file
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Reject intervals and bounds the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.health.validate()?;
        self.polling.validate()?;
        self.demo.validation.check()?;
        Ok(())
    }
}

fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("simlink").join("config.json"))
}
