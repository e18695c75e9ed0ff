//! Gateway settings
//!
//! Manages gateway settings stored in ~/.callgres/config.toml

use crate::config::ConnectionConfig;
use crate::error::ConfigResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Command timeout applied when a spec carries none, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Bypass the routine-metadata cache (for environments where routines
    /// are hot-swapped under a running process)
    #[serde(default)]
    pub disable_routine_cache: bool,

    /// Schema applied to operation names without an explicit schema part
    #[serde(default = "default_schema")]
    pub default_schema: String,

    /// Root directory holding per-profile remediation scripts
    #[serde(default)]
    pub script_root: Option<PathBuf>,
}

fn default_command_timeout() -> u64 {
    30
}

fn default_schema() -> String {
    "amdb".to_string()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            disable_routine_cache: false,
            default_schema: default_schema(),
            script_root: None,
        }
    }
}

impl GatewaySettings {
    /// Command timeout as a [`Duration`]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Load settings from the config file, falling back to defaults when the
/// file does not exist
pub fn load_settings() -> ConfigResult<GatewaySettings> {
    let path = ConnectionConfig::config_dir()?.join("config.toml");
    if !path.exists() {
        return Ok(GatewaySettings::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| crate::error::ConfigError::NotFound(format!("Failed to read config: {}", e)))?;
    let settings: GatewaySettings = toml::from_str(&content)?;
    Ok(settings)
}
