use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Host configuration file name inside the config dir
pub const CONFIG_FILE: &str = "lcm.toml";

/// Host settings from `lcm.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Where snapshots are kept; `~` and `$VAR` are expanded
    pub state_dir: Option<String>,
    /// Log level used when no `-v`/`-q`/`RUST_LOG` is given
    pub log_level: Option<String>,
}

impl HostConfig {
    /// Load from the config dir, or defaults if there is no config file
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve the state directory: CLI flag, then config file, then environment/platform default
    pub fn state_dir(&self, cli_override: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = cli_override {
            return Ok(dir.to_path_buf());
        }
        match &self.state_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::state_dir(),
        }
    }

    /// Parsed log level, if one is configured
    pub fn log_level(&self) -> Result<Option<log::LevelFilter>> {
        self.log_level
            .as_deref()
            .map(|level| {
                level
                    .parse::<log::LevelFilter>()
                    .map_err(|_| anyhow::anyhow!("Invalid log_level in {CONFIG_FILE}: {level}"))
            })
            .transpose()
    }
}
