//! LCM meta-configuration
//!
//! Settings that govern the manager itself rather than the machine:
//! how configurations arrive, how drift is handled and the reboot policy.

use crate::document::DocumentFormat;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Lowest allowed consistency-check interval
pub const MIN_CONFIGURATION_MODE_FREQUENCY_MINS: u32 = 15;
/// Lowest allowed refresh interval
pub const MIN_REFRESH_FREQUENCY_MINS: u32 = 30;

/// How new configurations reach the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshMode {
    #[default]
    Push,
    Pull,
    Disabled,
}

/// What the periodic consistency check does about drift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigurationMode {
    /// Apply once; never check afterwards
    ApplyOnly,
    /// Check and report drift
    ApplyAndMonitor,
    /// Check and re-apply on drift
    #[default]
    ApplyAndAutoCorrect,
}

/// What happens to an interrupted configuration after a reboot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActionAfterReboot {
    #[default]
    ContinueConfiguration,
    StopConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfiguration {
    pub refresh_mode: RefreshMode,
    pub configuration_mode: ConfigurationMode,
    pub configuration_mode_frequency_mins: u32,
    pub refresh_frequency_mins: u32,
    pub reboot_node_if_needed: bool,
    pub action_after_reboot: ActionAfterReboot,
    pub debug_mode: bool,
}

impl Default for MetaConfiguration {
    fn default() -> Self {
        Self {
            refresh_mode: RefreshMode::default(),
            configuration_mode: ConfigurationMode::default(),
            configuration_mode_frequency_mins: MIN_CONFIGURATION_MODE_FREQUENCY_MINS,
            refresh_frequency_mins: MIN_REFRESH_FREQUENCY_MINS,
            reboot_node_if_needed: false,
            action_after_reboot: ActionAfterReboot::default(),
            debug_mode: false,
        }
    }
}

impl MetaConfiguration {
    /// Parse and validate
    pub fn parse(raw: &str, format: DocumentFormat) -> Result<Self> {
        let meta: Self = match format {
            DocumentFormat::Toml => toml::from_str(raw).map_err(invalid)?,
            DocumentFormat::Json => serde_json::from_str(raw).map_err(invalid)?,
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Read a meta-configuration file, detecting the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| {
            invalid(format!(
                "unsupported meta configuration format (expected .toml or .json): {}",
                path.display()
            ))
        })?;
        let content = fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    pub fn validate(&self) -> Result<()> {
        if self.configuration_mode_frequency_mins < MIN_CONFIGURATION_MODE_FREQUENCY_MINS {
            return Err(invalid(format!(
                "configuration_mode_frequency_mins must be at least {MIN_CONFIGURATION_MODE_FREQUENCY_MINS}, got {}",
                self.configuration_mode_frequency_mins
            )));
        }
        if self.refresh_frequency_mins < MIN_REFRESH_FREQUENCY_MINS {
            return Err(invalid(format!(
                "refresh_frequency_mins must be at least {MIN_REFRESH_FREQUENCY_MINS}, got {}",
                self.refresh_frequency_mins
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl fmt::Display) -> Error {
    Error::InvalidMetaConfiguration {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let meta = MetaConfiguration::default();
        assert_eq!(meta.refresh_mode, RefreshMode::Push);
        assert_eq!(meta.configuration_mode, ConfigurationMode::ApplyAndAutoCorrect);
        assert_eq!(meta.configuration_mode_frequency_mins, 15);
        assert_eq!(meta.refresh_frequency_mins, 30);
        assert!(!meta.reboot_node_if_needed);
        assert_eq!(meta.action_after_reboot, ActionAfterReboot::ContinueConfiguration);
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
configuration_mode = "ApplyAndMonitor"
reboot_node_if_needed = true
"#;
        let meta = MetaConfiguration::parse(raw, DocumentFormat::Toml).unwrap();
        assert_eq!(meta.configuration_mode, ConfigurationMode::ApplyAndMonitor);
        assert!(meta.reboot_node_if_needed);
        assert_eq!(meta.refresh_frequency_mins, 30);
    }

    #[test]
    fn test_json() {
        let raw = r#"{"refresh_mode": "Pull", "refresh_frequency_mins": 60}"#;
        let meta = MetaConfiguration::parse(raw, DocumentFormat::Json).unwrap();
        assert_eq!(meta.refresh_mode, RefreshMode::Pull);
        assert_eq!(meta.refresh_frequency_mins, 60);
    }

    #[test]
    fn test_frequency_floors() {
        let err = MetaConfiguration::parse("configuration_mode_frequency_mins = 5", DocumentFormat::Toml)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetaConfiguration);
        assert!(err.to_string().contains("at least 15"));

        let err = MetaConfiguration::parse("refresh_frequency_mins = 29", DocumentFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("at least 30"));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = MetaConfiguration::parse(r#"configuration_mode = "Sometimes""#, DocumentFormat::Toml)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetaConfiguration);
    }
}
