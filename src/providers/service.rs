//! Service provider - systemd units

use crate::runner::{CommandRunner, SystemRunner, command_exists};
use anyhow::{Context, Result, bail};
use lcm_engine::{PropertyBag, ResourceInstance, ResourceProvider, SetResult};
use std::sync::Arc;

pub const TYPE_NAME: &str = "Service";

const SYSTEMCTL: &str = "systemctl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunningState {
    Running,
    Stopped,
}

impl RunningState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Desired state; unset fields are left alone
#[derive(Debug)]
struct DesiredService {
    unit: String,
    state: Option<RunningState>,
    enabled: Option<bool>,
}

impl DesiredService {
    fn from_instance(instance: &ResourceInstance) -> Result<Self> {
        let name = instance
            .string_property("name")
            .with_context(|| format!("{} is missing the 'name' property", instance.key))?;

        if let Some(controller) = instance.string_property("controller")
            && controller != "systemd"
        {
            bail!("unsupported controller '{controller}': the Service provider only drives systemd");
        }

        let state = match instance.string_property("state") {
            None => None,
            Some("running") => Some(RunningState::Running),
            Some("stopped") => Some(RunningState::Stopped),
            Some(other) => bail!("invalid state '{other}' (expected running or stopped)"),
        };

        Ok(Self {
            unit: unit_name(name),
            state,
            enabled: instance.bool_property("enabled"),
        })
    }
}

fn unit_name(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{name}.service")
    }
}

/// Manages systemd services through `systemctl`
#[derive(Debug, Clone)]
pub struct ServiceProvider {
    runner: Arc<dyn CommandRunner>,
}

impl ServiceProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Load against the host's systemctl
    pub fn load() -> Result<Self> {
        if !command_exists(SYSTEMCTL) {
            bail!("{SYSTEMCTL} not found; the Service provider needs systemd");
        }
        Ok(Self::new(Arc::new(SystemRunner)))
    }

    fn systemctl(&self, args: &[&str]) -> Result<String> {
        let output = self.runner.run(SYSTEMCTL, args)?.check(SYSTEMCTL, args)?;
        Ok(output.stdout)
    }

    /// `is-active`/`is-enabled` exit non-zero for the negative answer
    fn query(&self, verb: &str, unit: &str) -> Result<String> {
        let output = self.runner.run(SYSTEMCTL, &[verb, unit])?;
        Ok(output.stdout.trim().to_string())
    }

    fn running_state(&self, unit: &str) -> Result<RunningState> {
        Ok(match self.query("is-active", unit)?.as_str() {
            "active" | "activating" | "reloading" => RunningState::Running,
            _ => RunningState::Stopped,
        })
    }

    fn is_enabled(&self, unit: &str) -> Result<bool> {
        Ok(matches!(
            self.query("is-enabled", unit)?.as_str(),
            "enabled" | "enabled-runtime" | "alias" | "static"
        ))
    }

    fn in_desired_state(&self, want: &DesiredService) -> Result<bool> {
        if let Some(state) = want.state
            && self.running_state(&want.unit)? != state
        {
            return Ok(false);
        }
        if let Some(enabled) = want.enabled
            && self.is_enabled(&want.unit)? != enabled
        {
            return Ok(false);
        }
        Ok(true)
    }
}

fn describe(unit: &str, state: RunningState, enabled: Option<bool>) -> PropertyBag {
    let mut properties = PropertyBag::new();
    properties.insert("name".into(), unit.into());
    properties.insert("state".into(), state.as_str().into());
    if let Some(enabled) = enabled {
        properties.insert("enabled".into(), enabled.into());
    }
    properties
}

impl ResourceProvider for ServiceProvider {
    fn get(&self, desired: &ResourceInstance) -> Result<ResourceInstance> {
        let want = DesiredService::from_instance(desired)?;
        let state = self.running_state(&want.unit)?;
        let enabled = self.is_enabled(&want.unit)?;
        Ok(desired.with_properties(describe(&want.unit, state, Some(enabled))))
    }

    fn test(&self, desired: &ResourceInstance) -> Result<bool> {
        let want = DesiredService::from_instance(desired)?;
        self.in_desired_state(&want)
    }

    fn set(&self, desired: &ResourceInstance) -> Result<SetResult> {
        let want = DesiredService::from_instance(desired)?;
        let mut changed = false;

        if let Some(enabled) = want.enabled
            && self.is_enabled(&want.unit)? != enabled
        {
            let verb = if enabled { "enable" } else { "disable" };
            self.systemctl(&[verb, &want.unit])?;
            log::info!("systemctl {verb} {}", want.unit);
            changed = true;
        }

        if let Some(state) = want.state
            && self.running_state(&want.unit)? != state
        {
            let verb = match state {
                RunningState::Running => "start",
                RunningState::Stopped => "stop",
            };
            self.systemctl(&[verb, &want.unit])?;
            log::info!("systemctl {verb} {}", want.unit);
            changed = true;
        }

        Ok(if changed {
            SetResult::Applied
        } else {
            SetResult::NoChange
        })
    }

    fn inventory(&self, filter: &ResourceInstance) -> Result<Vec<ResourceInstance>> {
        let pattern = filter
            .string_property("name")
            .map_or_else(|| "*.service".to_string(), unit_name);
        let listing = self.systemctl(&[
            "list-units",
            "--type=service",
            "--all",
            "--no-legend",
            "--plain",
            &pattern,
        ])?;

        // UNIT LOAD ACTIVE SUB DESCRIPTION
        let items = listing
            .lines()
            .filter_map(|line| {
                let mut columns = line.split_whitespace();
                let unit = columns.next()?;
                let active = columns.nth(1)?;
                let state = if active == "active" {
                    RunningState::Running
                } else {
                    RunningState::Stopped
                };
                Some(ResourceInstance {
                    properties: describe(unit, state, None),
                    ..ResourceInstance::new(TYPE_NAME, ResourceInstance::key_for(TYPE_NAME, unit))
                })
            })
            .collect();
        Ok(items)
    }
}
