//! Core value types shared across the engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named property values of a resource instance
pub type PropertyBag = BTreeMap<String, PropertyValue>;

/// A single property value
///
/// Documents may only carry strings, booleans, integers, lists and nested
/// instances. Floats and nulls are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<PropertyValue>),
    Instance(PropertyBag),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&PropertyBag> {
        match self {
            Self::Instance(bag) => Some(bag),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::Instance(bag) => {
                let rendered: Vec<String> = bag.iter().map(|(k, v)| format!("{k} = {v}")).collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(value: Vec<PropertyValue>) -> Self {
        Self::List(value)
    }
}

impl From<PropertyBag> for PropertyValue {
    fn from(value: PropertyBag) -> Self {
        Self::Instance(value)
    }
}

/// Lifecycle call issued against a resource provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleCall {
    Get,
    Test,
    Set,
    Inventory,
}

impl fmt::Display for LifecycleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "Get",
            Self::Test => "Test",
            Self::Set => "Set",
            Self::Inventory => "Inventory",
        };
        f.write_str(name)
    }
}

/// Result kind of a single resource invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    Skipped,
    Failed,
}

/// What a provider reports after a successful Set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetResult {
    /// System already matched; nothing was changed
    NoChange,
    /// Changes were made
    Applied,
    /// Changes were made and only take effect after a reboot
    RebootRequired,
}

impl SetResult {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

/// Operations the configuration manager supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    GetConfiguration,
    TestConfiguration,
    PerformInventory,
    PerformInventoryOOB,
    SendConfiguration,
    SendConfigurationApply,
    ApplyConfiguration,
    RollBack,
    PerformRequiredConfigurationChecks,
    StopConfiguration,
    SendMetaConfigurationApply,
    GetMetaConfiguration,
}

impl OperationKind {
    pub const ALL: [OperationKind; 12] = [
        Self::GetConfiguration,
        Self::TestConfiguration,
        Self::PerformInventory,
        Self::PerformInventoryOOB,
        Self::SendConfiguration,
        Self::SendConfigurationApply,
        Self::ApplyConfiguration,
        Self::RollBack,
        Self::PerformRequiredConfigurationChecks,
        Self::StopConfiguration,
        Self::SendMetaConfigurationApply,
        Self::GetMetaConfiguration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetConfiguration => "GetConfiguration",
            Self::TestConfiguration => "TestConfiguration",
            Self::PerformInventory => "PerformInventory",
            Self::PerformInventoryOOB => "PerformInventoryOOB",
            Self::SendConfiguration => "SendConfiguration",
            Self::SendConfigurationApply => "SendConfigurationApply",
            Self::ApplyConfiguration => "ApplyConfiguration",
            Self::RollBack => "RollBack",
            Self::PerformRequiredConfigurationChecks => "PerformRequiredConfigurationChecks",
            Self::StopConfiguration => "StopConfiguration",
            Self::SendMetaConfigurationApply => "SendMetaConfigurationApply",
            Self::GetMetaConfiguration => "GetMetaConfiguration",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    /// Operation names match case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Operation {s} is not supported"))
    }
}

/// Orchestrator run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Resolving,
    Executing,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

/// Trigger flags for required configuration checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFlags(u32);

impl CheckFlags {
    /// Regular interval consistency check
    pub const REGULAR: CheckFlags = CheckFlags(1);
    /// Check triggered at boot
    pub const BOOT: CheckFlags = CheckFlags(2);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: CheckFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for CheckFlags {
    fn default() -> Self {
        Self::REGULAR
    }
}
