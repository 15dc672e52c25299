//! Result/error aggregation
//!
//! Every orchestrator run produces one [`ConfigurationReport`]: the ordered
//! per-resource outcomes plus the overall status. Reports are built with a
//! [`ReportBuilder`] and are immutable once returned.

use crate::document::ResourceInstance;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{LifecycleCall, OperationKind, OutcomeKind, SetResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure detail attached to an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Data a provider returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeData {
    /// Current state from Get
    Instance(ResourceInstance),
    /// Sub-instances from Inventory
    Inventory(Vec<ResourceInstance>),
}

/// Outcome of one lifecycle call against one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub key: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub call: LifecycleCall,
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_desired_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OutcomeData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_result: Option<SetResult>,
}

impl OperationOutcome {
    fn base(instance: &ResourceInstance, call: LifecycleCall, kind: OutcomeKind) -> Self {
        Self {
            key: instance.key.clone(),
            type_name: instance.type_name.clone(),
            call,
            kind,
            error: None,
            in_desired_state: None,
            data: None,
            set_result: None,
        }
    }

    pub fn success(instance: &ResourceInstance, call: LifecycleCall) -> Self {
        Self::base(instance, call, OutcomeKind::Success)
    }

    /// A resource that was never invoked because the run stopped first
    pub fn skipped(instance: &ResourceInstance, call: LifecycleCall) -> Self {
        Self::base(instance, call, OutcomeKind::Skipped)
    }

    /// A failed call. A failed Test counts as not in desired state.
    pub fn failed(
        instance: &ResourceInstance,
        call: LifecycleCall,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::base(instance, call, OutcomeKind::Failed);
        outcome.error = Some(OutcomeError {
            kind,
            detail: detail.into(),
        });
        if call == LifecycleCall::Test {
            outcome.in_desired_state = Some(false);
        }
        outcome
    }

    pub fn with_desired_state(mut self, in_desired_state: bool) -> Self {
        self.in_desired_state = Some(in_desired_state);
        self
    }

    pub fn with_data(mut self, data: OutcomeData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_set_result(mut self, result: SetResult) -> Self {
        self.set_result = Some(result);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.kind == OutcomeKind::Failed
    }

    pub fn reboot_required(&self) -> bool {
        self.set_result == Some(SetResult::RebootRequired)
    }

    /// The typed error for a failed outcome
    pub fn to_error(&self) -> Option<Error> {
        let error = self.error.as_ref()?;
        Some(match error.kind {
            ErrorKind::ProviderNotFound => Error::ProviderNotFound {
                type_name: self.type_name.clone(),
                key: self.key.clone(),
            },
            _ => Error::ProviderInvocationFailed {
                key: self.key.clone(),
                call: self.call,
                detail: error.detail.clone(),
            },
        })
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

/// Counts of outcomes by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub succeeded: usize,
    pub changed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ReportSummary {
    pub fn add_outcome(&mut self, outcome: &OperationOutcome) {
        match outcome.kind {
            OutcomeKind::Success => {
                self.succeeded += 1;
                if outcome.set_result.is_some_and(|r| r.is_change()) {
                    self.changed += 1;
                }
            }
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Failed => self.failed += 1,
        }
    }

    /// Total number of resources reported
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// Report of one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationReport {
    pub operation: OperationKind,
    /// Name of the configuration document, when it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    pub status: RunStatus,
    pub outcomes: Vec<OperationOutcome>,
    /// Key of the first resource whose call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    /// AND of every Test result, for operations that test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_desired_state: Option<bool>,
    pub reboot_required: bool,
    pub reboot_node_if_needed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ConfigurationReport {
    /// Neither failed nor cancelled
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::RolledBack)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for outcome in &self.outcomes {
            summary.add_outcome(outcome);
        }
        summary
    }

    /// Convert a failed or cancelled run into its error
    ///
    /// A failed run yields the error of the outcome that ended it (the last
    /// failure); a cancelled run yields [`Error::Cancelled`] naming the last
    /// resource that completed.
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            RunStatus::Completed | RunStatus::RolledBack => Ok(self),
            RunStatus::Failed => Err(self
                .outcomes
                .iter()
                .rev()
                .find_map(OperationOutcome::to_error)
                .unwrap_or(Error::Cancelled { after: None })),
            RunStatus::Cancelled => Err(Error::Cancelled {
                after: self
                    .outcomes
                    .iter()
                    .rev()
                    .find(|o| o.kind != OutcomeKind::Skipped)
                    .map(|o| o.key.clone()),
            }),
        }
    }
}

/// Accumulates outcomes for one run
#[derive(Debug)]
pub struct ReportBuilder {
    operation: OperationKind,
    configuration: Option<String>,
    outcomes: Vec<OperationOutcome>,
    first_failure: Option<String>,
    in_desired_state: Option<bool>,
    reboot_node_if_needed: bool,
    started_at: DateTime<Utc>,
}

impl ReportBuilder {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            configuration: None,
            outcomes: Vec::new(),
            first_failure: None,
            in_desired_state: None,
            reboot_node_if_needed: false,
            started_at: Utc::now(),
        }
    }

    pub fn configuration(mut self, name: Option<&str>) -> Self {
        self.configuration = name.map(str::to_string);
        self
    }

    pub fn reboot_node_if_needed(mut self, reboot: bool) -> Self {
        self.reboot_node_if_needed = reboot;
        self
    }

    /// Record an outcome; Test outcomes feed the aggregate desired-state flag
    pub fn push(&mut self, outcome: OperationOutcome) {
        if outcome.is_failed() && self.first_failure.is_none() {
            self.first_failure = Some(outcome.key.clone());
        }
        if outcome.call == LifecycleCall::Test {
            let in_state = outcome.in_desired_state.unwrap_or(false);
            self.in_desired_state = Some(self.in_desired_state.unwrap_or(true) && in_state);
        }
        self.outcomes.push(outcome);
    }

    /// Aggregate desired-state flag so far (true when nothing was tested yet)
    pub fn in_desired_state(&self) -> bool {
        self.in_desired_state.unwrap_or(true)
    }

    /// Declare a test pass that had nothing to test
    pub fn tested_nothing(&mut self) {
        self.in_desired_state.get_or_insert(true);
    }

    pub fn finish(self, status: RunStatus) -> ConfigurationReport {
        let reboot_required = self.outcomes.iter().any(OperationOutcome::reboot_required);
        ConfigurationReport {
            operation: self.operation,
            configuration: self.configuration,
            status,
            outcomes: self.outcomes,
            first_failure: self.first_failure,
            in_desired_state: self.in_desired_state,
            reboot_required,
            reboot_node_if_needed: self.reboot_node_if_needed,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
