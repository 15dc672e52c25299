//! Configuration orchestrator
//!
//! [`Lcm`] is the entry point for every operation. Each operation resolves
//! the document it targets, drives the resources through one lifecycle call
//! in dependency order and returns a [`ConfigurationReport`].
//!
//! Runs that can change the machine or the stored snapshots (send, apply,
//! rollback, periodic checks, meta apply) are exclusive: a second one gets
//! [`Error::Busy`] unless it is forced, in which case the in-flight run is
//! told to abort and the new run starts once it has stopped. Get, Test and
//! Inventory only read snapshots and never wait.
//!
//! With a persistent store the exclusion extends to every process sharing
//! the state directory: an exclusive run holds the directory's run lock,
//! reloads the snapshots under it, and polls for stop requests written by
//! other processes between resources.

use crate::cancel::{CancellationToken, StopMode};
use crate::document::{Document, ResourceInstance};
use crate::error::{Error, Result};
use crate::events::{EventSink, LogSink};
use crate::executor;
use crate::meta::{ConfigurationMode, MetaConfiguration};
use crate::provider::{ProviderRegistry, ProviderSet};
use crate::report::{ConfigurationReport, OperationOutcome, ReportBuilder, RunStatus};
use crate::resolver;
use crate::runlock::{self, RunLock};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::types::{CheckFlags, LifecycleCall, OperationKind, RunState};
use log::Level;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Builder for [`Lcm`]
#[derive(Default)]
pub struct LcmBuilder {
    registry: ProviderRegistry,
    store: Option<SnapshotStore>,
    events: Option<Arc<dyn EventSink>>,
}

impl LcmBuilder {
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Lcm {
        Lcm {
            registry: self.registry,
            store: self.store.unwrap_or_default(),
            events: self.events.unwrap_or_else(|| Arc::new(LogSink)),
            control: Mutex::new(Control::default()),
            released: Condvar::new(),
            state: Mutex::new(RunState::Idle),
        }
    }
}

#[derive(Default)]
struct Control {
    busy: bool,
    token: Option<CancellationToken>,
}

/// How a pass over the ordered resources ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassEnd {
    Finished,
    Failed,
    Cancelled,
}

struct Pass<'a> {
    call: LifecycleCall,
    operation: OperationKind,
    cancel: Option<&'a CancellationToken>,
    stop_on_failure: bool,
}

/// An exclusive run; releases the run slot (and the machine lock) on drop
struct RunGuard<'a> {
    lcm: &'a Lcm,
    token: CancellationToken,
    machine: Option<RunLock>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        drop(self.machine.take());
        let mut control = self.lcm.control();
        control.busy = false;
        control.token = None;
        drop(control);
        self.lcm.released.notify_all();
    }
}

/// The Local Configuration Manager
pub struct Lcm {
    registry: ProviderRegistry,
    store: SnapshotStore,
    events: Arc<dyn EventSink>,
    control: Mutex<Control>,
    released: Condvar,
    state: Mutex<RunState>,
}

impl std::fmt::Debug for Lcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lcm")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Lcm {
    pub fn builder() -> LcmBuilder {
        LcmBuilder::default()
    }

    /// State of the most recent exclusive run
    pub fn state(&self) -> RunState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Whether the in-flight exclusive run has been asked to stop
    pub fn is_stop_requested(&self) -> bool {
        self.control()
            .token
            .as_ref()
            .is_some_and(CancellationToken::is_requested)
    }

    /// Pending/current/previous documents as of the last operation
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Read-only operations
    // ------------------------------------------------------------------

    /// Get every resource of a document, or of the current configuration
    pub fn get_configuration(&self, document: Option<Document>) -> Result<ConfigurationReport> {
        let operation = OperationKind::GetConfiguration;
        let document = match document {
            Some(document) => Arc::new(document),
            None => self.stored_current()?,
        };
        self.read_only(&document, LifecycleCall::Get, operation)
    }

    /// Test the current configuration; the report's `in_desired_state` is the AND of all tests
    pub fn test_configuration(&self) -> Result<ConfigurationReport> {
        let document = self.stored_current()?;
        self.read_only(&document, LifecycleCall::Test, OperationKind::TestConfiguration)
    }

    /// Inventory of the current configuration
    pub fn perform_inventory(&self) -> Result<ConfigurationReport> {
        let document = self.stored_current()?;
        self.read_only(&document, LifecycleCall::Inventory, OperationKind::PerformInventory)
    }

    /// Inventory of an externally supplied document
    pub fn perform_inventory_oob(&self, document: Document) -> Result<ConfigurationReport> {
        self.read_only(&document, LifecycleCall::Inventory, OperationKind::PerformInventoryOOB)
    }

    fn stored_current(&self) -> Result<Arc<Document>> {
        self.store.reload()?;
        self.store.current().ok_or(Error::NoCurrentConfiguration)
    }

    fn read_only(
        &self,
        document: &Document,
        call: LifecycleCall,
        operation: OperationKind,
    ) -> Result<ConfigurationReport> {
        crate::emit!(
            self.events.as_ref(),
            Level::Info,
            op: Some(operation),
            "{operation} started ({} resources)",
            document.len()
        );

        let plan = self.plan(document)?;
        let mut builder = ReportBuilder::new(operation).configuration(document.name());
        if call == LifecycleCall::Test {
            builder.tested_nothing();
        }

        let mut providers = ProviderSet::new(&self.registry, self.events.as_ref());
        let pass = Pass {
            call,
            operation,
            cancel: None,
            stop_on_failure: false,
        };
        self.execute_pass(&plan, &pass, &mut builder, &mut providers);
        drop(providers);

        let report = builder.finish(RunStatus::Completed);
        self.log_finished(&report);
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Exclusive operations
    // ------------------------------------------------------------------

    /// Validate and stage a document for a later apply
    pub fn send_configuration(&self, document: Document, force: bool) -> Result<Arc<Document>> {
        let operation = OperationKind::SendConfiguration;
        let _run = self.begin(operation, force)?;
        let staged = self.stage(document, operation)?;
        self.set_state(operation, RunState::Completed);
        Ok(staged)
    }

    /// Stage a document and apply it in the same run
    pub fn send_configuration_apply(
        &self,
        document: Document,
        force: bool,
    ) -> Result<ConfigurationReport> {
        let operation = OperationKind::SendConfigurationApply;
        let run = self.begin(operation, force)?;
        let staged = self.stage(document, operation)?;
        self.apply(&run, staged, operation)
    }

    /// Apply the pending document, or re-apply the current one
    pub fn apply_configuration(&self) -> Result<ConfigurationReport> {
        let operation = OperationKind::ApplyConfiguration;
        let run = self.begin(operation, false)?;
        let snapshot = self.store.snapshot();
        let Some(document) = snapshot.pending.or(snapshot.current) else {
            return self.abort(operation, Error::NoCurrentConfiguration);
        };
        self.apply(&run, document, operation)
    }

    /// Re-apply the previous configuration and make it current again
    pub fn roll_back(&self) -> Result<ConfigurationReport> {
        let operation = OperationKind::RollBack;
        let run = self.begin(operation, false)?;
        let Some(target) = self.store.previous() else {
            return self.abort(operation, Error::NoPreviousConfiguration);
        };

        self.set_state(operation, RunState::Resolving);
        let plan = match self.plan(&target) {
            Ok(plan) => plan,
            Err(e) => return self.abort(operation, e),
        };

        let (builder, end) = self.set_pass(&run, &target, &plan, operation);
        let status = match end {
            PassEnd::Finished => {
                if let Err(e) = self.store.complete_rollback(Arc::clone(&target)) {
                    return self.abort(operation, e);
                }
                RunStatus::RolledBack
            }
            PassEnd::Failed => RunStatus::Failed,
            PassEnd::Cancelled => RunStatus::Cancelled,
        };
        Ok(self.finish(operation, builder, status))
    }

    /// Consistency check, triggered by a schedule or at boot
    ///
    /// A boot-time check applies a pending document if there is one.
    /// Otherwise the current configuration is tested and, depending on the
    /// meta configuration mode, re-applied when it has drifted.
    pub fn perform_required_configuration_checks(
        &self,
        flags: CheckFlags,
    ) -> Result<ConfigurationReport> {
        let operation = OperationKind::PerformRequiredConfigurationChecks;
        let run = self.begin(operation, false)?;
        let snapshot = self.store.snapshot();
        let meta = self.store.meta();

        if flags.contains(CheckFlags::BOOT)
            && let Some(pending) = snapshot.pending
        {
            crate::emit!(
                self.events.as_ref(),
                Level::Info,
                op: Some(operation),
                "boot check: applying pending configuration"
            );
            return self.apply(&run, pending, operation);
        }

        let Some(current) = snapshot.current else {
            crate::emit!(
                self.events.as_ref(),
                Level::Info,
                op: Some(operation),
                "no current configuration, nothing to check"
            );
            return Ok(self.finish(operation, ReportBuilder::new(operation), RunStatus::Completed));
        };

        let builder = ReportBuilder::new(operation)
            .configuration(current.name())
            .reboot_node_if_needed(meta.reboot_node_if_needed);

        if meta.configuration_mode == ConfigurationMode::ApplyOnly {
            crate::emit!(
                self.events.as_ref(),
                Level::Info,
                op: Some(operation),
                "configuration mode is ApplyOnly, skipping consistency check"
            );
            return Ok(self.finish(operation, builder, RunStatus::Completed));
        }

        self.set_state(operation, RunState::Resolving);
        let plan = match self.plan(&current) {
            Ok(plan) => plan,
            Err(e) => return self.abort(operation, e),
        };

        self.set_state(operation, RunState::Executing);
        let mut builder = builder;
        builder.tested_nothing();
        let mut providers = ProviderSet::new(&self.registry, self.events.as_ref());

        let test = Pass {
            call: LifecycleCall::Test,
            operation,
            cancel: Some(&run.token),
            stop_on_failure: false,
        };
        if self.execute_pass(&plan, &test, &mut builder, &mut providers) == PassEnd::Cancelled {
            drop(providers);
            return Ok(self.finish(operation, builder, RunStatus::Cancelled));
        }

        if builder.in_desired_state() {
            drop(providers);
            return Ok(self.finish(operation, builder, RunStatus::Completed));
        }

        if meta.configuration_mode == ConfigurationMode::ApplyAndMonitor {
            crate::emit!(
                self.events.as_ref(),
                Level::Warn,
                op: Some(operation),
                "configuration drift detected"
            );
            drop(providers);
            return Ok(self.finish(operation, builder, RunStatus::Completed));
        }

        crate::emit!(
            self.events.as_ref(),
            Level::Warn,
            op: Some(operation),
            "configuration drift detected, re-applying current configuration"
        );
        let set = Pass {
            call: LifecycleCall::Set,
            operation,
            cancel: Some(&run.token),
            stop_on_failure: true,
        };
        let end = self.execute_pass(&plan, &set, &mut builder, &mut providers);
        drop(providers);
        Ok(self.finish(operation, builder, pass_status(end)))
    }

    /// Ask the in-flight exclusive run to stop at the next resource boundary
    ///
    /// Returns false when nothing is running. A run held by another process
    /// sharing the state directory is reached through its stop request file.
    /// With `force` the resources that were not reached are reported as
    /// skipped.
    pub fn stop_configuration(&self, force: bool) -> Result<bool> {
        let operation = OperationKind::StopConfiguration;
        let mode = if force { StopMode::Abort } else { StopMode::Graceful };

        let token = self.control().token.clone();
        if let Some(token) = token {
            token.request(mode);
            crate::emit!(
                self.events.as_ref(),
                Level::Info,
                op: Some(operation),
                "stop requested ({mode:?})"
            );
            return Ok(true);
        }

        if let Some(dir) = self.store.dir()
            && RunLock::is_held(dir)?
        {
            runlock::request_stop(dir, mode)?;
            crate::emit!(
                self.events.as_ref(),
                Level::Info,
                op: Some(operation),
                "stop requested from another process ({mode:?})"
            );
            return Ok(true);
        }

        crate::emit!(
            self.events.as_ref(),
            Level::Info,
            op: Some(operation),
            "no configuration run in progress"
        );
        Ok(false)
    }

    /// Validate and store a new meta-configuration
    pub fn send_meta_configuration_apply(&self, meta: MetaConfiguration) -> Result<()> {
        let operation = OperationKind::SendMetaConfigurationApply;
        let _run = self.begin(operation, false)?;
        self.set_state(operation, RunState::Resolving);
        if let Err(e) = meta.validate() {
            return self.abort(operation, e);
        }
        self.set_state(operation, RunState::Executing);
        if let Err(e) = self.store.set_meta(meta) {
            return self.abort(operation, e);
        }
        self.set_state(operation, RunState::Completed);
        Ok(())
    }

    pub fn get_meta_configuration(&self) -> Result<Arc<MetaConfiguration>> {
        self.store.reload()?;
        Ok(self.store.meta())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn control(&self) -> MutexGuard<'_, Control> {
        match self.control.lock() {
            Ok(control) => control,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim the exclusive run slot
    fn begin(&self, operation: OperationKind, force: bool) -> Result<RunGuard<'_>> {
        let mut control = self.control();

        if control.busy {
            if !force {
                crate::emit!(
                    self.events.as_ref(),
                    Level::Warn,
                    op: Some(operation),
                    "another configuration run is in progress"
                );
                return Err(Error::Busy);
            }

            crate::emit!(
                self.events.as_ref(),
                Level::Warn,
                op: Some(operation),
                "force: stopping the configuration run in progress"
            );
            while control.busy {
                if let Some(token) = &control.token {
                    token.request(StopMode::Abort);
                }
                control = match self.released.wait(control) {
                    Ok(control) => control,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        }

        let token = CancellationToken::new();
        control.busy = true;
        control.token = Some(token.clone());
        drop(control);

        let mut run = RunGuard {
            lcm: self,
            token,
            machine: None,
        };
        if let Some(dir) = self.store.dir() {
            run.machine = Some(self.lock_machine(dir, operation, force)?);
            self.store.reload()?;
        }

        crate::emit!(self.events.as_ref(), Level::Info, op: Some(operation), "{operation} started");
        Ok(run)
    }

    /// Take the state directory's run lock, preempting its holder when forced
    fn lock_machine(&self, dir: &Path, operation: OperationKind, force: bool) -> Result<RunLock> {
        let lock = match RunLock::try_acquire(dir)? {
            Some(lock) => lock,
            None if !force => {
                crate::emit!(
                    self.events.as_ref(),
                    Level::Warn,
                    op: Some(operation),
                    "another process is running a configuration"
                );
                return Err(Error::Busy);
            }
            None => {
                crate::emit!(
                    self.events.as_ref(),
                    Level::Warn,
                    op: Some(operation),
                    "force: stopping the configuration run of another process"
                );
                runlock::request_stop(dir, StopMode::Abort)?;
                RunLock::acquire(dir)?
            }
        };

        // a request aimed at an earlier run
        runlock::clear_stop(dir)?;
        Ok(lock)
    }

    /// Fold a stop request written by another process into the run's token
    fn poll_stop_request(&self, token: &CancellationToken, operation: OperationKind) {
        let Some(dir) = self.store.dir() else {
            return;
        };
        match runlock::read_stop(dir) {
            Ok(Some(mode)) => token.request(mode),
            Ok(None) => {}
            Err(e) => crate::emit!(
                self.events.as_ref(),
                Level::Warn,
                op: Some(operation),
                "failed to read stop request: {e}"
            ),
        }
    }

    fn set_state(&self, operation: OperationKind, next: RunState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        crate::emit!(
            self.events.as_ref(),
            Level::Debug,
            op: Some(operation),
            "state {:?} -> {next:?}",
            *state
        );
        *state = next;
    }

    /// Fail an exclusive run before any provider was invoked
    fn abort<T>(&self, operation: OperationKind, error: Error) -> Result<T> {
        crate::emit!(self.events.as_ref(), Level::Error, op: Some(operation), "{error}");
        self.set_state(operation, RunState::Failed);
        Err(error)
    }

    fn stage(&self, document: Document, operation: OperationKind) -> Result<Arc<Document>> {
        self.set_state(operation, RunState::Resolving);
        if let Err(e) = resolver::order(&document) {
            return self.abort(operation, e);
        }
        match self.store.stage(document) {
            Ok(staged) => {
                crate::emit!(
                    self.events.as_ref(),
                    Level::Info,
                    op: Some(operation),
                    "staged configuration {}",
                    staged.name().unwrap_or("(unnamed)")
                );
                Ok(staged)
            }
            Err(e) => self.abort(operation, e),
        }
    }

    /// Resolve and look up the resources in application order
    fn plan<'d>(&self, document: &'d Document) -> Result<Vec<&'d ResourceInstance>> {
        resolver::order(document)?
            .iter()
            .map(|key| document.get(key))
            .collect()
    }

    /// Full Set pass against a document, promoting it to current on success
    fn apply(
        &self,
        run: &RunGuard<'_>,
        document: Arc<Document>,
        operation: OperationKind,
    ) -> Result<ConfigurationReport> {
        self.set_state(operation, RunState::Resolving);
        let plan = match self.plan(&document) {
            Ok(plan) => plan,
            Err(e) => return self.abort(operation, e),
        };

        if let Err(e) = self.store.begin_apply(&document) {
            return self.abort(operation, e);
        }

        let (builder, end) = self.set_pass(run, &document, &plan, operation);
        if end == PassEnd::Finished
            && let Err(e) = self.store.promote(Arc::clone(&document))
        {
            return self.abort(operation, e);
        }
        Ok(self.finish(operation, builder, pass_status(end)))
    }

    /// Stop-on-first-failure Set pass with its own provider set
    fn set_pass(
        &self,
        run: &RunGuard<'_>,
        document: &Document,
        plan: &[&ResourceInstance],
        operation: OperationKind,
    ) -> (ReportBuilder, PassEnd) {
        self.set_state(operation, RunState::Executing);
        let meta = self.store.meta();
        let mut builder = ReportBuilder::new(operation)
            .configuration(document.name())
            .reboot_node_if_needed(meta.reboot_node_if_needed);

        let mut providers = ProviderSet::new(&self.registry, self.events.as_ref());
        let pass = Pass {
            call: LifecycleCall::Set,
            operation,
            cancel: Some(&run.token),
            stop_on_failure: true,
        };
        let end = self.execute_pass(plan, &pass, &mut builder, &mut providers);
        (builder, end)
    }

    /// Drive each resource through one call, in order
    fn execute_pass(
        &self,
        plan: &[&ResourceInstance],
        pass: &Pass<'_>,
        builder: &mut ReportBuilder,
        providers: &mut ProviderSet<'_>,
    ) -> PassEnd {
        for (index, instance) in plan.iter().enumerate() {
            if let Some(token) = pass.cancel {
                self.poll_stop_request(token, pass.operation);
            }
            if let Some(mode) = pass.cancel.and_then(CancellationToken::requested) {
                crate::emit!(
                    self.events.as_ref(),
                    Level::Warn,
                    op: Some(pass.operation),
                    "stopping before {} ({mode:?})",
                    instance.key
                );
                if mode == StopMode::Abort {
                    for skipped in &plan[index..] {
                        builder.push(OperationOutcome::skipped(skipped, pass.call));
                    }
                }
                return PassEnd::Cancelled;
            }

            let outcome = executor::invoke_with(
                pass.call,
                instance,
                providers,
                self.events.as_ref(),
                pass.operation,
            );
            let failed = outcome.is_failed();
            builder.push(outcome);

            if failed && pass.stop_on_failure {
                return PassEnd::Failed;
            }
        }

        PassEnd::Finished
    }

    fn finish(
        &self,
        operation: OperationKind,
        builder: ReportBuilder,
        status: RunStatus,
    ) -> ConfigurationReport {
        let state = match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Failed => RunState::Failed,
            RunStatus::Cancelled => RunState::Cancelled,
            RunStatus::RolledBack => RunState::RolledBack,
        };
        self.set_state(operation, state);

        let report = builder.finish(status);
        self.log_finished(&report);
        report
    }

    fn log_finished(&self, report: &ConfigurationReport) {
        let summary = report.summary();
        let level = if report.is_success() {
            Level::Info
        } else {
            Level::Error
        };
        crate::emit!(
            self.events.as_ref(),
            level,
            op: Some(report.operation),
            "{} finished: {:?} ({} succeeded, {} failed, {} skipped)",
            report.operation,
            report.status,
            summary.succeeded,
            summary.failed,
            summary.skipped
        );
    }
}

fn pass_status(end: PassEnd) -> RunStatus {
    match end {
        PassEnd::Finished => RunStatus::Completed,
        PassEnd::Failed => RunStatus::Failed,
        PassEnd::Cancelled => RunStatus::Cancelled,
    }
}
