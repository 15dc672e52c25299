//! Operation executor - drives one resource through one lifecycle call
//!
//! The executor is the containment boundary: a provider error or panic
//! becomes a `Failed` outcome and control always returns to the
//! orchestrator.

use crate::document::ResourceInstance;
use crate::error::ErrorKind;
use crate::events::EventSink;
use crate::provider::{AcquireError, ProviderSet, ResourceProvider, panic_message};
use crate::report::{OperationOutcome, OutcomeData};
use crate::types::{LifecycleCall, OperationKind, SetResult};
use log::Level;
use std::panic::{AssertUnwindSafe, catch_unwind};

enum Returned {
    Instance(ResourceInstance),
    DesiredState(bool),
    Set(SetResult),
    Inventory(Vec<ResourceInstance>),
}

/// Invoke one lifecycle call against an already-acquired provider
pub fn invoke(
    call: LifecycleCall,
    instance: &ResourceInstance,
    provider: &dyn ResourceProvider,
) -> OperationOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<Returned> {
        Ok(match call {
            LifecycleCall::Get => Returned::Instance(provider.get(instance)?),
            LifecycleCall::Test => Returned::DesiredState(provider.test(instance)?),
            LifecycleCall::Set => Returned::Set(provider.set(instance)?),
            LifecycleCall::Inventory => Returned::Inventory(provider.inventory(instance)?),
        })
    }));

    match result {
        Ok(Ok(returned)) => {
            let outcome = OperationOutcome::success(instance, call);
            match returned {
                Returned::Instance(current) => outcome.with_data(OutcomeData::Instance(current)),
                Returned::DesiredState(in_state) => outcome.with_desired_state(in_state),
                Returned::Set(set) => outcome.with_set_result(set),
                Returned::Inventory(items) => outcome.with_data(OutcomeData::Inventory(items)),
            }
        }
        Ok(Err(e)) => OperationOutcome::failed(
            instance,
            call,
            ErrorKind::ProviderInvocationFailed,
            format!("{e:#}"),
        ),
        Err(panic) => OperationOutcome::failed(
            instance,
            call,
            ErrorKind::ProviderInvocationFailed,
            format!("provider panicked: {}", panic_message(panic.as_ref())),
        ),
    }
}

/// Resolve the provider for an instance and invoke one lifecycle call
pub fn invoke_with(
    call: LifecycleCall,
    instance: &ResourceInstance,
    providers: &mut ProviderSet<'_>,
    events: &dyn EventSink,
    operation: OperationKind,
) -> OperationOutcome {
    crate::emit!(events, Level::Debug, op: Some(operation), "{call} {}", instance.key);

    let outcome = match providers.acquire(instance) {
        Ok(provider) => invoke(call, instance, provider),
        Err(AcquireError::NotRegistered) => OperationOutcome::failed(
            instance,
            call,
            ErrorKind::ProviderNotFound,
            format!("no provider registered for resource type '{}'", instance.type_name),
        ),
        Err(AcquireError::LoadFailed(detail)) => OperationOutcome::failed(
            instance,
            call,
            ErrorKind::ProviderInvocationFailed,
            format!("failed to load provider: {detail}"),
        ),
    };

    match &outcome.error {
        Some(error) => crate::emit!(
            events,
            Level::Error,
            op: Some(operation),
            "{call} failed for {}: {}",
            instance.key,
            error.detail
        ),
        None => crate::emit!(events, Level::Info, op: Some(operation), "{call} succeeded for {}", instance.key),
    }

    outcome
}
