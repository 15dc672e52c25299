//! # LCM Engine
//!
//! The configuration application engine of a Local Configuration Manager.
//!
//! Given a document describing desired machine state as a set of typed
//! resources, the engine orders the resources by their dependencies, drives
//! each one through a Get/Test/Set/Inventory call against a pluggable
//! provider, and reports the outcome per resource and overall.
//!
//! ## Core Concepts
//!
//! - **Document**: ordered resource instances with dependency edges
//! - **ResourceProvider**: implements the four lifecycle calls for one resource type
//! - **Lcm**: the orchestrator; one method per supported operation
//! - **ConfigurationReport**: per-resource outcomes plus overall status
//! - **SnapshotStore**: pending, current and previous documents, kept for rollback
//!
//! ## Example
//!
//! ```ignore
//! use lcm_engine::{Document, Lcm, ProviderRegistry};
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register("MarkerFile", || Ok(Box::new(MarkerFile)));
//!
//! let lcm = Lcm::builder().registry(registry).build();
//! let document = Document::load("web.toml".as_ref())?;
//!
//! let report = lcm.send_configuration_apply(document, false)?;
//! println!("{:?}: {} resources", report.status, report.outcomes.len());
//! ```

pub mod cancel;
pub mod document;
pub mod error;
pub mod events;
pub mod executor;
pub mod meta;
pub mod orchestrator;
pub mod provider;
pub mod report;
pub mod resolver;
mod runlock;
pub mod snapshot;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::{CancellationToken, StopMode};
pub use document::{Document, DocumentFormat, DocumentMetadata, ResourceInstance};
pub use error::{Error, ErrorKind, Result};
pub use events::{Event, EventSink, LogSink, MemorySink, NoEvents};
pub use meta::{ActionAfterReboot, ConfigurationMode, MetaConfiguration, RefreshMode};
pub use orchestrator::{Lcm, LcmBuilder};
pub use provider::{ProviderFactory, ProviderRegistry, ResourceProvider};
pub use report::{
    ConfigurationReport, OperationOutcome, OutcomeData, OutcomeError, ReportSummary, RunStatus,
};
pub use snapshot::{Snapshot, SnapshotStore};
pub use types::{
    CheckFlags, LifecycleCall, OperationKind, OutcomeKind, PropertyBag, PropertyValue, RunState,
    SetResult,
};
