//! Scripted in-memory providers for engine tests

use crate::document::{Document, DocumentMetadata, ResourceInstance};
use crate::provider::{ProviderRegistry, ResourceProvider};
use crate::types::{LifecycleCall, PropertyBag, SetResult};
use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

pub const FAKE: &str = "Fake";

#[derive(Default)]
struct State {
    values: HashMap<String, String>,
    calls: Vec<(String, LifecycleCall)>,
    failures: HashSet<(String, LifecycleCall)>,
    panics: HashSet<(String, LifecycleCall)>,
    reboots: HashSet<String>,
    gates: HashMap<String, (Sender<()>, Receiver<()>)>,
    fail_load: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    loads: AtomicUsize,
    unloads: AtomicUsize,
}

/// A fake machine: resource key → current value
///
/// Resources carry an optional `value` property (default `"present"`).
/// Set writes it, Test compares it, Get reports it.
#[derive(Clone, Default)]
pub struct FakeSystem {
    inner: Arc<Inner>,
}

impl FakeSystem {
    pub fn resource(key: &str) -> ResourceInstance {
        ResourceInstance::new(FAKE, key)
    }

    /// Document of fake resources: (key, value, dependencies)
    pub fn document(name: &str, specs: &[(&str, &str, &[&str])]) -> Document {
        let resources = specs
            .iter()
            .map(|(key, value, deps)| {
                deps.iter().fold(
                    Self::resource(key).with_property("value", *value),
                    |r, d| r.with_dependency(*d),
                )
            })
            .collect();
        let metadata = DocumentMetadata {
            name: Some(name.to_string()),
            version: None,
        };
        match Document::new(metadata, resources) {
            Ok(document) => document,
            Err(e) => panic!("bad test document: {e}"),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Load a provider bound to this system
    pub fn provider(&self) -> Box<dyn ResourceProvider> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeProvider {
            system: self.clone(),
        })
    }

    /// Registry serving the given type names from this system
    pub fn registry(&self, type_names: &[&str]) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for name in type_names {
            let system = self.clone();
            registry.register(*name, move || {
                if system.state().fail_load {
                    bail!("fake provider refused to load");
                }
                Ok(system.provider())
            });
        }
        registry
    }

    pub fn fail_on(&self, key: &str, call: LifecycleCall) {
        self.state().failures.insert((key.to_string(), call));
    }

    pub fn panic_on(&self, key: &str, call: LifecycleCall) {
        self.state().panics.insert((key.to_string(), call));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.panics.clear();
    }

    pub fn fail_load(&self) {
        self.state().fail_load = true;
    }

    pub fn reboot_on(&self, key: &str) {
        self.state().reboots.insert(key.to_string());
    }

    /// Block the next Set of `key` until released
    ///
    /// Returns a receiver signalled when the Set has started, and a sender
    /// that lets it finish.
    pub fn gate(&self, key: &str) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.state()
            .gates
            .insert(key.to_string(), (entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn set_value(&self, key: &str, value: &str) {
        self.state().values.insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state().values.get(key).cloned()
    }

    pub fn is_applied(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    pub fn calls(&self) -> Vec<(String, LifecycleCall)> {
        self.state().calls.clone()
    }

    /// Keys that received the given call, in order
    pub fn keys_called(&self, call: LifecycleCall) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, c)| *c == call)
            .map(|(key, _)| key)
            .collect()
    }

    pub fn loads(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.inner.unloads.load(Ordering::SeqCst)
    }

    fn enter(&self, instance: &ResourceInstance, call: LifecycleCall) -> Result<()> {
        let mut state = self.state();
        state.calls.push((instance.key.clone(), call));
        let attempt = (instance.key.clone(), call);
        if state.panics.contains(&attempt) {
            drop(state);
            panic!("injected {call} panic for {}", instance.key);
        }
        if state.failures.contains(&attempt) {
            bail!("injected {call} failure for {}", instance.key);
        }
        Ok(())
    }
}

fn desired_value(instance: &ResourceInstance) -> &str {
    instance.string_property("value").unwrap_or("present")
}

#[derive(Debug)]
struct FakeProvider {
    system: FakeSystem,
}

impl std::fmt::Debug for FakeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSystem").finish_non_exhaustive()
    }
}

impl FakeProvider {
    fn observed(&self, instance: &ResourceInstance) -> ResourceInstance {
        let value = self
            .system
            .value(&instance.key)
            .unwrap_or_else(|| "absent".to_string());
        let mut properties = PropertyBag::new();
        properties.insert("value".into(), value.into());
        instance.with_properties(properties)
    }
}

impl ResourceProvider for FakeProvider {
    fn get(&self, desired: &ResourceInstance) -> Result<ResourceInstance> {
        self.system.enter(desired, LifecycleCall::Get)?;
        Ok(self.observed(desired))
    }

    fn test(&self, desired: &ResourceInstance) -> Result<bool> {
        self.system.enter(desired, LifecycleCall::Test)?;
        Ok(self.system.value(&desired.key).as_deref() == Some(desired_value(desired)))
    }

    fn set(&self, desired: &ResourceInstance) -> Result<SetResult> {
        self.system.enter(desired, LifecycleCall::Set)?;

        let gate = self.system.state().gates.remove(&desired.key);
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }

        let mut state = self.system.state();
        let wanted = desired_value(desired).to_string();
        if state.values.get(&desired.key) == Some(&wanted) {
            return Ok(SetResult::NoChange);
        }
        state.values.insert(desired.key.clone(), wanted);
        if state.reboots.contains(&desired.key) {
            Ok(SetResult::RebootRequired)
        } else {
            Ok(SetResult::Applied)
        }
    }

    fn inventory(&self, filter: &ResourceInstance) -> Result<Vec<ResourceInstance>> {
        self.system.enter(filter, LifecycleCall::Inventory)?;
        Ok(vec![self.observed(filter)])
    }

    fn unload(&self) {
        self.system.inner.unloads.fetch_add(1, Ordering::SeqCst);
    }
}
