//! Resource provider interface and registry
//!
//! A provider knows how to Get/Test/Set/Inventory one resource type. The
//! engine treats providers as opaque: it never looks inside them and only
//! calls them between resource boundaries.
//!
//! Providers are registered by type name as factories. Creating a provider
//! from its factory is the "load" step; [`ResourceProvider::unload`] is the
//! release step. A [`ProviderSet`] loads providers lazily for one run and
//! unloads every loaded provider when it is dropped, whichever way the run
//! ends.

use crate::document::ResourceInstance;
use crate::events::EventSink;
use crate::types::SetResult;
use anyhow::Result;
use log::Level;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Core trait for resource providers
///
/// # Example
///
/// ```ignore
/// use lcm_engine::{ResourceInstance, ResourceProvider, SetResult};
///
/// #[derive(Debug)]
/// struct MarkerFile;
///
/// impl ResourceProvider for MarkerFile {
///     fn get(&self, desired: &ResourceInstance) -> anyhow::Result<ResourceInstance> {
///         let path = desired.string_property("path").unwrap_or_default();
///         let exists = std::path::Path::new(path).exists();
///         Ok(desired.with_properties(
///             [("path".into(), path.into()), ("exists".into(), exists.into())].into(),
///         ))
///     }
///
///     fn test(&self, desired: &ResourceInstance) -> anyhow::Result<bool> {
///         Ok(self.get(desired)?.bool_property("exists") == Some(true))
///     }
///
///     fn set(&self, desired: &ResourceInstance) -> anyhow::Result<SetResult> {
///         std::fs::write(desired.string_property("path").unwrap_or_default(), "")?;
///         Ok(SetResult::Applied)
///     }
///
///     fn inventory(&self, _filter: &ResourceInstance) -> anyhow::Result<Vec<ResourceInstance>> {
///         Ok(Vec::new())
///     }
/// }
/// ```
pub trait ResourceProvider: Send + Sync + fmt::Debug {
    /// Retrieve the current state of the resource. Must not mutate the system.
    fn get(&self, desired: &ResourceInstance) -> Result<ResourceInstance>;

    /// Whether the current state already matches the desired state. Must not mutate.
    fn test(&self, desired: &ResourceInstance) -> Result<bool>;

    /// Move the system toward the desired state
    fn set(&self, desired: &ResourceInstance) -> Result<SetResult>;

    /// Audit snapshot of the resource's sub-state. Must not mutate.
    fn inventory(&self, filter: &ResourceInstance) -> Result<Vec<ResourceInstance>>;

    /// Release anything acquired at load time
    fn unload(&self) {}
}

/// Creates (loads) a provider instance
pub type ProviderFactory = Box<dyn Fn() -> Result<Box<dyn ResourceProvider>> + Send + Sync>;

/// Type name → provider factory mapping
///
/// Factories registered under a module are preferred for resources that
/// declare that module binding; otherwise the unqualified registration is
/// used.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKey, ProviderFactory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProviderKey {
    module: Option<String>,
    type_name: String,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory for a type name
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn ResourceProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(
            ProviderKey {
                module: None,
                type_name: type_name.into(),
            },
            Box::new(factory),
        );
        self
    }

    /// Register a provider factory for a type name within a module
    pub fn register_in_module<F>(
        &mut self,
        module: impl Into<String>,
        type_name: impl Into<String>,
        factory: F,
    ) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn ResourceProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(
            ProviderKey {
                module: Some(module.into()),
                type_name: type_name.into(),
            },
            Box::new(factory),
        );
        self
    }

    /// Whether any provider can serve the instance
    pub fn can_resolve(&self, instance: &ResourceInstance) -> bool {
        self.resolve_key(instance).is_some()
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .keys()
            .map(|k| match &k.module {
                Some(module) => format!("{module}/{}", k.type_name),
                None => k.type_name.clone(),
            })
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn resolve_key(&self, instance: &ResourceInstance) -> Option<ProviderKey> {
        if let Some(module) = &instance.module {
            let qualified = ProviderKey {
                module: Some(module.clone()),
                type_name: instance.type_name.clone(),
            };
            if self.factories.contains_key(&qualified) {
                return Some(qualified);
            }
        }

        let plain = ProviderKey {
            module: None,
            type_name: instance.type_name.clone(),
        };
        self.factories.contains_key(&plain).then_some(plain)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Why a provider could not be acquired
#[derive(Debug)]
pub enum AcquireError {
    /// Nothing registered for the type
    NotRegistered,
    /// The factory failed or faulted
    LoadFailed(String),
}

/// Providers loaded for a single run
///
/// Each provider is loaded on first use and unloaded when the set drops.
pub struct ProviderSet<'a> {
    registry: &'a ProviderRegistry,
    events: &'a dyn EventSink,
    loaded: Vec<(ProviderKey, Box<dyn ResourceProvider>)>,
}

impl<'a> ProviderSet<'a> {
    pub fn new(registry: &'a ProviderRegistry, events: &'a dyn EventSink) -> Self {
        Self {
            registry,
            events,
            loaded: Vec::new(),
        }
    }

    /// Get the provider for an instance, loading it if needed
    pub fn acquire(
        &mut self,
        instance: &ResourceInstance,
    ) -> Result<&dyn ResourceProvider, AcquireError> {
        let key = self
            .registry
            .resolve_key(instance)
            .ok_or(AcquireError::NotRegistered)?;

        if let Some(position) = self.loaded.iter().position(|(k, _)| *k == key) {
            return Ok(self.loaded[position].1.as_ref());
        }

        let factory = self
            .registry
            .factories
            .get(&key)
            .ok_or(AcquireError::NotRegistered)?;

        let provider = match catch_unwind(AssertUnwindSafe(factory)) {
            Ok(Ok(provider)) => provider,
            Ok(Err(e)) => return Err(AcquireError::LoadFailed(format!("{e:#}"))),
            Err(panic) => {
                return Err(AcquireError::LoadFailed(format!(
                    "provider panicked while loading: {}",
                    panic_message(panic.as_ref())
                )));
            }
        };

        crate::emit!(self.events, Level::Debug, "loaded provider {}", key.type_name);
        let index = self.loaded.len();
        self.loaded.push((key, provider));
        Ok(self.loaded[index].1.as_ref())
    }

    /// Number of providers currently loaded
    pub fn loaded(&self) -> usize {
        self.loaded.len()
    }
}

impl Drop for ProviderSet<'_> {
    fn drop(&mut self) {
        // Unload in reverse load order
        while let Some((key, provider)) = self.loaded.pop() {
            if catch_unwind(AssertUnwindSafe(|| provider.unload())).is_err() {
                crate::emit!(
                    self.events,
                    Level::Warn,
                    "provider {} panicked while unloading",
                    key.type_name
                );
            } else {
                crate::emit!(self.events, Level::Debug, "unloaded provider {}", key.type_name);
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
