//! Built-in resource providers

pub mod file;
pub mod service;

pub use file::FileProvider;
pub use service::ServiceProvider;

use lcm_engine::ProviderRegistry;

/// Registry with every built-in provider
pub fn builtin_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry
        .register(file::TYPE_NAME, || Ok(Box::new(FileProvider)))
        .register(service::TYPE_NAME, || Ok(Box::new(ServiceProvider::load()?)));
    registry
}
