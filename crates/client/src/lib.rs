//! Provider-agnostic LLM client.
//!
//! Adapters translate the universal message model to each provider's wire
//! format; modules (PII redaction, retry, fallback, rate limit) wrap an
//! adapter behind the same `LlmProvider` trait. `ProviderRegistry` builds
//! the whole stack from the config directory.

pub mod adapters;
pub mod config;
pub mod modules;
pub mod provider;
pub mod registry;

pub use switchyard_common::types;
pub use switchyard_common::{LlmError, Result, TransportKind};

pub use modules::{ModuleOverride, ModuleOverrides};
pub use provider::{InvokeOptions, LlmProvider, ProviderFactory};
pub use registry::ProviderRegistry;

/// Load a model through the process-wide registry, with modules as set in
/// config.toml.
pub fn load_model(provider: &str, model: Option<&str>) -> Result<Box<dyn LlmProvider>> {
    ProviderRegistry::global().load_model(provider, model, &ModuleOverrides::default())
}

/// Reset the process-wide registry's config caches.
pub fn clear_cache() {
    ProviderRegistry::global().clear_cache();
}
