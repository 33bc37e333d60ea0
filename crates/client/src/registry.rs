use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use switchyard_common::config::{GlobalConfig, ProviderConfig};
use switchyard_common::LlmError;

use crate::adapters::{AnthropicAdapter, MistralAdapter, OpenAiAdapter};
use crate::config;
use crate::modules::{
    resolve_module, settings_from_table, BucketRegistry, FallbackModule, FallbackSettings,
    ModuleOverrides, RateLimitModule, RateLimitSettings, RetryModule, RetrySettings,
    SecurityModule, SecuritySettings,
};
use crate::provider::{LlmProvider, ProviderFactory};

/// Builds adapters from the config directory and assembles the module
/// stack around them. Cheap to clone; clones share caches and buckets.
#[derive(Clone)]
pub struct ProviderRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config_dir: PathBuf,
    buckets: Arc<BucketRegistry>,
    /// Parsed provider files, loaded once per name.
    providers: Mutex<HashMap<String, Arc<ProviderConfig>>>,
    global: Mutex<Option<Arc<GlobalConfig>>>,
}

impl ProviderRegistry {
    /// Registry over `config_dir`, sharing the process-wide bucket registry.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self::with_buckets(config_dir, BucketRegistry::global())
    }

    /// Registry with its own bucket registry (isolated rate limits).
    pub fn with_buckets(config_dir: impl Into<PathBuf>, buckets: Arc<BucketRegistry>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config_dir: config_dir.into(),
                buckets,
                providers: Mutex::new(HashMap::new()),
                global: Mutex::new(None),
            }),
        }
    }

    /// Registry over the directory named by `SWITCHYARD_CONFIG_DIR`.
    pub fn from_env() -> Self {
        Self::new(config::config_dir_from_env())
    }

    /// The process-wide registry, created from the environment on first use.
    pub fn global() -> &'static ProviderRegistry {
        static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ProviderRegistry::from_env)
    }

    pub fn config_dir(&self) -> &Path {
        &self.inner.config_dir
    }

    pub fn buckets(&self) -> &Arc<BucketRegistry> {
        &self.inner.buckets
    }

    /// Forget every cached config file. Rate-limit buckets are untouched.
    pub fn clear_cache(&self) {
        self.inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .inner
            .global
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("Registry caches cleared");
    }

    pub fn provider_config(&self, provider: &str) -> Result<Arc<ProviderConfig>, LlmError> {
        if let Some(cached) = self
            .inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
        {
            return Ok(Arc::clone(cached));
        }

        // Loaded outside the lock; a concurrent load of the same file is harmless.
        let loaded = Arc::new(config::load_provider_config(&self.inner.config_dir, provider)?);
        let mut providers = self
            .inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            providers.entry(provider.to_string()).or_insert(loaded),
        ))
    }

    pub fn global_config(&self) -> Result<Arc<GlobalConfig>, LlmError> {
        if let Some(cached) = self
            .inner
            .global
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(cached));
        }

        let loaded = Arc::new(config::load_global_config(&self.inner.config_dir)?);
        let mut global = self
            .inner
            .global
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(global.get_or_insert(loaded)))
    }

    /// Build the bare adapter for `provider`, chosen by its `api_format`.
    /// `model` defaults to the provider's `default_model`.
    pub fn adapter(
        &self,
        provider: &str,
        model: Option<&str>,
    ) -> Result<Box<dyn LlmProvider>, LlmError> {
        let config = self.provider_config(provider)?;
        let defaults = self.global_config()?.defaults.clone();
        let model = model.unwrap_or(&config.provider.default_model).to_string();

        let adapter: Box<dyn LlmProvider> = match config.provider.api_format.as_str() {
            "anthropic" => Box::new(
                AnthropicAdapter::new(Arc::clone(&config), &model)?.with_defaults(defaults),
            ),
            "openai" => Box::new(
                OpenAiAdapter::new(Arc::clone(&config), &model)?.with_defaults(defaults),
            ),
            "mistral" => Box::new(
                MistralAdapter::new(Arc::clone(&config), &model)?.with_defaults(defaults),
            ),
            other => {
                return Err(LlmError::Config(format!(
                    "Provider '{}' uses unsupported api_format '{}'",
                    provider, other
                )));
            }
        };
        Ok(adapter)
    }

    /// Load a model wrapped in every active module, outermost first:
    /// security, retry, fallback, rate limit, adapter.
    pub fn load_model(
        &self,
        provider: &str,
        model: Option<&str>,
        overrides: &ModuleOverrides,
    ) -> Result<Box<dyn LlmProvider>, LlmError> {
        let global = self.global_config()?;
        let mut stack = self.adapter(provider, model)?;
        let mut layers: Vec<&str> = Vec::new();

        let rate_limit = resolve_module("rate_limit", &overrides.rate_limit, &global)
            .map(|table| settings_from_table::<RateLimitSettings>("rate_limit", table))
            .transpose()?;

        if let Some(settings) = &rate_limit {
            stack = Box::new(RateLimitModule::new(stack, settings.clone(), &self.inner.buckets)?);
            layers.push("rate_limit");
        }

        if let Some(table) = resolve_module("fallback", &overrides.fallback, &global) {
            let settings: FallbackSettings = settings_from_table("fallback", table)?;
            let factory = self.fallback_factory(rate_limit.clone());
            stack = Box::new(FallbackModule::new(stack, settings, factory)?);
            layers.push("fallback");
        }

        if let Some(table) = resolve_module("retry", &overrides.retry, &global) {
            let settings: RetrySettings = settings_from_table("retry", table)?;
            stack = Box::new(RetryModule::new(stack, settings)?);
            layers.push("retry");
        }

        if let Some(table) = resolve_module("security", &overrides.security, &global) {
            let settings: SecuritySettings = settings_from_table("security", table)?;
            stack = Box::new(SecurityModule::new(stack, settings)?);
            layers.push("security");
        }

        tracing::info!(
            provider = %stack.name(),
            model = %stack.model_name(),
            modules = ?layers,
            "Model loaded"
        );
        Ok(stack)
    }

    /// Load the provider named by `[defaults].provider` with its default model.
    pub fn load_default(&self, overrides: &ModuleOverrides) -> Result<Box<dyn LlmProvider>, LlmError> {
        let global = self.global_config()?;
        self.load_model(&global.defaults.provider, None, overrides)
    }

    /// Fallback entries get their provider's default model and, when rate
    /// limiting is on, a rate-limit layer over their own bucket.
    fn fallback_factory(&self, rate_limit: Option<RateLimitSettings>) -> Arc<dyn ProviderFactory> {
        let registry = self.clone();
        Arc::new(move |name: &str| -> Result<Box<dyn LlmProvider>, LlmError> {
            let adapter = registry.adapter(name, None)?;
            match &rate_limit {
                Some(settings) => Ok(Box::new(RateLimitModule::new(
                    adapter,
                    settings.clone(),
                    &registry.inner.buckets,
                )?)),
                None => Ok(adapter),
            }
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("config_dir", &self.inner.config_dir)
            .field("buckets", &self.inner.buckets.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleOverride;
    use std::fs;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn provider_toml(api_format: &str, key_env: &str) -> String {
        format!(
            r#"
[provider]
api_format = "{api_format}"
base_url = "http://localhost:9"
api_key_env = "{key_env}"
default_model = "default-model"
default_temperature = 0.3

[models.default-model]
context_window = 32000
max_output_tokens = 2048
"#
        )
    }

    fn registry(dir: &Path) -> ProviderRegistry {
        ProviderRegistry::with_buckets(dir, Arc::new(BucketRegistry::new()))
    }

    #[test]
    fn test_adapter_selected_by_api_format() {
        std::env::set_var("SWY_TEST_REG_KEY", "k");
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "providers/anthropic.toml", &provider_toml("anthropic", "SWY_TEST_REG_KEY"));
        write(dir.path(), "providers/groq.toml", &provider_toml("openai", "SWY_TEST_REG_KEY"));
        write(dir.path(), "providers/mistral.toml", &provider_toml("mistral", "SWY_TEST_REG_KEY"));
        let registry = registry(dir.path());

        let anthropic = registry.adapter("anthropic", None).unwrap();
        assert_eq!(anthropic.name(), "anthropic");
        assert_eq!(anthropic.model_name(), "default-model");

        let groq = registry.adapter("groq", Some("llama-3.3-70b")).unwrap();
        assert_eq!(groq.name(), "groq");
        assert_eq!(groq.model_name(), "llama-3.3-70b");

        assert_eq!(registry.adapter("mistral", None).unwrap().name(), "mistral");
    }

    #[test]
    fn test_unknown_api_format() {
        std::env::set_var("SWY_TEST_REG_KEY", "k");
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "providers/odd.toml", &provider_toml("soap", "SWY_TEST_REG_KEY"));
        match registry(dir.path()).adapter("odd", None) {
            Err(LlmError::Config(msg)) => assert!(msg.contains("soap")),
            Err(other) => panic!("Expected config error, got {:?}", other),
            Ok(_) => panic!("Expected config error, got an adapter"),
        }
    }

    #[test]
    fn test_config_cache_and_clear() {
        std::env::set_var("SWY_TEST_REG_KEY", "k");
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "providers/openai.toml", &provider_toml("openai", "SWY_TEST_REG_KEY"));
        let registry = registry(dir.path());

        let first = registry.provider_config("openai").unwrap();
        let second = registry.provider_config("openai").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.clear_cache();
        let third = registry.provider_config("openai").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_load_default_uses_defaults_provider() {
        std::env::set_var("SWY_TEST_REG_KEY", "k");
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.toml", "[defaults]\nprovider = \"groq\"\n");
        write(dir.path(), "providers/groq.toml", &provider_toml("openai", "SWY_TEST_REG_KEY"));

        let model = registry(dir.path())
            .load_default(&ModuleOverrides::default())
            .unwrap();
        assert_eq!(model.name(), "groq");
    }

    #[test]
    fn test_invalid_module_settings_fail_load() {
        std::env::set_var("SWY_TEST_REG_KEY", "k");
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "providers/openai.toml", &provider_toml("openai", "SWY_TEST_REG_KEY"));
        let registry = registry(dir.path());

        let mut table = toml::Table::new();
        table.insert("requests_per_minute".into(), toml::Value::Integer(0));
        let overrides = ModuleOverrides {
            rate_limit: ModuleOverride::Configured(table),
            ..Default::default()
        };
        assert!(matches!(
            registry.load_model("openai", None, &overrides),
            Err(LlmError::Config(_))
        ));
    }

    #[test]
    fn test_rate_limit_layer_registers_bucket() {
        std::env::set_var("SWY_TEST_REG_KEY", "k");
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "config.toml",
            "[modules.rate_limit]\nenabled = true\nrequests_per_minute = 120\n",
        );
        write(dir.path(), "providers/openai.toml", &provider_toml("openai", "SWY_TEST_REG_KEY"));
        let registry = registry(dir.path());

        registry
            .load_model("openai", None, &ModuleOverrides::default())
            .unwrap();
        let bucket = registry.buckets().get("openai").unwrap();
        assert_eq!(bucket.capacity(), 120.0);
        assert_eq!(bucket.refill_rate(), 2.0);

        // Explicit disablement beats config.toml.
        registry.buckets().clear();
        registry
            .load_model("openai", None, &ModuleOverrides::none())
            .unwrap();
        assert!(registry.buckets().is_empty());
    }
}
