//! Layers around an adapter: PII redaction, retry, fallback and rate
//! limiting. Each module implements `LlmProvider` and owns the provider it
//! wraps, so any stack is substitutable for a bare adapter.

pub mod fallback;
pub mod rate_limit;
pub mod retry;
pub mod security;

use serde::de::DeserializeOwned;

use switchyard_common::config::GlobalConfig;
use switchyard_common::LlmError;

pub use fallback::{FallbackModule, FallbackSettings, MAX_FALLBACK_CHAIN};
pub use rate_limit::{BucketRegistry, RateLimitModule, RateLimitSettings, TokenBucket};
pub use retry::{RetryModule, RetrySettings};
pub use security::{CustomPattern, PiiDetector, PiiMatch, SecurityModule, SecuritySettings};

/// Explicit per-load setting for one module. Anything other than `Inherit`
/// beats config.toml, including turning a module off.
#[derive(Clone, Debug, Default)]
pub enum ModuleOverride {
    /// Use `[modules.<name>]` from config.toml.
    #[default]
    Inherit,
    Disabled,
    /// On, with persisted settings (or defaults).
    Enabled,
    /// On, with these keys layered over the persisted settings.
    Configured(toml::Table),
}

/// Overrides for every module, passed to `ProviderRegistry::load_model`.
#[derive(Clone, Debug, Default)]
pub struct ModuleOverrides {
    pub security: ModuleOverride,
    pub retry: ModuleOverride,
    pub fallback: ModuleOverride,
    pub rate_limit: ModuleOverride,
}

impl ModuleOverrides {
    /// All modules off regardless of config.toml.
    pub fn none() -> Self {
        Self {
            security: ModuleOverride::Disabled,
            retry: ModuleOverride::Disabled,
            fallback: ModuleOverride::Disabled,
            rate_limit: ModuleOverride::Disabled,
        }
    }
}

/// Decide whether `module` is active and return its merged settings table.
pub(crate) fn resolve_module(
    module: &str,
    explicit: &ModuleOverride,
    global: &GlobalConfig,
) -> Option<toml::Table> {
    let persisted = global.module(module);
    let persisted_settings = || persisted.map(|m| m.settings.clone()).unwrap_or_default();

    match explicit {
        ModuleOverride::Disabled => None,
        ModuleOverride::Inherit => persisted
            .filter(|m| m.enabled)
            .map(|m| m.settings.clone()),
        ModuleOverride::Enabled => Some(persisted_settings()),
        ModuleOverride::Configured(table) => {
            let mut merged = persisted_settings();
            for (key, value) in table {
                // Activation is decided by the override itself.
                if key != "enabled" {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Some(merged)
        }
    }
}

/// Deserialize a settings struct out of a merged module table. Missing keys
/// take the struct's serde defaults.
pub(crate) fn settings_from_table<T: DeserializeOwned>(
    module: &str,
    table: toml::Table,
) -> Result<T, LlmError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e| LlmError::Config(format!("Invalid [modules.{}] settings: {}", module, e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use switchyard_common::types::{LlmResponse, Message, StopReason, Tool, Usage};
    use switchyard_common::{LlmError, TransportKind};

    use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider};

    pub(crate) fn response(provider: &str, text: &str) -> LlmResponse {
        LlmResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            usage: Usage {
                input_tokens: 1,
                output_tokens: 1,
                total_tokens: 2,
                ..Default::default()
            },
            model: format!("{}-model", provider),
            stop_reason: StopReason::EndTurn,
            thinking: None,
            raw: serde_json::Value::Null,
        }
    }

    pub(crate) fn api_error(provider: &str, status: u16) -> LlmError {
        LlmError::Api {
            provider: provider.to_string(),
            status,
            body: format!("{{\"error\": \"status {}\"}}", status),
            retry_after: None,
        }
    }

    pub(crate) fn connect_error(provider: &str) -> LlmError {
        LlmError::Transport {
            provider: provider.to_string(),
            kind: TransportKind::Connect,
            message: "connection refused".into(),
        }
    }

    /// Replays a fixed script of outcomes; succeeds once the script runs out.
    pub(crate) struct ScriptedProvider {
        name: String,
        script: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) closed: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(name: &str, script: Vec<Result<LlmResponse, LlmError>>) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                calls: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn failing(name: &str, status: u16) -> Self {
            Self::new(name, vec![Err(api_error(name, status))])
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn validate_config(&self) -> bool {
            true
        }

        fn invoke<'a>(
            &'a self,
            _messages: &'a [Message],
            _tools: Option<&'a [Tool]>,
            _options: &'a InvokeOptions,
        ) -> InvokeFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            let name = self.name.clone();
            Box::pin(async move { next.unwrap_or_else(|| Ok(response(&name, "ok"))) })
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
