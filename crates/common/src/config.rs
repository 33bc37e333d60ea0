use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Global configuration, deserialized from config.toml.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Module toggles keyed by module name ("retry", "fallback", "rate_limit").
    #[serde(default)]
    pub modules: HashMap<String, ModuleConfig>,
}

impl GlobalConfig {
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.get(name)
    }
}

/// Global defaults from the [defaults] section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Provider used by `load_default`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// One [modules.<name>] table. Everything besides `enabled` is module-specific
/// and is interpreted by the module when it is built.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: toml::Table,
}

/// A provider TOML file: connection settings plus model metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identity. Filled from the file name by the loader when absent.
    #[serde(default)]
    pub name: String,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub models: HashMap<String, ModelMetadata>,
}

/// Connection settings from the [provider] section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Wire protocol ("anthropic", "openai" or "mistral").
    pub api_format: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Local servers (Ollama, vLLM) run without a key.
    #[serde(default = "default_true")]
    pub api_key_required: bool,
    pub default_model: String,
    /// Falls back to `[defaults].temperature` when unset.
    #[serde(default)]
    pub default_temperature: Option<f64>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Per-model metadata from [models.<id>] sections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_thinking: bool,
    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub cost_input_per_1m: f64,
    #[serde(default)]
    pub cost_output_per_1m: f64,
    #[serde(default)]
    pub cost_cache_read_per_1m: f64,
    #[serde(default)]
    pub cost_cache_write_per_1m: f64,
}

fn default_provider() -> String {
    "anthropic".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    60
}
