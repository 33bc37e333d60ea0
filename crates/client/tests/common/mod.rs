//! Shared fixtures: temp config directories pointing at wiremock servers.
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use switchyard::modules::BucketRegistry;
use switchyard::ProviderRegistry;

pub const KEY_ENV: &str = "SWY_IT_API_KEY";
pub const KEY: &str = "it-test-key";

/// A config directory plus a registry over it with isolated buckets.
pub struct Fixture {
    pub dir: TempDir,
    pub registry: ProviderRegistry,
}

impl Fixture {
    pub fn new(global_toml: &str) -> Self {
        init_tracing();
        std::env::set_var(KEY_ENV, KEY);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::create_dir_all(dir.path().join("providers")).expect("Failed to create providers dir");
        fs::write(dir.path().join("config.toml"), global_toml).expect("Failed to write config.toml");
        let registry =
            ProviderRegistry::with_buckets(dir.path(), Arc::new(BucketRegistry::new()));
        Self { dir, registry }
    }

    pub fn provider(&self, name: &str, api_format: &str, base_url: &str) -> &Self {
        write_provider(self.dir.path(), name, api_format, base_url, true);
        self
    }

    pub fn keyless_provider(&self, name: &str, base_url: &str) -> &Self {
        write_provider(self.dir.path(), name, "openai", base_url, false);
        self
    }
}

/// Log to the test writer; filter with RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_provider(dir: &Path, name: &str, api_format: &str, base_url: &str, key_required: bool) {
    let key_env = if key_required {
        KEY_ENV.to_string()
    } else {
        "SWY_IT_UNSET_KEY".to_string()
    };
    let body = format!(
        r#"
[provider]
api_format = "{api_format}"
base_url = "{base_url}"
api_key_env = "{key_env}"
api_key_required = {key_required}
default_model = "{name}-model"
default_temperature = 0.2
timeout_seconds = 10

[models.{name}-model]
context_window = 64000
max_output_tokens = 1000
supports_tools = true
"#
    );
    fs::write(dir.join("providers").join(format!("{}.toml", name)), body)
        .expect("Failed to write provider file");
}

pub fn anthropic_text(text: &str) -> Value {
    json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "anthropic-model",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 12, "output_tokens": 4}
    })
}

pub fn openai_text(model: &str, text: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
    })
}
