//! The config directory shipped at the workspace root must load cleanly.
use std::path::PathBuf;

use switchyard::config::{load_global_config, load_provider_config, API_FORMATS};
use switchyard::modules::SecuritySettings;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[test]
fn test_shipped_global_config() {
    let config = load_global_config(&shipped_config_dir()).expect("config.toml should load");
    assert_eq!(config.defaults.provider, "anthropic");
    for name in ["security", "retry", "fallback", "rate_limit"] {
        assert!(config.module(name).is_some(), "missing [modules.{}]", name);
    }

    let security = config.module("security").expect("security section");
    let settings: SecuritySettings = toml::Value::Table(security.settings.clone())
        .try_into()
        .expect("shipped security settings should parse");
    assert!(settings.pii_enabled);
    assert_eq!(settings.pii_detector, "regex");
}

#[test]
fn test_shipped_provider_files() {
    let dir = shipped_config_dir();
    for name in ["anthropic", "openai", "mistral", "groq", "deepseek", "ollama"] {
        let config = load_provider_config(&dir, name)
            .unwrap_or_else(|e| panic!("providers/{}.toml failed to load: {}", name, e));
        assert_eq!(config.name, name);
        assert!(API_FORMATS.contains(&config.provider.api_format.as_str()));
        assert!(
            config.models.contains_key(&config.provider.default_model),
            "{} default model has no metadata",
            name
        );
    }
}
