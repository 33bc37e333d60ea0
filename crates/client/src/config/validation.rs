use reqwest::Url;

use switchyard_common::config::{GlobalConfig, ProviderConfig};

use super::loader::ConfigError;

/// Wire protocols an adapter exists for.
pub const API_FORMATS: &[&str] = &["anthropic", "openai", "mistral"];

/// Modules the registry knows how to build.
pub const MODULE_NAMES: &[&str] = &["security", "retry", "fallback", "rate_limit"];

const MAX_PROVIDER_NAME_LEN: usize = 64;
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// Provider names become file paths, so only `[a-z][a-z0-9_]*` is accepted.
pub fn validate_provider_name(name: &str) -> Result<(), ConfigError> {
    let problem = if name.is_empty() {
        Some("provider name must not be empty")
    } else if name.len() > MAX_PROVIDER_NAME_LEN {
        Some("provider name must be at most 64 characters")
    } else if !is_valid_name(name) {
        Some("provider name must match [a-z][a-z0-9_]*")
    } else {
        None
    };

    match problem {
        Some(msg) => Err(ConfigError::Validation(format!("{} (got {:?})", msg, name))),
        None => Ok(()),
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Validate one provider file. Every problem is reported, not just the first.
pub(crate) fn validate_provider(config: &ProviderConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let p = &config.provider;

    if !API_FORMATS.contains(&p.api_format.as_str()) {
        errors.push(format!(
            "provider.api_format must be one of {} (got {:?})",
            API_FORMATS.join(", "),
            p.api_format
        ));
    }
    validate_base_url(&p.base_url, &mut errors);
    if p.api_key_env.is_empty() {
        errors.push("provider.api_key_env must not be empty".into());
    }
    if p.default_model.is_empty() {
        errors.push("provider.default_model must not be empty".into());
    }
    if let Some(t) = p.default_temperature {
        if !(0.0..=2.0).contains(&t) {
            errors.push("provider.default_temperature must be between 0.0 and 2.0".into());
        }
    }
    if p.timeout_seconds == 0 {
        errors.push("provider.timeout_seconds must be > 0".into());
    }

    let mut model_ids: Vec<&String> = config.models.keys().collect();
    model_ids.sort();
    for id in model_ids {
        let meta = &config.models[id];
        if meta.context_window == 0 {
            errors.push(format!("models.{}.context_window must be > 0", id));
        }
        if meta.max_output_tokens == 0 {
            errors.push(format!("models.{}.max_output_tokens must be > 0", id));
        }
    }

    finish(errors)
}

/// HTTPS everywhere except loopback hosts.
fn validate_base_url(base_url: &str, errors: &mut Vec<String>) {
    let url = match Url::parse(base_url) {
        Ok(url) => url,
        Err(e) => {
            errors.push(format!("provider.base_url is not a valid URL ({}): {}", e, base_url));
            return;
        }
    };

    let local = url
        .host_str()
        .is_some_and(|host| LOCAL_HOSTS.contains(&host));

    match url.scheme() {
        "https" => {}
        "http" if local => {}
        _ => errors.push(format!(
            "provider.base_url must use HTTPS for remote hosts (got {})",
            base_url
        )),
    }
}

pub(crate) fn validate_global(config: &GlobalConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let d = &config.defaults;

    if let Err(ConfigError::Validation(msg)) = validate_provider_name(&d.provider) {
        errors.push(format!("defaults.provider: {}", msg));
    }
    if !(0.0..=2.0).contains(&d.temperature) {
        errors.push("defaults.temperature must be between 0.0 and 2.0".into());
    }
    if d.max_tokens == 0 {
        errors.push("defaults.max_tokens must be > 0".into());
    }

    let mut names: Vec<&String> = config.modules.keys().collect();
    names.sort();
    for name in names {
        if !MODULE_NAMES.contains(&name.as_str()) {
            errors.push(format!(
                "modules.{} is not a known module (expected one of {})",
                name,
                MODULE_NAMES.join(", ")
            ));
        }
    }

    finish(errors)
}

fn finish(errors: Vec<String>) -> Result<(), ConfigError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}
