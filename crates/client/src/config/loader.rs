use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use switchyard_common::config::{GlobalConfig, ProviderConfig};
use switchyard_common::LlmError;

use super::validation;

/// Environment variable naming the config directory.
pub const CONFIG_DIR_ENV: &str = "SWITCHYARD_CONFIG_DIR";

/// Config directory from `SWITCHYARD_CONFIG_DIR`, defaulting to `config`.
pub fn config_dir_from_env() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"))
}

/// Load `config.toml` from the config directory.
///
/// A missing file is not an error: every module stays off and the built-in
/// defaults apply.
pub fn load_global_config(config_dir: &Path) -> Result<GlobalConfig, ConfigError> {
    let path = config_dir.join("config.toml");

    if !path.exists() {
        tracing::warn!(
            path = %path.display(),
            "Global config not found, using defaults"
        );
        return Ok(GlobalConfig::default());
    }

    let config: GlobalConfig = load_toml(&path)?;
    validation::validate_global(&config)?;

    tracing::info!(
        path = %path.display(),
        default_provider = %config.defaults.provider,
        modules = config.modules.len(),
        "Global config loaded"
    );
    Ok(config)
}

/// Load `providers/<name>.toml`. The name is checked before any path is built.
pub fn load_provider_config(config_dir: &Path, name: &str) -> Result<ProviderConfig, ConfigError> {
    validation::validate_provider_name(name)?;

    let path = config_dir.join("providers").join(format!("{}.toml", name));
    let mut config: ProviderConfig = load_toml(&path)?;
    config.name = name.to_string();

    validation::validate_provider(&config)?;

    tracing::info!(
        provider = name,
        api_format = %config.provider.api_format,
        models = config.models.len(),
        "Provider config loaded"
    );
    Ok(config)
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for LlmError {
    fn from(err: ConfigError) -> Self {
        LlmError::Config(err.to_string())
    }
}
