//! Loading and validation of `config.toml` and `providers/<name>.toml`.

mod loader;
mod validation;

pub use loader::{
    config_dir_from_env, load_global_config, load_provider_config, ConfigError, CONFIG_DIR_ENV,
};
pub use validation::{validate_provider_name, API_FORMATS, MODULE_NAMES};
