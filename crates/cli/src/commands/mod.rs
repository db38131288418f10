pub mod config_cmd;
pub mod init;
pub mod run;
pub mod tools;

use std::path::Path;

use typewire_config::AppConfig;

/// Load the config from `path` (plus env overrides) or the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|name| std::env::var(name).ok());
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}
