//! `typewire config`: Show the effective configuration.

use std::path::Path;

use typewire_config::AppConfig;

const REDACTED: &str = "<redacted>";

pub fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

/// Replace every secret with a placeholder so the dump is safe to share.
fn redacted(mut config: AppConfig) -> AppConfig {
    for vendor in [
        &mut config.providers.openai,
        &mut config.providers.anthropic,
        &mut config.providers.gemini,
    ] {
        if vendor.api_key.is_some() {
            vendor.api_key = Some(REDACTED.into());
        }
    }
    if config.wallet.secret_key.is_some() {
        config.wallet.secret_key = Some(REDACTED.into());
    }
    config
}
