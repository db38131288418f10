//! `typewire init`: Write a default config file.

use typewire_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY");
    println!("  2. Add capability servers under [[servers]]");
    println!("  3. Optionally set TYPEWIRE_WALLET_SECRET to pay for 402-gated servers");
    Ok(())
}
