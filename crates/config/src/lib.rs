//! Configuration loading, validation, and management for typewire.
//!
//! Loads configuration from `~/.typewire/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use typewire_core::tool::CapabilityServer;

/// The root configuration structure.
///
/// Maps directly to `~/.typewire/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model identifier; the vendor is derived from it unless `vendor` is set
    #[serde(default = "default_model")]
    pub model: String,

    /// Explicit vendor override (`openai`, `anthropic`, `gemini`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,

    /// Temperature for response generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Temperature for server/tool selection and parameter generation
    #[serde(default = "default_selection_temperature")]
    pub selection_temperature: f32,

    /// Max tokens per model reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// System prompt prepended to response generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Vendor credentials and endpoints
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Wallet used to settle HTTP 402 payment demands
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Capability servers available to every run
    #[serde(default)]
    pub servers: Vec<CapabilityServer>,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_selection_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4000
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("vendor", &self.vendor)
            .field("temperature", &self.temperature)
            .field("selection_temperature", &self.selection_temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("providers", &self.providers)
            .field("http", &self.http)
            .field("wallet", &self.wallet)
            .field("servers", &self.servers)
            .finish()
    }
}

/// Credentials and endpoint for one vendor.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct VendorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: VendorConfig,

    #[serde(default)]
    pub anthropic: VendorConfig,

    #[serde(default)]
    pub gemini: VendorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Upper bound for any single network call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Base58-encoded keypair (64 bytes) or seed (32 bytes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".into()
}
fn default_confirm_timeout_secs() -> u64 {
    60
}
fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            rpc_url: default_rpc_url(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WalletConfig {
    /// Whether 402 demands can be paid.
    pub fn is_configured(&self) -> bool {
        self.secret_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("secret_key", &redact(&self.secret_key))
            .field("rpc_url", &self.rpc_url)
            .field("confirm_timeout_secs", &self.confirm_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path with environment overrides.
    ///
    /// Priority: env vars > config file > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific path, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("TYPEWIRE_MODEL") {
            self.model = model;
        }
        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.providers.openai.api_key = Some(key);
        }
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.providers.openai.base_url = Some(url);
        }
        if let Some(key) = non_empty("ANTHROPIC_API_KEY") {
            self.providers.anthropic.api_key = Some(key);
        }
        if let Some(key) = non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")) {
            self.providers.gemini.api_key = Some(key);
        }
        if let Some(secret) = non_empty("TYPEWIRE_WALLET_SECRET") {
            self.wallet.secret_key = Some(secret);
        }
        if let Some(url) = non_empty("TYPEWIRE_RPC_URL") {
            self.wallet.rpc_url = url;
        }
    }

    /// Directory holding `config.toml`.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".typewire")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("temperature", self.temperature),
            ("selection_temperature", self.selection_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 2.0"
                )));
            }
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than 0".into(),
            ));
        }

        if self.http.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "http.timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(vendor) = &self.vendor {
            if !matches!(vendor.as_str(), "openai" | "anthropic" | "gemini") {
                return Err(ConfigError::ValidationError(format!(
                    "unknown vendor '{vendor}' (expected openai, anthropic, or gemini)"
                )));
            }
        }

        for server in &self.servers {
            if !server.url.starts_with("http://") && !server.url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "server '{}' url must start with http:// or https://",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            vendor: None,
            temperature: default_temperature(),
            selection_temperature: default_selection_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            providers: ProvidersConfig::default(),
            http: HttpConfig::default(),
            wallet: WalletConfig::default(),
            servers: Vec::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for typewire_core::Error {
    fn from(err: ConfigError) -> Self {
        typewire_core::Error::config(err.to_string())
    }
}
