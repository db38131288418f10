//! Vendor dispatch: picks a transport once, from configuration.

use std::fmt;
use std::sync::Arc;

use tracing::info;
use typewire_config::AppConfig;
use typewire_core::{Error, Provider, Result};
use typewire_payment::PaidHttpClient;

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::openai_compat::{self, OpenAiCompatProvider};

/// The request/response shape a model is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    OpenAiCompatible,
    AnthropicCompatible,
    GeminiStyle,
}

impl Vendor {
    /// Infer the vendor from a model identifier.
    pub fn detect(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("gemini") {
            Vendor::GeminiStyle
        } else if model.starts_with("claude") || model.contains("anthropic") {
            Vendor::AnthropicCompatible
        } else {
            Vendor::OpenAiCompatible
        }
    }

    /// Parse a configured vendor name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(Vendor::OpenAiCompatible),
            "anthropic" => Some(Vendor::AnthropicCompatible),
            "gemini" => Some(Vendor::GeminiStyle),
            _ => None,
        }
    }

    /// Resolve the vendor for `config`: explicit override first, then the model id.
    pub fn resolve(config: &AppConfig) -> Result<Self> {
        match &config.vendor {
            Some(name) => Self::from_name(name)
                .ok_or_else(|| Error::config(format!("unknown vendor '{name}'"))),
            None => Ok(Self::detect(&config.model)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Vendor::OpenAiCompatible => "openai",
            Vendor::AnthropicCompatible => "anthropic",
            Vendor::GeminiStyle => "gemini",
        }
    }

    /// Environment variable that supplies this vendor's API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Vendor::OpenAiCompatible => "OPENAI_API_KEY",
            Vendor::AnthropicCompatible => "ANTHROPIC_API_KEY",
            Vendor::GeminiStyle => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the provider for `config`, sending through `http`.
///
/// A missing API key for the resolved vendor is a configuration error
/// naming the variable to set.
pub fn build_provider(config: &AppConfig, http: PaidHttpClient) -> Result<Arc<dyn Provider>> {
    let vendor = Vendor::resolve(config)?;
    let vendor_config = match vendor {
        Vendor::OpenAiCompatible => &config.providers.openai,
        Vendor::AnthropicCompatible => &config.providers.anthropic,
        Vendor::GeminiStyle => &config.providers.gemini,
    };

    let api_key = vendor_config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            Error::config(format!(
                "no API key for {vendor} (model '{}'); set {}",
                config.model,
                vendor.api_key_env()
            ))
        })?;
    let base_url = vendor_config.base_url.as_deref();

    info!(%vendor, model = %config.model, "Using model vendor");

    let provider: Arc<dyn Provider> = match vendor {
        Vendor::OpenAiCompatible => Arc::new(OpenAiCompatProvider::new(
            "openai",
            base_url.unwrap_or(openai_compat::DEFAULT_BASE_URL),
            api_key,
            http,
        )),
        Vendor::AnthropicCompatible => {
            let mut p = AnthropicProvider::new(api_key, http);
            if let Some(url) = base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        Vendor::GeminiStyle => {
            let mut p = GeminiProvider::new(api_key, http);
            if let Some(url) = base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
    };

    Ok(provider)
}
