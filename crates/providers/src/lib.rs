//! LLM Provider implementations for Bizpilot.
//!
//! All providers implement the `bizpilot_core::Provider` trait.
//! [`build_from_config`] selects the configured backend.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use bizpilot_core::{Provider, ProviderError};
use std::sync::Arc;
use std::time::Duration;

/// Build the configured provider.
pub fn build_from_config(
    config: &bizpilot_config::LlmConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let timeout = Duration::from_secs(config.timeout_secs);

    match config.provider.as_str() {
        "openai" | "openrouter" | "ollama" | "vllm" => Ok(Arc::new(OpenAiCompatProvider::new(
            &config.provider,
            &config.base_url,
            api_key,
            timeout,
        )?)),
        other => Err(ProviderError::NotConfigured(format!(
            "unknown provider '{other}'"
        ))),
    }
}
