//! Model invocation with a bounded timeout and a degraded reply on failure.
//!
//! A conversation turn never fails because of the model: transport errors,
//! error statuses, malformed payloads and timeouts all become the fixed
//! fallback text with no token or model metadata.

use std::sync::Arc;
use std::time::Duration;

use bizpilot_config::LlmConfig;
use bizpilot_core::error::ProviderError;
use bizpilot_core::provider::{ChatTurn, Provider, ProviderRequest};
use tracing::{debug, warn};

/// Longest error detail embedded in the fallback reply, in characters.
pub const FALLBACK_DETAIL_CHARS: usize = 100;

/// Outcome of one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub content: String,
    pub tokens_used: Option<u32>,
    pub model_used: Option<String>,
}

impl Invocation {
    /// The degraded reply for a failed call.
    pub fn fallback(error: &str) -> Self {
        let detail: String = error.chars().take(FALLBACK_DETAIL_CHARS).collect();
        Self {
            content: format!(
                "Sorry, I'm temporarily unavailable. Please try again later. (Error: {detail})"
            ),
            tokens_used: None,
            model_used: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.model_used.is_none()
    }
}

/// Calls the configured provider once per turn.
pub struct ModelInvoker {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn invoke(&self, messages: Vec<ChatTurn>) -> Invocation {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let outcome = match tokio::time::timeout(self.timeout, self.provider.complete(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {}s",
                self.timeout.as_secs_f32()
            ))),
        };

        match outcome {
            Ok(response) => {
                let tokens_used = response.usage.map(|u| u.total_tokens);
                debug!(
                    provider = self.provider.name(),
                    model = %self.model,
                    tokens = ?tokens_used,
                    "Model replied"
                );
                Invocation {
                    content: response.content,
                    tokens_used,
                    model_used: Some(self.model.clone()),
                }
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "Model call failed; replying with fallback");
                Invocation::fallback(&e.to_string())
            }
        }
    }
}
