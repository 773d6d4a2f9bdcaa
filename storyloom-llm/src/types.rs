//! Request and response types shared by every backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use storyloom_core::config::LlmConfig;

/// A fully rendered prompt for one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPrompt {
    /// System prompt: rules, output contract.
    pub system: String,
    /// User prompt: context documents and the player's input.
    pub user: String,
    /// JSON schema the backend should constrain output to, if it can.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// A request to a backend.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub user: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic).
    pub temperature: f32,
    /// Nucleus sampling cut-off.
    pub top_p: f32,
    /// JSON schema for structured output.
    pub json_schema: Option<Value>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// Build a request from a prompt and the configured sampling settings.
    ///
    /// The schema is dropped when `structured_output` is off.
    #[must_use]
    pub fn from_prompt(prompt: &TurnPrompt, config: &LlmConfig) -> Self {
        Self {
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            json_schema: prompt
                .response_format
                .clone()
                .filter(|_| config.structured_output),
            timeout_ms: config.request_timeout_ms,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A response from a backend.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}
