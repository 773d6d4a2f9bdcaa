//! The generative boundary: prompt in, untrusted text out.
//!
//! Everything behind [`TextGenerator`] is treated as an oracle that may be
//! slow, wrong or absent. The engine validates every response before any of
//! it can touch world state.

use std::future::Future;

use tracing::debug;

use crate::client::LlmClient;
use crate::error::LlmError;
use crate::types::{LlmRequest, TurnPrompt};

/// Anything that can turn a [`TurnPrompt`] into raw text.
pub trait TextGenerator: Send + Sync {
    /// Name recorded in turn records as `model_used`.
    fn model_name(&self) -> &str;

    /// Produce raw text for `prompt`.
    ///
    /// Implementations return [`LlmError::Empty`] rather than an empty
    /// string.
    fn generate(&self, prompt: &TurnPrompt) -> impl Future<Output = Result<String, LlmError>> + Send;
}

impl TextGenerator for LlmClient {
    fn model_name(&self) -> &str {
        self.model()
    }

    async fn generate(&self, prompt: &TurnPrompt) -> Result<String, LlmError> {
        let request = LlmRequest::from_prompt(prompt, self.config());
        let response = LlmClient::generate(self, &request).await?;
        if response.text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        debug!(
            model = %response.model,
            tokens = response.tokens_generated,
            latency_ms = response.latency_ms,
            "Generated turn text"
        );
        Ok(response.text)
    }
}
