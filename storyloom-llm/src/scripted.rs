//! A [`TextGenerator`] that replays canned responses.
//!
//! Used by tests to drive the engine through exact failure sequences, and by
//! the CLI's offline mode.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::boundary::TextGenerator;
use crate::error::LlmError;
use crate::types::TurnPrompt;

/// Replays queued responses in order.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<TurnPrompt>>,
    fallback: Option<String>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    /// Queue successful responses.
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// Queue an arbitrary sequence of outcomes.
    #[must_use]
    pub fn from_results(results: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            queue: Mutex::new(results.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Serve `text` whenever the queue is empty.
    #[must_use]
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Sleep before every response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append one more outcome.
    pub fn push(&self, result: Result<String, LlmError>) {
        self.queue.lock().push_back(result);
    }

    /// Number of `generate` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<TurnPrompt> {
        self.prompts.lock().clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &TurnPrompt) -> Result<String, LlmError> {
        self.prompts.lock().push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queue.lock().pop_front();
        match next {
            Some(Ok(text)) if text.trim().is_empty() => Err(LlmError::Empty),
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Unavailable("script exhausted".into())),
        }
    }
}
