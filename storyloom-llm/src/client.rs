//! LLM Client: Ollama and OpenAI-compatible backends behind one type.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::{debug, warn};

use storyloom_core::config::{LlmConfig, ProviderKind};

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse};

/// Provider backend for LLM inference.
#[derive(Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible {
        /// API root without the `/v1` suffix.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No backend; every call fails as unavailable.
    None,
}

impl std::fmt::Debug for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama { base_url } => f.debug_struct("Ollama").field("base_url", base_url).finish(),
            Self::OpenAiCompatible { base_url, .. } => f
                .debug_struct("OpenAiCompatible")
                .field("base_url", base_url)
                .finish_non_exhaustive(),
            Self::None => f.write_str("None"),
        }
    }
}

/// The client that routes requests to the configured backend.
#[derive(Debug)]
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    max_retries: u32,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a client for an explicit provider.
    #[must_use]
    pub fn new(provider: LlmProvider, config: LlmConfig) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: config.model.clone(),
            max_retries: config.transport_retries,
            config,
        }
    }

    /// Build a client from configuration, reading the API key from the
    /// environment variable named by `api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if the OpenAI-compatible provider is
    /// selected and the key variable is unset or empty.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let provider = match config.provider {
            ProviderKind::Ollama => LlmProvider::Ollama { base_url },
            ProviderKind::OpenAi => {
                let api_key = std::env::var(&config.api_key_env)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        LlmError::ConfigError(format!("{} is not set", config.api_key_env))
                    })?;
                LlmProvider::OpenAiCompatible { base_url, api_key }
            }
            ProviderKind::None => LlmProvider::None,
        };
        Ok(Self::new(provider, config.clone()))
    }

    /// Create a client with no backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, LlmConfig::default())
    }

    /// Sampling and timeout settings used for requests.
    #[must_use]
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Model name sent to the backend.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if the client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Send a request to the backend.
    ///
    /// # Errors
    ///
    /// [`LlmError::Unavailable`] without a backend, [`LlmError::ParseError`]
    /// for an undecodable envelope, [`LlmError::RetriesExhausted`] once
    /// transport retries run out.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                let url = format!("{base_url}/api/generate");
                let body = ollama_body(&self.model, request);
                self.send_with_retries("ollama", request, || self.http.post(&url).json(&body), |json| {
                    (
                        json["response"].as_str().map(str::to_string),
                        json["eval_count"].as_u64(),
                    )
                })
                .await
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{base_url}/v1/chat/completions");
                let body = openai_body(&self.model, request);
                self.send_with_retries(
                    "openai",
                    request,
                    || self.http.post(&url).bearer_auth(api_key).json(&body),
                    |json| {
                        (
                            json["choices"][0]["message"]["content"].as_str().map(str::to_string),
                            json["usage"]["completion_tokens"].as_u64(),
                        )
                    },
                )
                .await
            }
        }
    }

    async fn send_with_retries(
        &self,
        backend: &'static str,
        request: &LlmRequest,
        build: impl Fn() -> RequestBuilder,
        extract: impl Fn(&Value) -> (Option<String>, Option<u64>),
    ) -> Result<LlmResponse, LlmError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(backend, attempt = attempt + 1, max = self.max_retries + 1, "Retrying LLM call");
            }

            let start = Instant::now();
            let result = build()
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let (text, tokens) = extract(&json);
                    let text = text.ok_or_else(|| {
                        LlmError::ParseError(format!("{backend} response carried no text"))
                    })?;
                    debug!(backend, model = %self.model, latency_ms, "LLM call completed");
                    return Ok(LlmResponse {
                        text,
                        tokens_generated: tokens.and_then(|t| u32::try_from(t).ok()).unwrap_or(0),
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("HTTP {status}: {}", resp.text().await.unwrap_or_default());
                    warn!(backend, error = %last_error, "LLM backend returned error");
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        warn!(backend, timeout_ms = request.timeout_ms, "LLM request timed out");
                    } else {
                        warn!(backend, error = %last_error, "LLM request failed");
                    }
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

fn ollama_body(model: &str, request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": model,
        "system": request.system,
        "prompt": request.user,
        "stream": false,
        "options": {
            "temperature": request.temperature,
            "top_p": request.top_p,
            "num_predict": request.max_tokens,
        }
    });
    // Ollama takes the schema itself as `format`.
    if let Some(schema) = &request.json_schema {
        body["format"] = schema.clone();
    }
    body
}

fn openai_body(model: &str, request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user },
        ],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "top_p": request.top_p,
    });
    if let Some(schema) = &request.json_schema {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": { "name": "turn_output", "schema": schema, "strict": false },
        });
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(schema: Option<Value>) -> LlmRequest {
        LlmRequest {
            system: "rules".into(),
            user: "player says hi".into(),
            max_tokens: 64,
            temperature: 0.2,
            top_p: 0.9,
            json_schema: schema,
            timeout_ms: 1000,
        }
    }

    #[test]
    fn ollama_body_splits_system_and_prompt() {
        let body = ollama_body("m", &request(Some(json!({"type": "object"}))));
        assert_eq!(body["system"], "rules");
        assert_eq!(body["prompt"], "player says hi");
        assert_eq!(body["format"]["type"], "object");
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[test]
    fn openai_body_carries_response_format_only_with_schema() {
        let with = openai_body("m", &request(Some(json!({"type": "object"}))));
        assert_eq!(with["response_format"]["type"], "json_schema");
        assert_eq!(with["messages"][0]["role"], "system");

        let without = openai_body("m", &request(None));
        assert!(without.get("response_format").is_none());
    }

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        assert!(matches!(
            client.generate(&request(None)).await,
            Err(LlmError::Unavailable(_))
        ));
    }

    #[test]
    fn openai_requires_api_key() {
        let config = LlmConfig {
            provider: ProviderKind::OpenAi,
            api_key_env: "STORYLOOM_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(LlmClient::from_config(&config), Err(LlmError::ConfigError(_))));
    }

    #[tokio::test]
    async fn unreachable_backend_exhausts_retries() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            transport_retries: 1,
            ..LlmConfig::default()
        };
        let client = LlmClient::from_config(&config).expect("ollama needs no key");
        let err = client.generate(&request(None).with_timeout(500)).await.expect_err("no server");
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
    }
}
