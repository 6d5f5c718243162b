use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Transport(String),
    #[error("llm returned status {0}")]
    Status(u16),
    #[error("llm response was malformed: {0}")]
    Malformed(String),
    #[error("llm client is disabled")]
    Disabled,
}

/// The language-model capability. Wall-clock bounding is the caller's job
/// (`tokio::time::timeout`); implementations only bound the transport.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Non-streaming client for an Ollama-style `/api/generate` endpoint.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let mut request = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Status(response.status().as_u16()));
        }

        let payload = response
            .json::<GenerateResponse>()
            .await
            .map_err(|error| LlmError::Malformed(error.to_string()))?;
        Ok(scrub_think(&payload.response))
    }
}

/// Client used when no language model is configured; every call fails fast
/// so callers take their degraded paths.
#[derive(Default)]
pub struct NoopLlmClient;

#[async_trait]
impl LlmClient for NoopLlmClient {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Reasoning models interleave `<think>…</think>` traces with the answer;
/// strip them before the text reaches a user or a routing decision.
pub fn scrub_think(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find("<think>") {
            Some(open) => {
                result.push_str(&rest[..open]);
                match rest[open..].find("</think>") {
                    Some(close) => rest = &rest[open + close + "</think>".len()..],
                    None => {
                        // Unterminated trace: drop everything after the tag.
                        break;
                    }
                }
            }
            None => {
                result.push_str(rest);
                break;
            }
        }
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::scrub_think;

    #[test]
    fn strips_single_think_block() {
        assert_eq!(scrub_think("<think>hmm</think>Hello there!"), "Hello there!");
    }

    #[test]
    fn strips_interleaved_blocks() {
        assert_eq!(
            scrub_think("a<think>x</think>b<think>y</think>c"),
            "abc"
        );
    }

    #[test]
    fn drops_unterminated_trace() {
        assert_eq!(scrub_think("answer<think>never closed"), "answer");
    }

    #[test]
    fn passes_plain_text_through() {
        assert_eq!(scrub_think("  plain reply  "), "plain reply");
    }
}
