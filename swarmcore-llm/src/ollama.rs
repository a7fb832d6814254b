//! # Ollama backend
//!
//! The one concrete `LlmBackend` the core ships: talks to an Ollama
//! server's `/api/chat` endpoint, matching the original framework's
//! `llm_backend_old.py` wire shape (`{model, messages, stream}` request,
//! `{message: {content}}` response).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swarmcore_shared::{SwarmError, SwarmResult};

use crate::backend::{ChatMessage, ChatOptions, LlmBackend, LlmResponse};

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponseEnvelope {
    message: ChatResponseMessage,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn available(&self) -> bool {
        self.client
            .get(self.tags_url())
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }

    async fn models(&self) -> SwarmResult<Vec<String>> {
        let response = self
            .client
            .get(self.tags_url())
            .send()
            .await
            .map_err(|e| SwarmError::backend_unavailable(format!("{}: {e}", self.name)))?;

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| SwarmError::parse_failure(format!("{}: malformed tags response: {e}", self.name)))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> SwarmResult<LlmResponse> {
        let request = ChatRequest { model, messages, stream: options.stream };

        let response = self
            .client
            .post(self.chat_url())
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SwarmError::timeout(format!("{}: {e}", self.name))
                } else {
                    SwarmError::backend_unavailable(format!("{}: {e}", self.name))
                }
            })?;

        if !response.status().is_success() {
            return Err(SwarmError::backend_unavailable(format!(
                "{}: HTTP {}",
                self.name,
                response.status()
            )));
        }

        let envelope: ChatResponseEnvelope = response
            .json()
            .await
            .map_err(|e| SwarmError::parse_failure(format!("{}: malformed chat response: {e}", self.name)))?;

        Ok(LlmResponse {
            content: envelope.message.content,
            model: model.to_string(),
            metadata: envelope.rest,
        })
    }
}
