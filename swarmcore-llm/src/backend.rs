//! # LLM Backend interface
//!
//! The trait every concrete LLM backend implements. The Gateway is the
//! only caller; backends themselves know nothing about health scoring,
//! circuit breakers, or fallback ordering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use swarmcore_shared::SwarmResult;

/// One turn in a chat-style prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Per-attempt options passed down to the backend.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub timeout: Duration,
    pub stream: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), stream: false }
    }
}

/// A completed chat response, plus whatever backend-specific metadata is
/// worth keeping around for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub metadata: serde_json::Value,
}

/// A single LLM backend. Implementors must be cheap to probe with
/// `available()` — the Gateway calls it on every selection pass.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stable name used as the key into `BackendHealth` records and in
    /// configuration (`preferred_backend`).
    fn name(&self) -> &str;

    /// Liveness probe. Should not perform a full chat round-trip.
    async fn available(&self) -> bool;

    /// Models this backend currently reports as loaded/available.
    async fn models(&self) -> SwarmResult<Vec<String>>;

    /// Perform one chat completion. Callers (the Gateway) apply their own
    /// timeout around this call; backends should still honor
    /// `options.timeout` internally where the underlying client supports
    /// it (e.g. an HTTP client timeout), as a second line of defense.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> SwarmResult<LlmResponse>;
}
