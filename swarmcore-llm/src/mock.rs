//! # Mock backend
//!
//! A scriptable `LlmBackend` used by this crate's own tests and by
//! `swarmcore-agents`' Worker/Coordinator tests, standing in for a live
//! LLM/network dependency. Not behind `#[cfg(test)]` because it is
//! consumed as a dev-dependency from other crates in the workspace.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use swarmcore_shared::{SwarmError, SwarmResult};

use crate::backend::{ChatMessage, ChatOptions, LlmBackend, LlmResponse};

/// What the mock does on a given `chat` call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail,
}

/// A backend whose behavior is fully scripted ahead of time: a fixed
/// sequence of [`Scripted`] outcomes, consumed one per call and repeating
/// the last entry once exhausted. Useful for the "primary backend fails
/// on every call" fault-injection scenario.
pub struct MockLlmBackend {
    name: String,
    script: Vec<Scripted>,
    calls: AtomicUsize,
    available: Mutex<bool>,
}

impl MockLlmBackend {
    pub fn new(name: impl Into<String>, script: Vec<Scripted>) -> Self {
        Self {
            name: name.into(),
            script,
            calls: AtomicUsize::new(0),
            available: Mutex::new(true),
        }
    }

    /// Always succeeds with `reply`.
    pub fn always_succeeds(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::new(name, vec![Scripted::Reply(reply.into())])
    }

    /// Always fails — the S4 "primary backend raises on every call" case.
    pub fn always_fails(name: impl Into<String>) -> Self {
        Self::new(name, vec![Scripted::Fail])
    }

    pub fn set_available(&self, available: bool) {
        *self.available.lock().unwrap() = available;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn available(&self) -> bool {
        *self.available.lock().unwrap()
    }

    async fn models(&self) -> SwarmResult<Vec<String>> {
        Ok(vec!["mock-model".to_string()])
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        model: &str,
        _options: &ChatOptions,
    ) -> SwarmResult<LlmResponse> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .get(idx)
            .or_else(|| self.script.last())
            .expect("script must have at least one entry");

        match outcome {
            Scripted::Reply(content) => Ok(LlmResponse {
                content: content.clone(),
                model: model.to_string(),
                metadata: serde_json::Value::Null,
            }),
            Scripted::Fail => Err(SwarmError::backend_unavailable(format!("{} scripted failure", self.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_fails_errors_every_call() {
        let mock = MockLlmBackend::always_fails("flaky");
        let opts = ChatOptions::default();
        for _ in 0..3 {
            let result = mock.chat(&[ChatMessage::user("hi")], "m", &opts).await;
            assert!(result.is_err());
        }
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn script_repeats_last_entry_past_its_length() {
        let mock = MockLlmBackend::new(
            "seq",
            vec![Scripted::Reply("first".into()), Scripted::Fail],
        );
        let opts = ChatOptions::default();
        assert!(mock.chat(&[], "m", &opts).await.is_ok());
        assert!(mock.chat(&[], "m", &opts).await.is_err());
        assert!(mock.chat(&[], "m", &opts).await.is_err());
    }
}
