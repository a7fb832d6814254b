//! # LLM Gateway
//!
//! The single choke point in front of one-or-more LLM backends: health
//! scoring, circuit breaking, fallback ordering, and the German input
//! translation heuristic all live here. Mirrors the original framework's
//! `llm_manager.py` backend-selection loop, generalized to an arbitrary
//! set of `LlmBackend` implementations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use swarmcore_shared::types::{BackendHealth, BackendStatus};
use swarmcore_shared::{SwarmError, SwarmResult};

use crate::backend::{ChatMessage, ChatOptions, LlmBackend, LlmResponse};
use crate::translate::looks_german;

/// Smoothing factor for the backend response-time EMA.
const RESPONSE_TIME_EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// K: consecutive failures before a backend's circuit opens.
    pub circuit_breaker_threshold: u32,
    /// T: how long a circuit stays open before a half-open probe is allowed.
    pub circuit_breaker_timeout: Duration,
    /// Per-attempt timeout, used when the caller does not override it.
    pub default_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Multi-backend LLM dispatcher. Cheap to clone: backends and health
/// records are held behind `Arc`/`DashMap`.
#[derive(Clone)]
pub struct Gateway {
    backends: Vec<Arc<dyn LlmBackend>>,
    health: Arc<DashMap<String, BackendHealth>>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(backends: Vec<Arc<dyn LlmBackend>>, config: GatewayConfig) -> Self {
        let health = DashMap::new();
        for backend in &backends {
            health.insert(backend.name().to_string(), BackendHealth::new(backend.name()));
        }
        Self { backends, health: Arc::new(health), config }
    }

    pub fn health_snapshot(&self, backend_name: &str) -> Option<BackendHealth> {
        self.health.get(backend_name).map(|r| r.clone())
    }

    /// Build the ordered candidate list for one `chat` call: preferred
    /// backend first if healthy, then the rest by descending health
    /// score. Backends whose circuit is open and whose cool-down has not
    /// elapsed are excluded entirely; a backend whose cool-down just
    /// elapsed is included as a half-open probe.
    fn candidates(&self, preferred: Option<&str>) -> Vec<Arc<dyn LlmBackend>> {
        let now = Utc::now();
        let mut eligible: Vec<Arc<dyn LlmBackend>> = self
            .backends
            .iter()
            .filter(|b| {
                self.health
                    .get(b.name())
                    .map(|h| !h.is_circuit_open(now))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        eligible.sort_by(|a, b| {
            let score_a = self.health.get(a.name()).map(|h| h.health_score()).unwrap_or(1.0);
            let score_b = self.health.get(b.name()).map(|h| h.health_score()).unwrap_or(1.0);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(preferred_name) = preferred {
            if let Some(pos) = eligible.iter().position(|b| b.name() == preferred_name) {
                let preferred_backend = eligible.remove(pos);
                eligible.insert(0, preferred_backend);
            }
        }

        eligible
    }

    fn record_success(&self, backend_name: &str, elapsed: Duration) {
        if let Some(mut health) = self.health.get_mut(backend_name) {
            health.total_requests += 1;
            health.successful_requests += 1;
            health.consecutive_failures = 0;
            health.average_response_time = ema(health.average_response_time, elapsed, RESPONSE_TIME_EMA_ALPHA);
            health.status = BackendStatus::Healthy;
            health.circuit_open_until = None;
        }
    }

    fn record_failure(&self, backend_name: &str, elapsed: Duration) {
        if let Some(mut health) = self.health.get_mut(backend_name) {
            health.total_requests += 1;
            health.failed_requests += 1;
            health.consecutive_failures += 1;
            health.average_response_time = ema(health.average_response_time, elapsed, RESPONSE_TIME_EMA_ALPHA);

            if health.consecutive_failures >= self.config.circuit_breaker_threshold {
                health.status = BackendStatus::CircuitOpen;
                health.circuit_open_until = Some(Utc::now() + chrono::Duration::from_std(self.config.circuit_breaker_timeout).unwrap_or_default());
                tracing::warn!(backend = backend_name, "circuit opened after consecutive failures");
            } else {
                health.status = BackendStatus::Degraded;
            }
        }
    }

    /// Attempt `chat` against the candidate backends in order, applying
    /// `options.timeout` per attempt, updating health records after each
    /// attempt, and failing with `BackendUnavailable` only once every
    /// candidate has been tried.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        preferred_backend: Option<&str>,
        options: ChatOptions,
    ) -> SwarmResult<LlmResponse> {
        let mut last_error = None;

        for backend in self.candidates(preferred_backend) {
            if !backend.available().await {
                continue;
            }

            let start = std::time::Instant::now();
            let attempt = tokio::time::timeout(options.timeout, backend.chat(messages, model, &options)).await;
            let elapsed = start.elapsed();

            match attempt {
                Ok(Ok(response)) => {
                    self.record_success(backend.name(), elapsed);
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    self.record_failure(backend.name(), elapsed);
                    last_error = Some(e);
                }
                Err(_) => {
                    self.record_failure(backend.name(), options.timeout);
                    last_error = Some(SwarmError::timeout(format!("{}: chat timed out", backend.name())));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SwarmError::backend_unavailable("no healthy candidate backend available")
        }))
    }

    /// If `text` looks like German, ask the Gateway itself to translate it
    /// to English via the same `chat` primitive. Translation failure
    /// degrades gracefully to the original text — never propagated.
    pub async fn maybe_translate_to_english(&self, text: &str, model: &str) -> String {
        if !looks_german(text) {
            return text.to_string();
        }

        let messages = vec![
            ChatMessage::system(
                "Translate the user's message to English. Respond with only the translated text.",
            ),
            ChatMessage::user(text),
        ];

        match self.chat(&messages, model, None, ChatOptions::default()).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(error = %e, "translation failed, using original text");
                text.to_string()
            }
        }
    }
}

fn ema(previous: Duration, sample: Duration, alpha: f64) -> Duration {
    if previous.is_zero() {
        return sample;
    }
    let next = alpha * sample.as_secs_f64() + (1.0 - alpha) * previous.as_secs_f64();
    Duration::from_secs_f64(next.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLlmBackend;

    fn gateway_with(backends: Vec<Arc<dyn LlmBackend>>) -> Gateway {
        Gateway::new(backends, GatewayConfig { circuit_breaker_threshold: 3, ..Default::default() })
    }

    #[tokio::test]
    async fn falls_back_to_next_healthy_backend_on_failure() {
        let primary: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_fails("primary"));
        let secondary: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_succeeds("secondary", "ok"));
        let gateway = gateway_with(vec![primary, secondary]);

        let response = gateway
            .chat(&[ChatMessage::user("hi")], "m", None, ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn preferred_backend_is_tried_first_when_healthy() {
        let primary: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_succeeds("primary", "primary-reply"));
        let secondary: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_succeeds("secondary", "secondary-reply"));
        let gateway = gateway_with(vec![primary, secondary]);

        let response = gateway
            .chat(&[ChatMessage::user("hi")], "m", Some("secondary"), ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(response.content, "secondary-reply");
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_consecutive_failures() {
        let backend: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_fails("flaky"));
        let gateway = gateway_with(vec![backend]);

        for _ in 0..3 {
            let _ = gateway.chat(&[ChatMessage::user("hi")], "m", None, ChatOptions::default()).await;
        }

        let health = gateway.health_snapshot("flaky").unwrap();
        assert_eq!(health.status, BackendStatus::CircuitOpen);

        let result = gateway.chat(&[ChatMessage::user("hi")], "m", None, ChatOptions::default()).await;
        assert!(matches!(result, Err(SwarmError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn all_backends_exhausted_is_backend_unavailable() {
        let a: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_fails("a"));
        let b: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_fails("b"));
        let gateway = gateway_with(vec![a, b]);

        let result = gateway.chat(&[ChatMessage::user("hi")], "m", None, ChatOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn translation_passes_through_non_german_text_unchanged() {
        let backend: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_succeeds("a", "should not be called"));
        let gateway = gateway_with(vec![backend]);
        let out = gateway.maybe_translate_to_english("Build a REST API for users", "m").await;
        assert_eq!(out, "Build a REST API for users");
    }

    #[tokio::test]
    async fn translation_falls_back_to_original_text_on_failure() {
        let backend: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::always_fails("a"));
        let gateway = gateway_with(vec![backend]);
        let german = "Bitte erstelle eine neue Funktion und teste sie";
        let out = gateway.maybe_translate_to_english(german, "m").await;
        assert_eq!(out, german);
    }
}
