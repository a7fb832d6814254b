//! # swarmcore-llm
//!
//! The single choke point every agent goes through to reach an LLM:
//! backend trait, health scoring, circuit breaker, fallback ordering,
//! and the German-input translation heuristic.

mod backend;
mod gateway;
pub mod mock;
mod ollama;
mod translate;

pub use backend::{ChatMessage, ChatOptions, LlmBackend, LlmResponse};
pub use gateway::{Gateway, GatewayConfig};
pub use ollama::OllamaBackend;
pub use translate::looks_german;
