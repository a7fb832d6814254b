//! # BackendHealth
//!
//! Per-LLM-backend health record consumed by the Gateway's candidate
//! ordering and circuit-breaker logic. This module holds only the data
//! shape; the state machine lives in `swarmcore-llm` (which is the single
//! writer of these records, per the design's shared-resource policy).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendStatus {
    Healthy,
    Degraded,
    Failed,
    CircuitOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend_name: String,
    pub status: BackendStatus,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
    pub consecutive_failures: u32,
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl BackendHealth {
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            status: BackendStatus::Healthy,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time: Duration::from_secs(0),
            consecutive_failures: 0,
            circuit_open_until: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            // Zero observed calls score optimistically (spec.md §4.2 step 2).
            return 1.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    /// `success_rate * 1/(1+avg_response_time)` — the health score used to
    /// order candidates when no preferred backend is given.
    pub fn health_score(&self) -> f64 {
        self.success_rate() / (1.0 + self.average_response_time.as_secs_f64())
    }

    pub fn is_circuit_open(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.circuit_open_until) {
            (BackendStatus::CircuitOpen, Some(until)) => now < until,
            (BackendStatus::CircuitOpen, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_backend_scores_optimistically() {
        let h = BackendHealth::new("ollama");
        assert_eq!(h.success_rate(), 1.0);
        assert_eq!(h.health_score(), 1.0);
    }

    #[test]
    fn health_score_drops_with_slower_responses() {
        let mut h = BackendHealth::new("ollama");
        h.total_requests = 10;
        h.successful_requests = 10;
        h.average_response_time = Duration::from_secs(1);
        assert!((h.health_score() - 0.5).abs() < 1e-9);
    }
}
