//! # WorkerPerformance
//!
//! Per-agent load, reliability, and skill tracking that feeds scheduling
//! decisions. One record exists per agent-id (workers and sub-coordinators
//! alike) for the lifetime of the process.

use crate::types::agent::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Reliability decay factor applied on each failure (`spec.md` default).
pub const RELIABILITY_DECAY: f64 = 0.9;
/// Reliability bump given to a worker reset by the availability cascade.
pub const RELIABILITY_RESET_BOOST: f64 = 0.1;
/// Default cap on concurrent assignments per worker.
pub const DEFAULT_LOAD_MAX: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPerformance {
    pub agent_id: String,
    pub role: Role,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub current_load: u32,
    pub reliability_score: f64,
    /// Exponentially smoothed average task duration.
    pub average_duration: Duration,
    pub skills: BTreeSet<String>,
    /// Only meaningful for sub-coordinators: size of the managed group.
    pub worker_count: Option<u32>,
    /// Only meaningful for sub-coordinators: workers currently accepting
    /// new assignments, refreshed from the managed group.
    pub available_workers: Option<u32>,
}

impl WorkerPerformance {
    pub fn new(agent_id: impl Into<String>, role: Role) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            completed_tasks: 0,
            failed_tasks: 0,
            current_load: 0,
            reliability_score: 1.0,
            average_duration: Duration::from_secs(0),
            skills: BTreeSet::new(),
            worker_count: None,
            available_workers: None,
        }
    }

    pub fn with_skills(mut self, skills: impl IntoIterator<Item = String>) -> Self {
        self.skills = skills.into_iter().collect();
        self
    }

    /// Record a successful completion: increments completed count, applies
    /// no decay to reliability (a small bump toward 1.0 is applied instead,
    /// per the design's "incremented modestly on success"), and folds the
    /// duration into the exponentially smoothed average.
    pub fn record_success(&mut self, duration: Duration, ema_alpha: f64) {
        self.completed_tasks += 1;
        self.current_load = self.current_load.saturating_sub(1);
        self.reliability_score = (self.reliability_score + 0.02).min(1.0);
        self.update_average_duration(duration, ema_alpha);
    }

    /// Record a failure: decays reliability by [`RELIABILITY_DECAY`] and
    /// decrements load; the failed-tasks counter is bumped.
    pub fn record_failure(&mut self, duration: Duration, ema_alpha: f64) {
        self.failed_tasks += 1;
        self.current_load = self.current_load.saturating_sub(1);
        self.reliability_score *= RELIABILITY_DECAY;
        self.update_average_duration(duration, ema_alpha);
    }

    fn update_average_duration(&mut self, duration: Duration, alpha: f64) {
        if self.average_duration.is_zero() {
            self.average_duration = duration;
            return;
        }
        let prev = self.average_duration.as_secs_f64();
        let sample = duration.as_secs_f64();
        let next = alpha * sample + (1.0 - alpha) * prev;
        self.average_duration = Duration::from_secs_f64(next.max(0.0));
    }

    pub fn is_overloaded(&self, load_max: u32) -> bool {
        self.current_load >= load_max
    }

    /// Reset an overloaded, decayed worker: zero the load and give
    /// reliability a small recovery boost, per the availability cascade's
    /// step (b).
    pub fn reset_for_cascade(&mut self) {
        self.current_load = 0;
        self.reliability_score = (self.reliability_score + RELIABILITY_RESET_BOOST).min(1.0);
    }

    pub fn skill_match(&self, required: &BTreeSet<String>) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let overlap = self.skills.intersection(required).count();
        overlap as f64 / required.len() as f64
    }

    pub fn load_factor(&self, load_max: u32) -> f64 {
        let max = load_max.max(1) as f64;
        1.0 - (self.current_load.min(load_max) as f64 / max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_worker_starts_fully_reliable_and_idle() {
        let w = WorkerPerformance::new("w1", Role::Developer);
        assert_eq!(w.reliability_score, 1.0);
        assert_eq!(w.current_load, 0);
    }

    #[test]
    fn failure_decays_reliability_by_fixed_factor() {
        let mut w = WorkerPerformance::new("w1", Role::Developer);
        w.current_load = 1;
        w.record_failure(Duration::from_secs(10), 0.3);
        assert!((w.reliability_score - RELIABILITY_DECAY).abs() < 1e-9);
        assert_eq!(w.failed_tasks, 1);
        assert_eq!(w.current_load, 0);
    }

    #[test]
    fn skill_match_is_full_when_no_skills_required() {
        let w = WorkerPerformance::new("w1", Role::Developer);
        assert_eq!(w.skill_match(&BTreeSet::new()), 1.0);
    }

    #[test]
    fn skill_match_is_fractional_overlap() {
        let w = WorkerPerformance::new("w1", Role::Developer)
            .with_skills(["rust".to_string(), "python".to_string()]);
        let mut required = BTreeSet::new();
        required.insert("rust".to_string());
        required.insert("go".to_string());
        assert_eq!(w.skill_match(&required), 0.5);
    }

    #[test]
    fn load_factor_decreases_with_load() {
        let mut w = WorkerPerformance::new("w1", Role::Developer);
        assert_eq!(w.load_factor(DEFAULT_LOAD_MAX), 1.0);
        w.current_load = 3;
        assert_eq!(w.load_factor(DEFAULT_LOAD_MAX), 0.0);
    }
}
