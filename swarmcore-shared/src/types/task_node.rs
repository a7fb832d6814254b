//! # TaskNode
//!
//! The unit of scheduled work inside a request's `TaskGraph`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Scheduling priority, ordered low to high so that derived `Ord`
/// matches the scheduler's `priority DESC` sort requirement directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Keyword-derived priority per the decomposition pipeline's priority
    /// derivation rule: `{critical, urgent, error, fix, security} ->
    /// CRITICAL`, `{implement, create, build, develop} -> MEDIUM`,
    /// default `LOW`.
    pub fn from_keywords(text: &str) -> Self {
        let lower = text.to_lowercase();
        const CRITICAL_WORDS: &[&str] = &["critical", "urgent", "error", "fix", "security"];
        const MEDIUM_WORDS: &[&str] = &["implement", "create", "build", "develop"];

        if CRITICAL_WORDS.iter().any(|w| lower.contains(w)) {
            Priority::Critical
        } else if MEDIUM_WORDS.iter().any(|w| lower.contains(w)) {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Derive a priority from a free-text complexity level, used to
    /// override the keyword-derived priority when it indicates a higher
    /// urgency (the derivation rule only ever raises priority).
    pub fn from_complexity_level(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "critical" | "very high" | "very_high" => Priority::Critical,
            "high" => Priority::High,
            "medium" | "moderate" => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

/// Lifecycle state of a `TaskNode`.
///
/// Status is monotonic except for one permitted `Failed -> Pending`
/// transition on retry (see [`TaskStatus::can_transition_to`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether a transition from `self` to `next` is permitted.
    ///
    /// The design decides (open question, see DESIGN.md) that `InProgress`
    /// is entered when the assignment message is persisted — i.e. at the
    /// same moment as `Assigned` in practice an implementation may fold
    /// `Assigned` and `InProgress` into one persisted transition, but the
    /// state machine itself still models both so a future worker
    /// acknowledgement event has somewhere to go.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (Assigned, Completed)
                | (Assigned, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, Pending) // the one permitted retry regression
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A single unit of scheduled work belonging to exactly one top-level
/// request's `TaskGraph`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub task_id: String,
    pub content: String,
    pub priority: Priority,
    pub estimated_duration_secs: u64,
    pub required_skills: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    pub status: TaskStatus,
    pub assigned_worker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: TaskNodeMetadata,
}

/// Free-form-but-typed metadata carried alongside a `TaskNode`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskNodeMetadata {
    pub complexity_score: Option<f64>,
    pub originating_request: Option<String>,
    pub parent_agent: Option<String>,
}

impl TaskNode {
    pub fn new(task_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let priority = Priority::from_keywords(&content);
        Self {
            task_id: task_id.into(),
            content,
            priority,
            estimated_duration_secs: 60,
            required_skills: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            status: TaskStatus::Pending,
            assigned_worker: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: TaskNodeMetadata::default(),
        }
    }

    /// Whether this node's dependencies are all satisfied by the given
    /// completed set — the readiness predicate used by the scheduling
    /// loop's `READY` computation.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|d| completed.contains(d))
    }

    /// Attempt a status transition, returning `false` if disallowed.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        match next {
            TaskStatus::InProgress if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending => {
                // retry: clear assignment and timing so the node re-enters
                // scheduling cleanly.
                self.assigned_worker = None;
                self.started_at = None;
                self.completed_at = None;
            }
            _ => {}
        }
        self.status = next;
        true
    }

    /// The end-to-end time budget for this node: `estimated_duration * 2`.
    pub fn budget_secs(&self) -> u64 {
        self.estimated_duration_secs.saturating_mul(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_derivation_matches_keyword_table() {
        assert_eq!(Priority::from_keywords("fix the security bug"), Priority::Critical);
        assert_eq!(Priority::from_keywords("implement a login form"), Priority::Medium);
        assert_eq!(Priority::from_keywords("write some docs"), Priority::Low);
    }

    #[test]
    fn priority_ordering_sorts_critical_first() {
        let mut v = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        v.sort_by(|a, b| b.cmp(a));
        assert_eq!(v, vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn status_monotonicity_allows_only_one_regression() {
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Assigned));
    }

    #[test]
    fn is_ready_requires_all_dependencies_completed() {
        let mut node = TaskNode::new("t1", "do a thing");
        node.dependencies.insert("t0".to_string());
        let mut completed = HashSet::new();
        assert!(!node.is_ready(&completed));
        completed.insert("t0".to_string());
        assert!(node.is_ready(&completed));
    }

    #[test]
    fn transition_sets_timestamps() {
        let mut node = TaskNode::new("t1", "thing");
        assert!(node.transition(TaskStatus::Assigned));
        assert!(node.transition(TaskStatus::InProgress));
        assert!(node.started_at.is_some());
        assert!(node.transition(TaskStatus::Completed));
        assert!(node.completed_at.is_some());
    }
}
