//! # Wire payload shapes
//!
//! Every `Message.content` in the system is opaque text to the Message
//! Store, but every layer of the agent tree agrees on a JSON shape for
//! it. These are that shape: an assignment carries a `task_id` so the
//! receiver can correlate its eventual result back to the right
//! `TaskNode`, and a result/group-response/final payload carries a
//! structured summary, matching `spec.md` §7's "every terminal message
//! carries a structured summary" requirement.

use serde::{Deserialize, Serialize};

/// Sent with every `sub-task-to-subqueen` / `sub-task` / `enhanced-task`
/// assignment message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentPayload {
    pub task_id: String,
    pub content: String,
}

/// Sent with every `response` / `error` message from an executor back to
/// its immediate parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub task_id: String,
    pub detail: String,
}

/// A worker's performance as of the moment a summary was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub agent_id: String,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub reliability_score: f64,
    pub current_load: u32,
}

/// A task that ended FAILED, with its last error for the user-visible
/// summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub task_id: String,
    pub last_error: String,
}

/// Structured summary attached to every terminal message (`group-response`,
/// `final-response`, `final-error`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub completed: usize,
    pub total: usize,
    pub success_rate: f64,
    pub worker_snapshots: Vec<WorkerSnapshot>,
    pub failed_tasks: Vec<FailedTask>,
    pub total_execution_secs: f64,
}

/// Sent by a Sub-Coordinator to the Coordinator once every dispatched
/// subtask in its group has reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponsePayload {
    pub task_id: String,
    pub success: bool,
    pub summary: Summary,
}

/// Sent by the root Coordinator to the Dispatcher to terminate a
/// top-level request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalPayload {
    pub request_id: String,
    pub success: bool,
    pub summary: Summary,
}
