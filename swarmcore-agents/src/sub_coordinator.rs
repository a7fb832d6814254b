//! # Sub-Coordinator
//!
//! Manages a bounded group of Workers: decomposes its assigned subtask
//! into up to N single-worker subtasks, assigns each with load/skill/
//! reliability scoring, tracks completion, and emits one aggregated
//! `group-response` upward. Mirrors the original framework's
//! `enhanced_sub_queen_agent.py` group-management loop.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use swarmcore_llm::{ChatMessage, ChatOptions, Gateway};
use swarmcore_shared::types::{MessageType, NewMessage, Role, WorkerPerformance};
use swarmcore_store::MessageStore;

use crate::decomposition::parse_subtask_list_permissive;
use crate::envelope::{AssignmentPayload, FailedTask, GroupResponsePayload, ResultPayload, Summary, WorkerSnapshot};

/// Minimum reliability a worker needs to be considered available.
const RELIABILITY_MIN: f64 = 0.3;
/// Reliability floor below which an overloaded worker is eligible for
/// the cascade's reset step.
const RELIABILITY_RESET_THRESHOLD: f64 = 0.6;
/// Failed-task count above which a worker is eligible for reset.
const FAILED_TASKS_MAX: u64 = 5;
/// Emergency cascade thresholds (step c).
const EMERGENCY_LOAD_MAX: u32 = 5;
const EMERGENCY_RELIABILITY_MIN: f64 = 0.1;
/// Group success-rate threshold above which the aggregated response is a
/// success.
const GROUP_SUCCESS_THRESHOLD: f64 = 0.7;
/// EMA smoothing factor for worker duration tracking.
const DURATION_EMA_ALPHA: f64 = 0.3;
const RETRY_SLEEP: Duration = Duration::from_secs(2);

/// Bookkeeping for one in-flight coordinator-assigned subtask this group
/// is working through.
struct GroupRun {
    coordinator_id: String,
    request_id: Option<String>,
    started_at: Instant,
    /// sub_id -> (content, status); no dependency tracking at this tier,
    /// every subtask is independently schedulable once dispatched.
    subtasks: HashMap<String, SubtaskState>,
    active: HashMap<String, String>, // sub_id -> worker agent_id
}

#[derive(Clone)]
struct SubtaskState {
    content: String,
    completed: bool,
    success: bool,
    last_error: String,
}

pub struct SubCoordinator {
    pub agent_id: String,
    pub model: String,
    store: MessageStore,
    gateway: Gateway,
    worker_ids: Vec<String>,
    load_max: u32,
    performance: Mutex<HashMap<String, WorkerPerformance>>,
    runs: Mutex<HashMap<String, GroupRun>>,
    llm_timeout: Duration,
}

impl SubCoordinator {
    pub fn new(
        agent_id: impl Into<String>,
        model: impl Into<String>,
        store: MessageStore,
        gateway: Gateway,
        worker_ids: Vec<String>,
        load_max: u32,
        llm_timeout: Duration,
    ) -> Self {
        let mut performance = HashMap::new();
        for worker_id in &worker_ids {
            performance.insert(worker_id.clone(), WorkerPerformance::new(worker_id, Role::Developer));
        }
        Self {
            agent_id: agent_id.into(),
            model: model.into(),
            store,
            gateway,
            worker_ids,
            load_max,
            performance: Mutex::new(performance),
            runs: Mutex::new(HashMap::new()),
            llm_timeout,
        }
    }

    /// Handle a `sub-task-to-subqueen` assignment from the Coordinator:
    /// decompose into up to the group's worker count and dispatch.
    pub async fn handle_assignment(&self, coordinator_id: &str, request_id: Option<String>, raw_content: &str) {
        let payload: AssignmentPayload = match serde_json::from_str(raw_content) {
            Ok(p) => p,
            Err(_) => AssignmentPayload { task_id: "unknown".to_string(), content: raw_content.to_string() },
        };

        let subtasks = self.decompose(&payload.content).await;

        let mut run = GroupRun {
            coordinator_id: coordinator_id.to_string(),
            request_id: request_id.clone(),
            started_at: Instant::now(),
            subtasks: HashMap::new(),
            active: HashMap::new(),
        };

        for (i, content) in subtasks.into_iter().enumerate() {
            let sub_id = format!("{}-{i}", payload.task_id);
            run.subtasks.insert(sub_id, SubtaskState { content, completed: false, success: false, last_error: String::new() });
        }

        {
            let mut runs = self.runs.lock().unwrap();
            runs.insert(payload.task_id.clone(), run);
        }

        self.dispatch_ready(&payload.task_id, request_id).await;
    }

    /// Decompose `content` into up to `worker_ids.len()` subtasks via a
    /// single LLM call, falling back to the whole task as one subtask if
    /// the call or parse fails.
    async fn decompose(&self, content: &str) -> Vec<String> {
        let capacity = self.worker_ids.len().max(1);
        let prompt = vec![
            ChatMessage::system(format!(
                "Break the following task into at most {capacity} independent subtasks, one per worker. Respond as JSON: {{\"subtasks\": [\"...\"]}}."
            )),
            ChatMessage::user(content),
        ];

        let options = ChatOptions { timeout: self.llm_timeout, stream: false };
        match self.gateway.chat(&prompt, &self.model, None, options).await {
            Ok(response) => {
                let list = parse_subtask_list_permissive(&response.content);
                if list.subtasks.is_empty() {
                    vec![content.to_string()]
                } else {
                    list.subtasks.into_iter().take(capacity).collect()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "sub-coordinator decomposition call failed, using single fallback subtask");
                vec![content.to_string()]
            }
        }
    }

    /// Handle a `response`/`error` from a managed Worker: update that
    /// worker's performance record, mark the subtask terminal, and
    /// either dispatch more work or finish the group.
    pub async fn handle_worker_result(&self, worker_id: &str, success: bool, raw_content: &str) {
        let payload: ResultPayload = match serde_json::from_str(raw_content) {
            Ok(p) => p,
            Err(_) => ResultPayload { task_id: "unknown".to_string(), detail: raw_content.to_string() },
        };

        let duration = {
            let mut performance = self.performance.lock().unwrap();
            let record = performance
                .entry(worker_id.to_string())
                .or_insert_with(|| WorkerPerformance::new(worker_id, Role::Developer));
            let elapsed = Duration::from_secs(1); // per-task wall time isn't tracked at this granularity; a nominal sample keeps the EMA moving.
            if success {
                record.record_success(elapsed, DURATION_EMA_ALPHA);
            } else {
                record.record_failure(elapsed, DURATION_EMA_ALPHA);
            }
            elapsed
        };
        let _ = duration;

        // Find which run owns this sub_id (sub_ids are namespaced by
        // parent task_id with a "-N" suffix).
        let parent_task_id = payload.task_id.rsplit_once('-').map(|(prefix, _)| prefix.to_string());

        let Some(parent_task_id) = parent_task_id else { return };
        let request_id = {
            let mut runs = self.runs.lock().unwrap();
            let Some(run) = runs.get_mut(&parent_task_id) else { return };
            run.active.remove(&payload.task_id);
            if let Some(state) = run.subtasks.get_mut(&payload.task_id) {
                state.completed = true;
                state.success = success;
                if !success {
                    state.last_error = payload.detail.clone();
                }
            }
            run.request_id.clone()
        };

        self.dispatch_ready(&parent_task_id, request_id.clone()).await;
        self.maybe_finish(&parent_task_id, request_id).await;
    }

    /// Assign every not-yet-dispatched subtask in `parent_task_id`'s run
    /// to the best available worker, applying the availability cascade
    /// when no worker currently qualifies.
    async fn dispatch_ready(&self, parent_task_id: &str, request_id: Option<String>) {
        let pending: Vec<(String, String)> = {
            let runs = self.runs.lock().unwrap();
            let Some(run) = runs.get(parent_task_id) else { return };
            run.subtasks
                .iter()
                .filter(|(id, state)| !state.completed && !run.active.contains_key(*id))
                .map(|(id, state)| (id.clone(), state.content.clone()))
                .collect()
        };

        for (sub_id, content) in pending {
            match self.select_worker().await {
                Some(worker_id) => {
                    self.assign_to_worker(parent_task_id, &sub_id, &worker_id, &content, request_id.clone()).await;
                }
                None => {
                    // (d) cascade exhausted: no worker qualifies even under
                    // emergency thresholds. Fail the subtask in place rather
                    // than leaving it pending forever, so the group (and the
                    // request above it) still terminates.
                    tracing::error!(task_id = %sub_id, "availability cascade exhausted, no eligible worker for subtask");
                    let mut runs = self.runs.lock().unwrap();
                    if let Some(run) = runs.get_mut(parent_task_id) {
                        if let Some(state) = run.subtasks.get_mut(&sub_id) {
                            state.completed = true;
                            state.success = false;
                            state.last_error = "availability cascade exhausted: no eligible worker".to_string();
                        }
                    }
                }
            }
        }

        self.maybe_finish(parent_task_id, request_id).await;
    }

    async fn assign_to_worker(
        &self,
        parent_task_id: &str,
        sub_id: &str,
        worker_id: &str,
        content: &str,
        request_id: Option<String>,
    ) {
        {
            let mut performance = self.performance.lock().unwrap();
            if let Some(record) = performance.get_mut(worker_id) {
                record.current_load += 1;
            }
        }
        {
            let mut runs = self.runs.lock().unwrap();
            if let Some(run) = runs.get_mut(parent_task_id) {
                run.active.insert(sub_id.to_string(), worker_id.to_string());
            }
        }

        let payload = AssignmentPayload { task_id: sub_id.to_string(), content: content.to_string() };
        let body = serde_json::to_string(&payload).unwrap_or_default();
        let mut msg = NewMessage::new(&self.agent_id, worker_id, MessageType::SubTask, body);
        if let Some(request_id) = request_id {
            msg = msg.with_request_id(request_id);
        }
        if let Err(e) = self.store.insert(msg).await {
            tracing::error!(error = %e, "sub-coordinator failed to persist assignment");
        }
    }

    /// Select the best worker per the scoring formula, applying the
    /// four-step availability cascade when no worker currently qualifies.
    async fn select_worker(&self) -> Option<String> {
        if let Some(id) = self.best_scoring_worker(self.load_max, RELIABILITY_MIN) {
            return Some(id);
        }

        // (a) brief sleep then re-check.
        tokio::time::sleep(RETRY_SLEEP).await;
        if let Some(id) = self.best_scoring_worker(self.load_max, RELIABILITY_MIN) {
            return Some(id);
        }

        // (b) reset overloaded, decayed workers.
        {
            let mut performance = self.performance.lock().unwrap();
            for record in performance.values_mut() {
                if record.is_overloaded(self.load_max)
                    && (record.reliability_score < RELIABILITY_RESET_THRESHOLD || record.failed_tasks > FAILED_TASKS_MAX)
                {
                    record.reset_for_cascade();
                }
            }
        }
        if let Some(id) = self.best_scoring_worker(self.load_max, RELIABILITY_MIN) {
            return Some(id);
        }

        // (c) emergency thresholds for one pass.
        self.best_scoring_worker(EMERGENCY_LOAD_MAX, EMERGENCY_RELIABILITY_MIN)
    }

    fn best_scoring_worker(&self, load_max: u32, reliability_min: f64) -> Option<String> {
        let performance = self.performance.lock().unwrap();
        let required_skills = Default::default();

        let mut best: Option<(String, f64, u32)> = None;
        for worker_id in &self.worker_ids {
            let Some(record) = performance.get(worker_id) else { continue };
            if record.current_load >= load_max || record.reliability_score < reliability_min {
                continue;
            }
            let score = 0.4 * record.skill_match(&required_skills)
                + 0.3 * record.reliability_score
                + 0.3 * record.load_factor(load_max);

            let better = match &best {
                None => true,
                Some((_, best_score, best_load)) => {
                    score > *best_score
                        || (score == *best_score && record.current_load < *best_load)
                        || (score == *best_score && record.current_load == *best_load && worker_id < &best.as_ref().unwrap().0)
                }
            };
            if better {
                best = Some((worker_id.clone(), score, record.current_load));
            }
        }
        best.map(|(id, _, _)| id)
    }

    /// If every subtask in the run is terminal, emit `group-response` and
    /// drop the run.
    async fn maybe_finish(&self, parent_task_id: &str, request_id: Option<String>) {
        let finished = {
            let runs = self.runs.lock().unwrap();
            runs.get(parent_task_id).map(|r| r.active.is_empty() && r.subtasks.values().all(|s| s.completed))
        };
        if finished != Some(true) {
            return;
        }

        let run = {
            let mut runs = self.runs.lock().unwrap();
            runs.remove(parent_task_id)
        };
        let Some(run) = run else { return };

        let total = run.subtasks.len();
        let completed = run.subtasks.values().filter(|s| s.success).count();
        let success_rate = if total == 0 { 1.0 } else { completed as f64 / total as f64 };
        let failed_tasks = run
            .subtasks
            .iter()
            .filter(|(_, s)| s.completed && !s.success)
            .map(|(id, s)| FailedTask { task_id: id.clone(), last_error: s.last_error.clone() })
            .collect();

        let worker_snapshots = {
            let performance = self.performance.lock().unwrap();
            self.worker_ids
                .iter()
                .filter_map(|id| performance.get(id))
                .map(|p| WorkerSnapshot {
                    agent_id: p.agent_id.clone(),
                    completed_tasks: p.completed_tasks,
                    failed_tasks: p.failed_tasks,
                    reliability_score: p.reliability_score,
                    current_load: p.current_load,
                })
                .collect()
        };

        let summary = Summary {
            completed,
            total,
            success_rate,
            worker_snapshots,
            failed_tasks,
            total_execution_secs: run.started_at.elapsed().as_secs_f64(),
        };

        let payload = GroupResponsePayload {
            task_id: parent_task_id.to_string(),
            success: success_rate >= GROUP_SUCCESS_THRESHOLD,
            summary,
        };

        let body = serde_json::to_string(&payload).unwrap_or_default();
        let mut msg = NewMessage::new(&self.agent_id, &run.coordinator_id, MessageType::GroupResponse, body);
        if let Some(request_id) = request_id {
            msg = msg.with_request_id(request_id);
        }
        if let Err(e) = self.store.insert(msg).await {
            tracing::error!(error = %e, "sub-coordinator failed to persist group-response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use swarmcore_llm::{mock::MockLlmBackend, GatewayConfig};

    fn performance_with(load: u32, reliability: f64) -> WorkerPerformance {
        let mut p = WorkerPerformance::new("w", Role::Developer);
        p.current_load = load;
        p.reliability_score = reliability;
        p
    }

    #[test]
    fn scoring_formula_matches_weighted_sum() {
        let p = performance_with(1, 0.8);
        let required: BTreeSet<String> = BTreeSet::new();
        let score = 0.4 * p.skill_match(&required) + 0.3 * p.reliability_score + 0.3 * p.load_factor(3);
        // skill_match with no required skills is 1.0; load_factor(3) with load=1 is 1 - 1/3.
        let expected = 0.4 * 1.0 + 0.3 * 0.8 + 0.3 * (1.0 - 1.0 / 3.0);
        assert!((score - expected).abs() < 1e-9);
    }

    async fn gateway_always(reply: &str) -> Gateway {
        let backend: Arc<dyn swarmcore_llm::LlmBackend> = Arc::new(MockLlmBackend::always_succeeds("mock", reply));
        Gateway::new(vec![backend], GatewayConfig::default())
    }

    #[tokio::test]
    async fn exhausted_cascade_emits_error_group_response_instead_of_hanging() {
        let store = MessageStore::in_memory().await.unwrap();
        let gateway = gateway_always("unused").await;
        // No workers at all: every cascade step keeps scoring an empty
        // worker set, so select_worker must eventually give up rather
        // than loop forever.
        let sub = SubCoordinator::new("sub1", "model", store.clone(), gateway, Vec::new(), 3, Duration::from_secs(5));

        let payload = AssignmentPayload { task_id: "t1".to_string(), content: "do the thing".to_string() };
        let body = serde_json::to_string(&payload).unwrap();
        sub.handle_assignment("coordinator1", Some("req1".to_string()), &body).await;

        let pending = store.get_pending("coordinator1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_type, MessageType::GroupResponse);

        let response: GroupResponsePayload = serde_json::from_str(&pending[0].content).unwrap();
        assert!(!response.success);
        assert_eq!(response.summary.total, 1);
        assert_eq!(response.summary.completed, 0);
        assert_eq!(response.summary.failed_tasks.len(), 1);
    }
}
