//! # TaskGraph
//!
//! Pure in-memory DAG of `TaskNode`s for one top-level request. Owned
//! exclusively by the Coordinator driving that request; every mutation
//! happens on the Coordinator's single poll loop, so no internal locking
//! is needed (the design's single-writer invariant).

use std::collections::{HashMap, HashSet};

use swarmcore_shared::types::{TaskNode, TaskStatus};

#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: HashMap<String, TaskNode>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    /// task-id -> assignee agent-id, for currently active assignments.
    active_tasks: HashMap<String, String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: TaskNode) {
        self.nodes.insert(node.task_id.clone(), node);
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskNode> {
        self.nodes.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// P4 precondition: true iff the dependency graph has no cycle.
    pub fn is_acyclic(&self) -> bool {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();

        fn visit(
            id: &str,
            nodes: &HashMap<String, TaskNode>,
            visiting: &mut HashSet<String>,
            visited: &mut HashSet<String>,
        ) -> bool {
            if visited.contains(id) {
                return true;
            }
            if !visiting.insert(id.to_string()) {
                return false; // cycle
            }
            if let Some(node) = nodes.get(id) {
                for dep in &node.dependencies {
                    if !visit(dep, nodes, visiting, visited) {
                        return false;
                    }
                }
            }
            visiting.remove(id);
            visited.insert(id.to_string());
            true
        }

        self.nodes.keys().all(|id| visit(id, &self.nodes, &mut visiting, &mut visited))
    }

    /// READY = {T | T.status == PENDING and every dependency is completed}
    /// sorted by `(priority DESC, estimated_duration DESC)`.
    pub fn ready(&self) -> Vec<String> {
        let mut ready: Vec<&TaskNode> = self
            .nodes
            .values()
            .filter(|n| n.is_ready(&self.completed))
            .collect();

        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.estimated_duration_secs.cmp(&a.estimated_duration_secs))
        });

        ready.into_iter().map(|n| n.task_id.clone()).collect()
    }

    /// Assign `task_id` to `agent_id`: transitions the node
    /// PENDING -> ASSIGNED -> IN_PROGRESS (per the design's decision that
    /// IN_PROGRESS is entered at assignment-persist time) and records the
    /// active assignment (P2/P3).
    pub fn assign(&mut self, task_id: &str, agent_id: &str) -> bool {
        let Some(node) = self.nodes.get_mut(task_id) else { return false };
        if !node.transition(TaskStatus::Assigned) {
            return false;
        }
        node.assigned_worker = Some(agent_id.to_string());
        node.transition(TaskStatus::InProgress);
        self.active_tasks.insert(task_id.to_string(), agent_id.to_string());
        true
    }

    /// Record a terminal outcome for `task_id`. A repeat call for a node
    /// already terminal is a no-op (R2).
    pub fn complete(&mut self, task_id: &str, success: bool) -> bool {
        let Some(node) = self.nodes.get_mut(task_id) else { return false };
        if node.status.is_terminal() {
            return false;
        }
        let next = if success { TaskStatus::Completed } else { TaskStatus::Failed };
        if !node.transition(next) {
            return false;
        }
        self.active_tasks.remove(task_id);
        if success {
            self.completed.insert(task_id.to_string());
        } else {
            self.failed.insert(task_id.to_string());
        }
        true
    }

    /// Retry: move a FAILED node back to PENDING so it re-enters
    /// scheduling (the one permitted status regression).
    pub fn retry(&mut self, task_id: &str) -> bool {
        let Some(node) = self.nodes.get_mut(task_id) else { return false };
        if !node.transition(TaskStatus::Pending) {
            return false;
        }
        self.failed.remove(task_id);
        self.active_tasks.remove(task_id);
        true
    }

    pub fn active_assignee(&self, task_id: &str) -> Option<&str> {
        self.active_tasks.get(task_id).map(String::as_str)
    }

    pub fn active_tasks_is_empty(&self) -> bool {
        self.active_tasks.is_empty()
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_task_ids(&self) -> Vec<String> {
        self.failed.iter().cloned().collect()
    }

    /// `completed / total`, or `1.0` for an empty graph (vacuously fully
    /// successful).
    pub fn success_rate(&self) -> f64 {
        if self.nodes.is_empty() {
            return 1.0;
        }
        self.completed.len() as f64 / self.nodes.len() as f64
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, deps: &[&str]) -> TaskNode {
        let mut n = TaskNode::new(id, format!("task {id}"));
        n.dependencies = deps.iter().map(|d| d.to_string()).collect();
        n
    }

    #[test]
    fn ready_only_includes_nodes_with_satisfied_dependencies() {
        let mut graph = TaskGraph::new();
        graph.insert(node("a", &[]));
        graph.insert(node("b", &["a"]));
        assert_eq!(graph.ready(), vec!["a".to_string()]);

        graph.assign("a", "worker-1");
        graph.complete("a", true);
        assert_eq!(graph.ready(), vec!["b".to_string()]);
    }

    #[test]
    fn acyclic_detection_flags_a_cycle() {
        let mut graph = TaskGraph::new();
        graph.insert(node("a", &["b"]));
        graph.insert(node("b", &["a"]));
        assert!(!graph.is_acyclic());
    }

    #[test]
    fn acyclic_detection_passes_a_dag() {
        let mut graph = TaskGraph::new();
        graph.insert(node("a", &[]));
        graph.insert(node("b", &["a"]));
        graph.insert(node("c", &["a", "b"]));
        assert!(graph.is_acyclic());
    }

    #[test]
    fn complete_is_idempotent_once_terminal() {
        let mut graph = TaskGraph::new();
        graph.insert(node("a", &[]));
        graph.assign("a", "worker-1");
        assert!(graph.complete("a", true));
        assert!(!graph.complete("a", false), "second terminal call must be a no-op");
        assert_eq!(graph.completed_count(), 1);
    }

    #[test]
    fn success_rate_reflects_completed_over_total() {
        let mut graph = TaskGraph::new();
        graph.insert(node("a", &[]));
        graph.insert(node("b", &[]));
        graph.assign("a", "w1");
        graph.complete("a", true);
        graph.assign("b", "w2");
        graph.complete("b", false);
        assert_eq!(graph.success_rate(), 0.5);
    }

    #[test]
    fn retry_moves_failed_node_back_to_pending_and_clears_active_entry() {
        let mut graph = TaskGraph::new();
        graph.insert(node("a", &[]));
        graph.assign("a", "w1");
        graph.complete("a", false);
        assert!(graph.retry("a"));
        assert!(graph.ready().contains(&"a".to_string()));
    }
}
