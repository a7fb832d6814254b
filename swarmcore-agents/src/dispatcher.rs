//! # Dispatcher
//!
//! Pairs an external request with an internal completion. Allocates a
//! request-id, persists the initial `task` message addressed to the root
//! Coordinator, and resolves a pending future when the corresponding
//! `final-response`/`final-error` lands in its own inbox.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use swarmcore_shared::types::{MessageType, NewMessage};
use swarmcore_shared::SwarmResult;
use swarmcore_store::MessageStore;

/// Terminal outcome of a top-level request, as observed by the
/// Dispatcher's poll loop.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Success(String),
    Failure(String),
}

/// A future resolved exactly once, when the Dispatcher observes the
/// request's terminal message.
pub type DispatchFuture = oneshot::Receiver<DispatchOutcome>;

pub struct Dispatcher {
    pub agent_id: String,
    coordinator_id: String,
    store: MessageStore,
    pending: Mutex<HashMap<String, oneshot::Sender<DispatchOutcome>>>,
}

impl Dispatcher {
    pub fn new(agent_id: impl Into<String>, coordinator_id: impl Into<String>, store: MessageStore) -> Self {
        Self {
            agent_id: agent_id.into(),
            coordinator_id: coordinator_id.into(),
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a new request-id, persist the initial `task` message to
    /// the root Coordinator, register a pending future keyed by that
    /// request-id, and return it.
    pub async fn run(&self, task_text: &str) -> SwarmResult<DispatchFuture> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(request_id.clone(), tx);
        }

        let msg = NewMessage::new(&self.agent_id, &self.coordinator_id, MessageType::Task, task_text)
            .with_request_id(request_id.clone());
        self.store.insert(msg).await?;
        tracing::info!(request_id = %request_id, "dispatched new request to coordinator");
        Ok(rx)
    }

    /// Drain one batch of pending inbound messages and resolve whichever
    /// futures their request-ids correspond to. Non-terminal message
    /// types are marked processed but otherwise ignored — the Dispatcher
    /// has no business logic beyond request/response correlation.
    pub async fn poll_once(&self) -> SwarmResult<usize> {
        let inbound = self.store.get_pending(&self.agent_id).await?;
        let mut resolved = 0;

        for msg in inbound {
            self.store.mark_processed(msg.id).await?;

            if !msg.message_type.is_terminal() {
                continue;
            }
            let Some(request_id) = msg.request_id.clone() else {
                tracing::warn!(message_id = msg.id, "terminal message with no request-id, discarding");
                continue;
            };

            let outcome = match msg.message_type {
                MessageType::FinalResponse => DispatchOutcome::Success(msg.content.clone()),
                MessageType::FinalError => DispatchOutcome::Failure(msg.content.clone()),
                _ => unreachable!("is_terminal() only admits FinalResponse/FinalError"),
            };

            let sender = {
                let mut pending = self.pending.lock().unwrap();
                pending.remove(&request_id)
            };

            match sender {
                Some(tx) => {
                    // The receiver may already be dropped (caller gave up);
                    // that's fine, we still only ever attempt the send once.
                    let _ = tx.send(outcome);
                    resolved += 1;
                }
                None => {
                    tracing::warn!(
                        request_id = %request_id,
                        "second terminal message for request-id, discarding"
                    );
                }
            }
        }

        Ok(resolved)
    }

    /// Drive [`Self::poll_once`] on `interval` until `shutdown` fires.
    pub async fn run_poll_loop(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("dispatcher poll loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "dispatcher poll loop error");
                    }
                }
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_then_final_response_resolves_the_future_once() {
        let store = MessageStore::in_memory().await.unwrap();
        let dispatcher = Dispatcher::new("dispatcher", "coordinator", store.clone());

        let rx = dispatcher.run("build a thing").await.unwrap();

        let pending = store.get_pending("coordinator").await.unwrap();
        assert_eq!(pending.len(), 1);
        let request_id = pending[0].request_id.clone().unwrap();
        store.mark_processed(pending[0].id).await.unwrap();

        let msg = NewMessage::new("coordinator", "dispatcher", MessageType::FinalResponse, "all done")
            .with_request_id(request_id);
        store.insert(msg).await.unwrap();

        let resolved = dispatcher.poll_once().await.unwrap();
        assert_eq!(resolved, 1);

        match rx.await.unwrap() {
            DispatchOutcome::Success(content) => assert_eq!(content, "all done"),
            DispatchOutcome::Failure(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn final_error_resolves_as_failure() {
        let store = MessageStore::in_memory().await.unwrap();
        let dispatcher = Dispatcher::new("dispatcher", "coordinator", store.clone());
        let rx = dispatcher.run("task").await.unwrap();

        let pending = store.get_pending("coordinator").await.unwrap();
        let request_id = pending[0].request_id.clone().unwrap();

        store
            .insert(
                NewMessage::new("coordinator", "dispatcher", MessageType::FinalError, "nope")
                    .with_request_id(request_id),
            )
            .await
            .unwrap();

        dispatcher.poll_once().await.unwrap();
        match rx.await.unwrap() {
            DispatchOutcome::Failure(content) => assert_eq!(content, "nope"),
            DispatchOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn second_terminal_for_same_request_is_discarded_not_errored() {
        let store = MessageStore::in_memory().await.unwrap();
        let dispatcher = Dispatcher::new("dispatcher", "coordinator", store.clone());
        let rx = dispatcher.run("task").await.unwrap();

        let pending = store.get_pending("coordinator").await.unwrap();
        let request_id = pending[0].request_id.clone().unwrap();

        store
            .insert(
                NewMessage::new("coordinator", "dispatcher", MessageType::FinalResponse, "first")
                    .with_request_id(request_id.clone()),
            )
            .await
            .unwrap();
        store
            .insert(
                NewMessage::new("coordinator", "dispatcher", MessageType::FinalResponse, "second")
                    .with_request_id(request_id),
            )
            .await
            .unwrap();

        let resolved = dispatcher.poll_once().await.unwrap();
        assert_eq!(resolved, 1, "only the first terminal message resolves a future");

        match rx.await.unwrap() {
            DispatchOutcome::Success(content) => assert_eq!(content, "first"),
            DispatchOutcome::Failure(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn non_terminal_messages_are_marked_processed_and_ignored() {
        let store = MessageStore::in_memory().await.unwrap();
        let dispatcher = Dispatcher::new("dispatcher", "coordinator", store.clone());
        store
            .insert(NewMessage::new("someone", "dispatcher", MessageType::Response, "noise"))
            .await
            .unwrap();

        let resolved = dispatcher.poll_once().await.unwrap();
        assert_eq!(resolved, 0);
        assert!(store.get_pending("dispatcher").await.unwrap().is_empty());
    }
}
