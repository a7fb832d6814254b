//! Process entry point for the swarmcore orchestration core: loads
//! configuration, wires up the Message Store, LLM Gateway, and the
//! configured agent topology, submits one task through the Dispatcher,
//! and prints the terminal result.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use swarmcore_agents::dispatcher::DispatchOutcome;
use swarmcore_agents::{Coordinator, Dispatcher, SubCoordinator, Worker};
use swarmcore_llm::{Gateway, GatewayConfig, LlmBackend, OllamaBackend};
use swarmcore_shared::config::{Settings, Topology};
use swarmcore_shared::types::{MessageType, Role};
use swarmcore_store::MessageStore;

/// Submit a task to the swarm and print the aggregated result.
#[derive(Debug, Parser)]
#[command(name = "swarmcore", about = "Durable multi-agent task orchestration core")]
struct Cli {
    /// The task to decompose and execute.
    task: String,

    /// Directory to read `base.toml` / `{environment}.toml` from.
    #[arg(long, env = "SWARMCORE_CONFIG_DIR")]
    config_dir: Option<String>,

    /// Ollama base URL.
    #[arg(long, env = "SWARMCORE_OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config_dir.as_deref())?;
    swarmcore_shared::telemetry::init(&settings.logging);

    tracing::info!(topology = ?settings.effective_topology(), workers = settings.worker_count, "starting swarmcore");

    // Every process start clears the store: partial work from a prior,
    // possibly-crashed run must not bleed into this request.
    let store = MessageStore::connect(&settings.database.path, settings.database.pool_size).await?;
    store.clear().await?;

    let backend: Arc<dyn LlmBackend> = Arc::new(OllamaBackend::new("ollama", &cli.ollama_url));
    let gateway = Gateway::new(
        vec![backend],
        GatewayConfig {
            circuit_breaker_threshold: settings.circuit_breaker_threshold,
            circuit_breaker_timeout: settings.circuit_breaker_timeout(),
            default_timeout: settings.per_llm_timeout(),
        },
    );

    let topology = settings.effective_topology();
    let worker_ids: Vec<String> = (0..settings.worker_count).map(|i| format!("worker-{i}")).collect();
    let subcoordinator_ids: Vec<String> = if topology == Topology::Hierarchical {
        (0..settings.sub_coordinator_count).map(|i| format!("subcoordinator-{i}")).collect()
    } else {
        Vec::new()
    };

    let workers: Vec<Arc<Worker>> = worker_ids
        .iter()
        .map(|id| {
            Arc::new(Worker::new(
                id.clone(),
                Role::Developer,
                settings.model.clone(),
                settings.secure_mode,
                settings.project_folder.clone(),
                store.clone(),
                gateway.clone(),
                settings.per_llm_timeout(),
            ))
        })
        .collect();

    // Partition workers evenly across sub-coordinators in hierarchical
    // topology; every worker reports to the root Coordinator directly
    // otherwise.
    let sub_coordinators: Vec<Arc<SubCoordinator>> = subcoordinator_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let group: Vec<String> = worker_ids
                .iter()
                .enumerate()
                .filter(|(w, _)| *w % subcoordinator_ids.len().max(1) == i)
                .map(|(_, w)| w.clone())
                .collect();
            Arc::new(SubCoordinator::new(
                id.clone(),
                settings.model.clone(),
                store.clone(),
                gateway.clone(),
                group,
                settings.max_workers_per_agent_pool as u32,
                settings.per_llm_timeout(),
            ))
        })
        .collect();

    let coordinator = Arc::new(Coordinator::new(
        "coordinator",
        settings.model.clone(),
        store.clone(),
        gateway.clone(),
        topology,
        worker_ids.clone(),
        subcoordinator_ids.clone(),
        settings.per_llm_timeout(),
        settings.parallel_llm,
        settings.project_folder.clone(),
        settings.max_workers_per_agent_pool as u32,
    ));
    for sub_coordinator in &sub_coordinators {
        coordinator.refresh_subcoordinator_capacity(
            &sub_coordinator.agent_id,
            worker_ids.len() as u32 / subcoordinator_ids.len().max(1) as u32,
            worker_ids.len() as u32 / subcoordinator_ids.len().max(1) as u32,
        );
    }

    let dispatcher = Arc::new(Dispatcher::new("dispatcher", "coordinator", store.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let polling_interval = settings.polling_interval();

    let mut handles = Vec::new();
    for worker in workers {
        handles.push(tokio::spawn(poll_worker(worker, store.clone(), polling_interval, shutdown_rx.clone())));
    }
    for sub_coordinator in sub_coordinators {
        handles.push(tokio::spawn(poll_sub_coordinator(
            sub_coordinator,
            store.clone(),
            polling_interval,
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(poll_coordinator(coordinator, store.clone(), polling_interval, shutdown_rx.clone())));
    handles.push(tokio::spawn({
        let dispatcher = dispatcher.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { dispatcher.run_poll_loop(polling_interval, shutdown_rx).await }
    }));

    let pending = dispatcher.run(&cli.task).await?;
    let outcome = tokio::time::timeout(settings.task_timeout(), pending).await;

    match outcome {
        Ok(Ok(DispatchOutcome::Success(content))) => {
            println!("{content}");
        }
        Ok(Ok(DispatchOutcome::Failure(content))) => {
            eprintln!("task failed: {content}");
            shutdown_tx.send(true).ok();
            for handle in handles {
                handle.abort();
            }
            std::process::exit(1);
        }
        Ok(Err(_)) => {
            anyhow::bail!("dispatcher future dropped without resolving");
        }
        Err(_) => {
            anyhow::bail!("task exceeded its {} second budget", settings.task_timeout_secs);
        }
    }

    shutdown_tx.send(true).ok();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn poll_worker(worker: Arc<Worker>, store: MessageStore, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = drain_into(&worker.agent_id.clone(), &store, |msg| {
                    let worker = worker.clone();
                    async move { worker.handle(&msg.sender_id, msg.request_id.clone(), &msg.content).await }
                }).await {
                    tracing::error!(error = %e, "worker poll loop error");
                }
            }
        }
    }
}

async fn poll_sub_coordinator(
    sub_coordinator: Arc<SubCoordinator>,
    store: MessageStore,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = drain_into(&sub_coordinator.agent_id.clone(), &store, |msg| {
                    let sub_coordinator = sub_coordinator.clone();
                    async move {
                        match msg.message_type {
                            MessageType::SubTaskToSubqueen => {
                                sub_coordinator.handle_assignment(&msg.sender_id, msg.request_id.clone(), &msg.content).await
                            }
                            MessageType::Response => {
                                sub_coordinator.handle_worker_result(&msg.sender_id, true, &msg.content).await
                            }
                            MessageType::Error => {
                                sub_coordinator.handle_worker_result(&msg.sender_id, false, &msg.content).await
                            }
                            other => tracing::debug!(message_type = %other, "sub-coordinator has no handler for this message type"),
                        }
                    }
                }).await {
                    tracing::error!(error = %e, "sub-coordinator poll loop error");
                }
            }
        }
    }
}

async fn poll_coordinator(
    coordinator: Arc<Coordinator>,
    store: MessageStore,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = drain_into(&coordinator.agent_id.clone(), &store, |msg| {
                    let coordinator = coordinator.clone();
                    async move {
                        coordinator
                            .handle_message(&msg.sender_id, msg.request_id.clone(), msg.message_type, &msg.content)
                            .await
                    }
                }).await {
                    tracing::error!(error = %e, "coordinator poll loop error");
                }
            }
        }
    }
}

/// Drain every pending message for `agent_id`, mark each processed, and
/// hand it to `handle`. Shared shape across Worker/Sub-Coordinator/
/// Coordinator poll loops, which otherwise differ only in routing.
async fn drain_into<F, Fut>(agent_id: &str, store: &MessageStore, handle: F) -> swarmcore_shared::SwarmResult<()>
where
    F: Fn(swarmcore_shared::types::Message) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let pending = store.get_pending(agent_id).await?;
    for msg in pending {
        store.mark_processed(msg.id).await?;
        handle(msg).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_task_and_defaults() {
        let cli = Cli::parse_from(["swarmcore", "build a web scraper"]);
        assert_eq!(cli.task, "build a web scraper");
        assert_eq!(cli.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::parse_from(["swarmcore", "--ollama-url", "http://example.com", "do a thing"]);
        assert_eq!(cli.ollama_url, "http://example.com");
        assert_eq!(cli.task, "do a thing");
    }
}
