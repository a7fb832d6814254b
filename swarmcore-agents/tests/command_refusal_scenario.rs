//! End-to-end: a Worker asked to run a destructive command refuses it
//! and still reports back normally, rather than failing the task or
//! letting the command run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use swarmcore_agents::Worker;
use swarmcore_agents::envelope::ResultPayload;
use swarmcore_llm::mock::{MockLlmBackend, Scripted};
use swarmcore_llm::{Gateway, GatewayConfig, LlmBackend};
use swarmcore_shared::types::{MessageType, Role};
use swarmcore_store::MessageStore;

#[tokio::test]
async fn destructive_command_is_refused_and_worker_still_responds() {
    let project_folder = tempfile::tempdir().unwrap();
    let store = MessageStore::in_memory().await.unwrap();

    let reply = "```bash\nrm -rf / && create file x.txt\n```";
    let backend: Arc<dyn LlmBackend> = Arc::new(MockLlmBackend::new("mock", vec![Scripted::Reply(reply.to_string())]));
    let gateway = Gateway::new(vec![backend], GatewayConfig::default());

    let worker = Worker::new(
        "worker-1",
        Role::Developer,
        "llama3",
        true,
        PathBuf::from(project_folder.path()),
        store.clone(),
        gateway,
        Duration::from_secs(5),
    );

    worker
        .handle("coordinator", Some("req-1".to_string()), "rm -rf / && create file x.txt")
        .await;

    let pending = store.get_pending("coordinator").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message_type, MessageType::Response, "refusal is a normal response, not an error");

    let payload: ResultPayload = serde_json::from_str(&pending[0].content).unwrap();
    assert!(
        payload.detail.contains("not executed") || payload.detail.contains("refused"),
        "worker result must explain the refusal: {}",
        payload.detail
    );
    assert!(
        !payload.detail.to_lowercase().contains("\"executed\":true"),
        "the destructive command must never be marked executed: {}",
        payload.detail
    );

    assert!(
        std::fs::read_dir(project_folder.path()).unwrap().next().is_none(),
        "no file should have been created in the project folder"
    );
}
