//! # Worker
//!
//! Terminal agent: takes one subtask, asks the LLM Gateway, optionally
//! runs allow-listed commands extracted from the model's reply, writes a
//! file when the task asks for one, and always emits exactly one
//! `response` or `error` back to its sender.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use serde::Serialize;
use swarmcore_llm::{ChatMessage, ChatOptions, Gateway};
use swarmcore_shared::types::{MessageType, NewMessage, Role};
use swarmcore_shared::SwarmError;
use swarmcore_store::MessageStore;

use crate::command_safety::{check_command, check_write_target, pruned_environment, truncate_output, Refusal};
use crate::envelope::{AssignmentPayload, ResultPayload};

const MAX_CONTENT_CHARS: usize = 20_000;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const KILL_GRACE: Duration = Duration::from_millis(500);

/// One fenced command extracted from LLM output and its execution
/// outcome, surfaced back to the caller in the response payload.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    pub executed: bool,
    pub output: String,
}

/// The structured content a Worker writes back to the Message Store on
/// success. Serialized to JSON as the message `content`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerResult {
    pub llm_reply: String,
    pub commands: Vec<CommandOutcome>,
    pub file_written: Option<String>,
}

pub struct Worker {
    pub agent_id: String,
    pub role: Role,
    pub model: String,
    pub secure_mode: bool,
    pub project_folder: PathBuf,
    store: MessageStore,
    gateway: Gateway,
    llm_timeout: Duration,
}

impl Worker {
    pub fn new(
        agent_id: impl Into<String>,
        role: Role,
        model: impl Into<String>,
        secure_mode: bool,
        project_folder: PathBuf,
        store: MessageStore,
        gateway: Gateway,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            model: model.into(),
            secure_mode,
            project_folder,
            store,
            gateway,
            llm_timeout,
        }
    }

    /// Handle one inbound `task`/`sub-task`/`enhanced-task` message:
    /// validate, call the LLM, run any permitted commands, optionally
    /// write a file, then emit exactly one terminal message back to the
    /// sender. `raw_content` is the message's opaque content; an
    /// assignment from a Sub-Coordinator or Coordinator carries an
    /// [`AssignmentPayload`] so the result can be correlated back to a
    /// `TaskNode`, but a direct `task` message (the fast-path/simple
    /// case) may just be the bare task text.
    pub async fn handle(&self, sender_id: &str, request_id: Option<String>, raw_content: &str) {
        let (task_id, content) = parse_assignment(raw_content);

        if let Err(e) = self.validate(&content) {
            self.emit_error(sender_id, request_id, &task_id, &e.to_string()).await;
            return;
        }

        let prompt = self.build_prompt(&content);
        let options = ChatOptions { timeout: self.llm_timeout, stream: false };

        let reply = match self.gateway.chat(&prompt, &self.model, None, options).await {
            Ok(response) => response.content,
            // Recovered locally per the error propagation design: fall
            // back to an unstructured result rather than failing the task.
            Err(SwarmError::ParseFailure(detail)) => {
                tracing::debug!(agent = %self.agent_id, %detail, "LLM response unparseable, using raw fallback");
                String::new()
            }
            Err(e) => {
                self.emit_error(sender_id, request_id, &task_id, &e.to_string()).await;
                return;
            }
        };

        let commands = if self.secure_mode {
            self.run_fenced_commands(&reply).await
        } else {
            Vec::new()
        };

        let file_written = self.maybe_write_file(&content, &reply);

        let result = WorkerResult { llm_reply: reply, commands, file_written };
        let detail = serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string());
        self.emit_response(sender_id, request_id, &task_id, &detail).await;
    }

    fn validate(&self, content: &str) -> Result<(), SwarmError> {
        if content.trim().is_empty() {
            return Err(SwarmError::validation("task content is empty"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(SwarmError::validation(format!(
                "task content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        Ok(())
    }

    fn build_prompt(&self, content: &str) -> Vec<ChatMessage> {
        let role_preamble = format!(
            "You are a {} agent in an automated task execution swarm. Respond concisely and, where useful, include shell commands in fenced ```bash blocks.",
            self.role
        );
        let security_preamble = "Only suggest safe, non-destructive shell commands. Never suggest commands that modify system files, escalate privileges, or exfiltrate data.";

        vec![
            ChatMessage::system(format!("{role_preamble}\n{security_preamble}")),
            ChatMessage::user(content),
        ]
    }

    async fn run_fenced_commands(&self, reply: &str) -> Vec<CommandOutcome> {
        let commands = extract_fenced_commands(reply);
        futures::future::join_all(commands.into_iter().map(|command| self.run_one_command(command))).await
    }

    async fn run_one_command(&self, command: String) -> CommandOutcome {
        match check_command(&command) {
            Ok(()) => {
                let output = execute_command(&command, &self.project_folder).await;
                CommandOutcome { command, executed: true, output }
            }
            Err(refusal) => CommandOutcome {
                command,
                executed: false,
                output: explain_refusal(&refusal),
            },
        }
    }

    /// If the original task asked to save output to a file, validate the
    /// target and write atomically. Returns the written path on success.
    fn maybe_write_file(&self, task_content: &str, reply: &str) -> Option<String> {
        let requested_path = detect_save_request(task_content)?;
        let target = check_write_target(&self.project_folder, &requested_path).ok()?;

        let body = extract_quoted_or_reply(task_content, reply);
        if let Some(parent) = target.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let tmp_path = target.with_extension("swarmcore-tmp");
        if std::fs::write(&tmp_path, &body).is_err() {
            return None;
        }
        if std::fs::rename(&tmp_path, &target).is_err() {
            return None;
        }
        Some(target.to_string_lossy().to_string())
    }

    async fn emit_response(&self, sender_id: &str, request_id: Option<String>, task_id: &str, detail: &str) {
        self.emit(sender_id, request_id, task_id, detail, MessageType::Response).await;
    }

    async fn emit_error(&self, sender_id: &str, request_id: Option<String>, task_id: &str, detail: &str) {
        self.emit(sender_id, request_id, task_id, detail, MessageType::Error).await;
    }

    async fn emit(
        &self,
        sender_id: &str,
        request_id: Option<String>,
        task_id: &str,
        detail: &str,
        message_type: MessageType,
    ) {
        let payload = ResultPayload { task_id: task_id.to_string(), detail: detail.to_string() };
        let content = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
        let mut msg = NewMessage::new(&self.agent_id, sender_id, message_type, content);
        if let Some(request_id) = request_id {
            msg = msg.with_request_id(request_id);
        }
        if let Err(e) = self.store.insert(msg).await {
            tracing::error!(error = %e, agent = %self.agent_id, "failed to persist outbound message");
        }
    }
}

/// Parse `raw_content` as an [`AssignmentPayload`]; if it isn't one
/// (e.g. a direct `task` message carrying bare text), fall back to using
/// the whole string as the task content with a synthetic task id.
fn parse_assignment(raw_content: &str) -> (String, String) {
    match serde_json::from_str::<AssignmentPayload>(raw_content) {
        Ok(payload) => (payload.task_id, payload.content),
        Err(_) => ("direct".to_string(), raw_content.to_string()),
    }
}

fn explain_refusal(refusal: &Refusal) -> String {
    format!("Command was not executed: {refusal}. The plan was safely refused.")
}

async fn execute_command(command: &str, project_folder: &std::path::Path) -> String {
    let mut builder = tokio::process::Command::new("sh");
    builder.arg("-c").arg(command);
    builder.current_dir(project_folder);
    builder.env_clear();
    for (key, value) in pruned_environment() {
        builder.env(key, value);
    }
    builder.stdout(Stdio::piped());
    builder.stderr(Stdio::piped());

    let child = match builder.spawn() {
        Ok(child) => child,
        Err(e) => return format!("failed to spawn command: {e}"),
    };
    let pid = child.id();

    match tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            if !output.stderr.is_empty() {
                combined.push_str("\n[stderr]\n");
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            truncate_output(&combined)
        }
        Ok(Err(e)) => format!("command failed to complete: {e}"),
        Err(_) => {
            if let Some(pid) = pid {
                let pid = Pid::from_raw(pid as i32);
                let _ = kill(pid, Signal::SIGTERM);
                tokio::time::sleep(KILL_GRACE).await;
                let _ = kill(pid, Signal::SIGKILL);
            }
            "[timeout] command exceeded its time budget and was terminated".to_string()
        }
    }
}

fn extract_fenced_commands(text: &str) -> Vec<String> {
    static FENCE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:bash|sh|shell)?\n(.*?)```").expect("fence pattern must compile")
    });

    pattern
        .captures_iter(text)
        .flat_map(|cap| cap[1].lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect::<Vec<_>>())
        .collect()
}

/// Look for a "save ... to <path>" style instruction in the task text.
fn detect_save_request(task_content: &str) -> Option<PathBuf> {
    static SAVE_PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = SAVE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:save|write|create)[^.\n]*?(?:file(?:\s+named)?|as|to)\s+([\w./-]+\.\w+)")
            .expect("save pattern must compile")
    });

    pattern.captures(task_content).map(|cap| PathBuf::from(cap[1].to_string()))
}

fn extract_quoted_or_reply(task_content: &str, reply: &str) -> String {
    for quote in ['\'', '"'] {
        if let Some(start) = task_content.find(quote) {
            if let Some(end_rel) = task_content[start + 1..].find(quote) {
                let end = start + 1 + end_rel;
                return task_content[start + 1..end].to_string();
            }
        }
    }
    reply.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_bash_commands() {
        let reply = "Here you go:\n```bash\nls -la\npwd\n```\nDone.";
        let commands = extract_fenced_commands(reply);
        assert_eq!(commands, vec!["ls -la".to_string(), "pwd".to_string()]);
    }

    #[test]
    fn detects_save_request_with_explicit_filename() {
        let target = detect_save_request("create a file named hello.txt with content 'Hello World!'").unwrap();
        assert_eq!(target, PathBuf::from("hello.txt"));
    }

    #[test]
    fn no_save_request_when_task_has_no_file_token() {
        assert!(detect_save_request("summarize this article").is_none());
    }

    #[test]
    fn extracts_quoted_content_over_reply_fallback() {
        let content = extract_quoted_or_reply("create hello.txt with content 'Hello World!'", "ignored reply");
        assert_eq!(content, "Hello World!");
    }
}
