//! # Message
//!
//! The unit of inter-agent communication. Persisted by the Message Store
//! (`swarmcore-store`); this module only owns the in-memory shape and the
//! closed set of message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of message types exchanged between agents.
///
/// New variants must not be added casually — every agent's inbox handler
/// matches exhaustively over this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// User-originated task, or an upward re-dispatch of one.
    Task,
    /// Coordinator → Sub-Coordinator assignment.
    SubTaskToSubqueen,
    /// Coordinator → Worker assignment (centralized / fully-connected).
    SubTask,
    /// Coordinator → Worker assignment carrying enriched context.
    EnhancedTask,
    /// Executor → parent: successful result.
    Response,
    /// Executor → parent: failure.
    Error,
    /// Sub-Coordinator → Coordinator: envelope carrying a Response or Error.
    GroupResponse,
    /// Coordinator → Dispatcher: terminal success for a top-level request.
    FinalResponse,
    /// Coordinator → Dispatcher: terminal failure for a top-level request.
    FinalError,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Task => "task",
            MessageType::SubTaskToSubqueen => "sub-task-to-subqueen",
            MessageType::SubTask => "sub-task",
            MessageType::EnhancedTask => "enhanced-task",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::GroupResponse => "group-response",
            MessageType::FinalResponse => "final-response",
            MessageType::FinalError => "final-error",
        };
        write!(f, "{s}")
    }
}

impl MessageType {
    /// Whether this type terminates a top-level request when it reaches
    /// the Dispatcher.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageType::FinalResponse | MessageType::FinalError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Task => "task",
            MessageType::SubTaskToSubqueen => "sub-task-to-subqueen",
            MessageType::SubTask => "sub-task",
            MessageType::EnhancedTask => "enhanced-task",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::GroupResponse => "group-response",
            MessageType::FinalResponse => "final-response",
            MessageType::FinalError => "final-error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "task" => MessageType::Task,
            "sub-task-to-subqueen" => MessageType::SubTaskToSubqueen,
            "sub-task" => MessageType::SubTask,
            "enhanced-task" => MessageType::EnhancedTask,
            "response" => MessageType::Response,
            "error" => MessageType::Error,
            "group-response" => MessageType::GroupResponse,
            "final-response" => MessageType::FinalResponse,
            "final-error" => MessageType::FinalError,
            _ => return None,
        })
    }
}

/// Delivery status of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processed,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "pending"),
            MessageStatus::Processed => write!(f, "processed"),
        }
    }
}

/// A persisted inter-agent message.
///
/// Invariant: a message with `status == Pending` is eligible to be
/// delivered to exactly one receiver — the one named in `receiver_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub message_type: MessageType,
    pub content: String,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

/// The fields needed to persist a new message; `id`/`timestamp`/`status`
/// are assigned by the store on insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub message_type: MessageType,
    pub content: String,
    pub request_id: Option<String>,
}

impl NewMessage {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            message_type,
            content: content.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_str() {
        for mt in [
            MessageType::Task,
            MessageType::SubTaskToSubqueen,
            MessageType::SubTask,
            MessageType::EnhancedTask,
            MessageType::Response,
            MessageType::Error,
            MessageType::GroupResponse,
            MessageType::FinalResponse,
            MessageType::FinalError,
        ] {
            let s = mt.as_str();
            assert_eq!(MessageType::from_str(s), Some(mt));
        }
    }

    #[test]
    fn only_final_variants_are_terminal() {
        assert!(MessageType::FinalResponse.is_terminal());
        assert!(MessageType::FinalError.is_terminal());
        assert!(!MessageType::Response.is_terminal());
        assert!(!MessageType::GroupResponse.is_terminal());
    }
}
