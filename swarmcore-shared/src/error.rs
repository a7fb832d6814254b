//! # Error Kinds
//!
//! Crate-wide error type for the orchestration core. Variants correspond
//! 1:1 to the error kinds enumerated in the design: `Validation`,
//! `BackendUnavailable`, `Timeout`, `CommandBlocked`, `AssignmentFailure`,
//! `ParseFailure`, and `Fatal`.
//!
//! `CommandBlocked` is carried as an error variant for plumbing but callers
//! that receive it from command execution should treat it as a normal,
//! successful refusal response rather than propagate it as a failure — see
//! the Worker's command execution path.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type SwarmResult<T> = Result<T, SwarmError>;

#[derive(Debug, Error)]
pub enum SwarmError {
    /// Bad input to an agent (oversized content, empty task text, etc).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Every candidate LLM backend was exhausted or unreachable.
    #[error("no LLM backend available: {0}")]
    BackendUnavailable(String),

    /// An LLM attempt, command, or task end-to-end budget was exceeded.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The command-safety policy refused an action. Not a failure from the
    /// operator's perspective — the plan was safely declined.
    #[error("command refused by safety policy: {0}")]
    CommandBlocked(String),

    /// No eligible assignee remained after the availability cascade.
    #[error("no eligible assignee: {0}")]
    AssignmentFailure(String),

    /// LLM output could not be parsed as structured data by any recovery
    /// stage. Usually recovered locally by falling back to an unstructured
    /// result; surfaced here when the caller has no fallback left.
    #[error("failed to parse LLM output: {0}")]
    ParseFailure(String),

    /// Message Store or other persistence I/O failure. Fatal for the
    /// process: the core cannot orchestrate without durable messaging.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl SwarmError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn command_blocked(msg: impl Into<String>) -> Self {
        Self::CommandBlocked(msg.into())
    }

    pub fn assignment_failure(msg: impl Into<String>) -> Self {
        Self::AssignmentFailure(msg.into())
    }

    pub fn parse_failure(msg: impl Into<String>) -> Self {
        Self::ParseFailure(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Whether this error kind is expected to be recoverable locally by the
    /// component that raised it (per the propagation rules in the design).
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, Self::CommandBlocked(_) | Self::ParseFailure(_))
    }
}
