//! # Agent
//!
//! Identity and role of a participant in the topology. The poll loop and
//! outbox-via-Message-Store that an `Agent` "lives with" are implemented by
//! `swarmcore-agents`; this type only carries identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role an agent plays in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Coordinator,
    SubCoordinator,
    Analyst,
    DataScientist,
    Architect,
    Developer,
}

impl Role {
    /// Infer the role a task's content most plausibly calls for, used by
    /// the Coordinator's role-match scoring term.
    pub fn infer_from_keywords(text: &str) -> Role {
        let lower = text.to_lowercase();
        const ANALYST_WORDS: &[&str] = &["analyze", "report", "review", "audit"];
        const DATA_SCIENTIST_WORDS: &[&str] = &["data", "model", "dataset", "statistic", "ml", "train"];
        const ARCHITECT_WORDS: &[&str] = &["design", "architecture", "schema", "plan", "diagram"];

        if DATA_SCIENTIST_WORDS.iter().any(|w| lower.contains(w)) {
            Role::DataScientist
        } else if ARCHITECT_WORDS.iter().any(|w| lower.contains(w)) {
            Role::Architect
        } else if ANALYST_WORDS.iter().any(|w| lower.contains(w)) {
            Role::Analyst
        } else {
            Role::Developer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coordinator => "COORDINATOR",
            Role::SubCoordinator => "SUB-COORDINATOR",
            Role::Analyst => "ANALYST",
            Role::DataScientist => "DATA-SCIENTIST",
            Role::Architect => "ARCHITECT",
            Role::Developer => "DEVELOPER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of an agent participating in a request's topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub display_name: String,
    pub role: Role,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_inference_prefers_data_science_over_generic_developer() {
        assert_eq!(Role::infer_from_keywords("train a model on the dataset"), Role::DataScientist);
        assert_eq!(Role::infer_from_keywords("design the schema"), Role::Architect);
        assert_eq!(Role::infer_from_keywords("review the report"), Role::Analyst);
        assert_eq!(Role::infer_from_keywords("write a function"), Role::Developer);
    }
}
