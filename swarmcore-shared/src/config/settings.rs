//! # Settings
//!
//! Typed configuration for the orchestration core, covering every option
//! enumerated in the design's "Configuration" section. Loaded via the
//! `config` crate layered as: built-in defaults -> base TOML ->
//! environment-specific TOML overlay -> `SWARMCORE_*` environment
//! variables, with `dotenvy` populating a local `.env` in development.
//! This mirrors the original framework's `OllamaFlowConfig.from_env()`
//! layering and the teacher's `TaskerConfig` base/environment TOML split.

use crate::error::{SwarmError, SwarmResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Orchestration topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    Hierarchical,
    Centralized,
    FullyConnected,
}

impl Default for Topology {
    fn default() -> Self {
        Topology::Centralized
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub topology: Topology,
    pub worker_count: u32,
    pub sub_coordinator_count: u32,
    pub model: String,
    pub secure_mode: bool,
    pub project_folder: PathBuf,
    pub parallel_llm: bool,
    pub max_workers_per_agent_pool: usize,
    pub per_llm_timeout_secs: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,
    pub polling_interval_ms: u64,
    pub task_timeout_secs: u64,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the SQLite message store file, or `:memory:`.
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "swarmcore_messages.db".to_string(),
            pool_size: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            worker_count: 3,
            sub_coordinator_count: 1,
            model: "llama3".to_string(),
            secure_mode: true,
            project_folder: PathBuf::from("."),
            parallel_llm: true,
            max_workers_per_agent_pool: 3,
            per_llm_timeout_secs: 30,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 60,
            polling_interval_ms: 100,
            task_timeout_secs: 300,
            database: DatabaseSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    pub fn per_llm_timeout(&self) -> Duration {
        Duration::from_secs(self.per_llm_timeout_secs)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_timeout_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    fn validate(&self) -> SwarmResult<()> {
        if self.worker_count == 0 {
            return Err(SwarmError::validation("worker-count must be >= 1"));
        }
        if self.topology == Topology::Hierarchical && self.sub_coordinator_count == 0 {
            return Err(SwarmError::validation(
                "sub-coordinator-count must be >= 1 for hierarchical topology",
            ));
        }
        if self.max_workers_per_agent_pool == 0 {
            return Err(SwarmError::validation(
                "max-workers-per-agent-pool must be >= 1",
            ));
        }
        Ok(())
    }

    /// Load layered configuration: defaults -> `config/base.toml` ->
    /// `config/{environment}.toml` -> `SWARMCORE_*` environment variables.
    /// `environment` defaults to the `SWARMCORE_ENV` variable, or
    /// `"development"`.
    pub fn load(config_dir: Option<&str>) -> SwarmResult<Self> {
        let _ = dotenvy::dotenv();
        let environment =
            std::env::var("SWARMCORE_ENV").unwrap_or_else(|_| "development".to_string());
        let dir = config_dir.unwrap_or("config");

        let mut builder = config::Config::builder();

        let base_path = format!("{dir}/base.toml");
        if std::path::Path::new(&base_path).exists() {
            builder = builder.add_source(config::File::with_name(&base_path).required(false));
        }
        let env_path = format!("{dir}/{environment}.toml");
        if std::path::Path::new(&env_path).exists() {
            builder = builder.add_source(config::File::with_name(&env_path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SWARMCORE")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| SwarmError::fatal(format!("failed to build configuration: {e}")))?
            .try_deserialize()
            .map_err(|e| SwarmError::fatal(format!("failed to deserialize configuration: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// `worker_count == 1` with `topology == Hierarchical` degrades to
    /// centralized behavior (boundary case B2 in the testable properties).
    pub fn effective_topology(&self) -> Topology {
        if self.topology == Topology::Hierarchical && self.worker_count == 1 {
            Topology::Centralized
        } else {
            self.topology
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_defaults() {
        let s = Settings::default();
        assert_eq!(s.circuit_breaker_threshold, 5);
        assert_eq!(s.circuit_breaker_timeout_secs, 60);
        assert_eq!(s.polling_interval_ms, 100);
        assert_eq!(s.task_timeout_secs, 300);
        assert_eq!(s.max_workers_per_agent_pool, 3);
    }

    #[test]
    fn zero_workers_fails_validation() {
        let mut s = Settings::default();
        s.worker_count = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn hierarchical_topology_requires_sub_coordinators() {
        let mut s = Settings::default();
        s.topology = Topology::Hierarchical;
        s.sub_coordinator_count = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn single_worker_hierarchical_degrades_to_centralized() {
        let mut s = Settings::default();
        s.topology = Topology::Hierarchical;
        s.worker_count = 1;
        assert_eq!(s.effective_topology(), Topology::Centralized);
    }
}
