//! # swarmcore-shared
//!
//! Domain types, configuration, and error handling shared by every crate
//! in the swarmcore workspace: the durable Message Store, the LLM
//! Gateway, and the agent tree (Worker, Sub-Coordinator, Coordinator,
//! Dispatcher).

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use error::{SwarmError, SwarmResult};
