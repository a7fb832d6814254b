//! Configuration loading for the orchestration core.

pub mod settings;

pub use settings::{DatabaseSettings, LoggingSettings, Settings, Topology};
