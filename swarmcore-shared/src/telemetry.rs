//! # Telemetry
//!
//! Bootstraps a `tracing-subscriber` formatter driven by an `EnvFilter`,
//! matching the teacher's logging setup: `RUST_LOG`-style filtering with
//! a plain or JSON formatter selected by configuration.

use crate::config::LoggingSettings;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. Safe to call once per process;
/// a second call is a no-op (the underlying `set_global_default` error is
/// swallowed, matching the common "init logging at most once" pattern
/// used by test harnesses that call this from multiple test modules).
pub fn init(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let result = if settings.json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already initialized");
    }
}
