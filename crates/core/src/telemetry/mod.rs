//! Telemetry emission for run progress and activity attempts.
//!
//! The core emits structured events to an external sink through the
//! [`RunTelemetry`] trait; format and transport are the sink's concern.
//! [`TracingTelemetry`] is the default sink, backed by `tracing`.

use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::event::RunId;

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to emitted events.
    pub service_name: String,
    /// Log level filter.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "saga-runtime".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

/// Guard returned by [`init_telemetry`]; keep it alive for the process
/// lifetime.
pub struct TelemetryGuard;

impl TelemetryGuard {
    pub fn shutdown(self) {}
}

/// Install the global tracing subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::new(&config.log_level);

    Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    TelemetryGuard
}

/// Sink for run lifecycle and activity attempt observations.
///
/// Every attempt is observable here even though only final outcomes are
/// persisted as events.
pub trait RunTelemetry: Send + Sync {
    fn on_run_started(&self, run_id: &RunId, saga: &str);

    fn on_run_completed(&self, run_id: &RunId, saga: &str);

    fn on_run_compensated(&self, run_id: &RunId, saga: &str);

    fn on_run_failed(&self, run_id: &RunId, saga: &str, error: &str);

    fn on_step_scheduled(&self, run_id: &RunId, step: &str);

    fn on_step_completed(&self, run_id: &RunId, step: &str);

    fn on_step_failed(&self, run_id: &RunId, step: &str, error: &str);

    fn on_compensation_scheduled(&self, run_id: &RunId, step: &str);

    fn on_compensation_completed(&self, run_id: &RunId, step: &str);

    fn on_compensation_failed(&self, run_id: &RunId, step: &str, error: &str);

    /// One invocation attempt finished, successfully or not.
    fn on_attempt(&self, activity: &str, attempt: u32, elapsed: Duration, error: Option<&str>);
}

/// Default tracing-backed sink.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl RunTelemetry for TracingTelemetry {
    fn on_run_started(&self, run_id: &RunId, saga: &str) {
        info!(run_id = %run_id, saga = saga, "run started");
    }

    fn on_run_completed(&self, run_id: &RunId, saga: &str) {
        info!(run_id = %run_id, saga = saga, "run completed");
    }

    fn on_run_compensated(&self, run_id: &RunId, saga: &str) {
        warn!(run_id = %run_id, saga = saga, "run compensated");
    }

    fn on_run_failed(&self, run_id: &RunId, saga: &str, error: &str) {
        error!(run_id = %run_id, saga = saga, error = error, "run failed");
    }

    fn on_step_scheduled(&self, run_id: &RunId, step: &str) {
        debug!(run_id = %run_id, step = step, "step scheduled");
    }

    fn on_step_completed(&self, run_id: &RunId, step: &str) {
        info!(run_id = %run_id, step = step, "step completed");
    }

    fn on_step_failed(&self, run_id: &RunId, step: &str, error: &str) {
        warn!(run_id = %run_id, step = step, error = error, "step failed");
    }

    fn on_compensation_scheduled(&self, run_id: &RunId, step: &str) {
        debug!(run_id = %run_id, step = step, "compensation scheduled");
    }

    fn on_compensation_completed(&self, run_id: &RunId, step: &str) {
        info!(run_id = %run_id, step = step, "compensation completed");
    }

    fn on_compensation_failed(&self, run_id: &RunId, step: &str, error: &str) {
        error!(run_id = %run_id, step = step, error = error, "compensation failed");
    }

    fn on_attempt(&self, activity: &str, attempt: u32, elapsed: Duration, error: Option<&str>) {
        match error {
            None => debug!(
                activity = activity,
                attempt = attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "activity attempt succeeded"
            ),
            Some(error) => debug!(
                activity = activity,
                attempt = attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                error = error,
                "activity attempt failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "saga-runtime");
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        let sink = TracingTelemetry::new();
        let run_id = RunId::from("r");
        sink.on_run_started(&run_id, "s");
        sink.on_step_failed(&run_id, "step", "boom");
        sink.on_attempt("a", 1, Duration::from_millis(3), Some("timeout"));
    }
}
