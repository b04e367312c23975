//! Single-process runtime builder.
//!
//! Wires an [`OrchestrationEngine`] to the in-memory backends, with
//! presets for common setups. For durable deployments, construct the
//! engine directly over a persistent [`DurableLog`] backend instead.
//!
//! [`DurableLog`]: saga_runtime_core::port::DurableLog

use std::sync::Arc;
use std::time::Duration;

use saga_runtime_core::engine::{EngineConfig, OrchestrationEngine};
use saga_runtime_core::invoker::ActivityInvoker;
use saga_runtime_core::lock::LockManager;
use saga_runtime_core::policy::{PolicyRegistry, ResiliencyPolicy};
use saga_runtime_core::port::activity::ActivityClient;
use saga_runtime_core::telemetry::{RunTelemetry, TracingTelemetry};

use crate::memory_lock_store::InMemoryLockStore;
use crate::memory_log::InMemoryDurableLog;

/// In-process saga runtime: engine plus lock manager over in-memory
/// backends.
pub struct LocalRuntime<C: ActivityClient> {
    engine: Arc<OrchestrationEngine<InMemoryDurableLog, C>>,
    locks: Arc<LockManager<InMemoryLockStore>>,
}

impl<C: ActivityClient> LocalRuntime<C> {
    /// Preset for production-shaped in-process use: default policies.
    pub fn in_process(client: Arc<C>) -> Self {
        Self::builder(client).build()
    }

    /// Preset for tests: single-digit-millisecond backoff and a short
    /// per-call timeout so failure paths run fast.
    pub fn testing(client: Arc<C>) -> Self {
        Self::builder(client)
            .with_policies(PolicyRegistry::with_default(
                ResiliencyPolicy::default()
                    .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
                    .with_per_call_timeout(Duration::from_millis(250)),
            ))
            .build()
    }

    /// Create a builder for custom configuration.
    pub fn builder(client: Arc<C>) -> LocalRuntimeBuilder<C> {
        LocalRuntimeBuilder::new(client)
    }

    pub fn engine(&self) -> &OrchestrationEngine<InMemoryDurableLog, C> {
        &self.engine
    }

    pub fn locks(&self) -> &LockManager<InMemoryLockStore> {
        &self.locks
    }

    /// The backing log, for inspection in tests.
    pub fn log(&self) -> &InMemoryDurableLog {
        self.engine.log()
    }
}

/// Builder for custom [`LocalRuntime`] configuration.
pub struct LocalRuntimeBuilder<C: ActivityClient> {
    client: Arc<C>,
    policies: PolicyRegistry,
    telemetry: Arc<dyn RunTelemetry>,
    engine_config: EngineConfig,
}

impl<C: ActivityClient> LocalRuntimeBuilder<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            policies: PolicyRegistry::default(),
            telemetry: Arc::new(TracingTelemetry::new()),
            engine_config: EngineConfig::default(),
        }
    }

    /// Replace the resiliency policy registry.
    pub fn with_policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = policies;
        self
    }

    /// Replace the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn RunTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Replace the engine configuration.
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn build(self) -> LocalRuntime<C> {
        let invoker = Arc::new(ActivityInvoker::new(
            self.client,
            Arc::new(self.policies),
            self.telemetry.clone(),
        ));
        let engine = Arc::new(OrchestrationEngine::new(
            Arc::new(InMemoryDurableLog::new()),
            invoker,
            self.telemetry,
            self.engine_config,
        ));
        let locks = Arc::new(LockManager::new(InMemoryLockStore::new()));

        LocalRuntime { engine, locks }
    }
}
