//! # saga-runtime-core
//!
//! Core durable saga orchestration library with zero infrastructure
//! dependencies. Provides event-sourced run histories, compensation, and
//! resiliency abstractions.
//!
//! ## Architecture
//!
//! This crate defines the core types and port traits of the runtime. It
//! has ZERO dependencies on infrastructure (database, messaging, etc.);
//! backends plug in through the [`port`] traits.
//!
//! ## Modules
//!
//! - [`event`]: [`RunEvent`], [`EventKind`], identifier newtypes
//! - [`saga`]: [`SagaDefinition`], [`StepDef`], [`StepGroup`] declarations
//! - [`run`]: [`RunState`], the pure fold over a run's history
//! - [`port`]: ports for infrastructure adapters (durable log, activity
//!   client, lock store)
//! - [`coordinator`]: forward sequencing and LIFO compensation planning
//! - [`engine`]: the drive loop turning decisions into appended events
//! - [`invoker`]: retry, timeout, and circuit breaking around activities
//! - [`policy`]: resiliency policies and the circuit breaker registry
//! - [`lock`]: lease-style distributed locks
//! - [`telemetry`]: run lifecycle observation hooks
//!
//! ## Usage
//!
//! ```rust
//! use saga_runtime_core::saga::{SagaDefinition, StepDef};
//! use serde_json::json;
//!
//! let saga = SagaDefinition::builder("order-fulfilment")
//!     .step(
//!         StepDef::new("reserve-inventory", "inventory.reserve", json!({"sku": "A"}))
//!             .with_compensation_from_output("inventory.release"),
//!     )
//!     .step(StepDef::new("charge-payment", "payments.charge", json!({"amount": 10})))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(saga.step_count(), 2);
//! ```

pub mod coordinator;
pub mod engine;
pub mod event;
pub mod invoker;
pub mod lock;
pub mod policy;
pub mod port;
pub mod run;
pub mod saga;
pub mod telemetry;

pub use coordinator::{CompensationAction, NextAction, SagaCoordinator};
pub use engine::{EngineConfig, EngineError, OrchestrationEngine};
pub use event::{
    EventKind, FailureInfo, FailureKind, RunEvent, RunEventBuilder, RunId, SequenceNr,
};
pub use invoker::{ActivityInvoker, InvokeError};
pub use lock::{LockError, LockManager, ReleaseOutcome};
pub use policy::circuit::{CircuitBreakerRegistry, CircuitOpenError, CircuitState};
pub use policy::{
    evaluate, PolicyRegistry, PolicyRegistryBuilder, ResiliencyPolicy, RetryDecision,
};
pub use port::{
    ActivityClient, ActivityFailure, ActivityId, DurableLog, DurableLogError, LockRecord,
    LockStore,
};
pub use run::{CompensationOutcome, RunState, RunStatus, StepOutcome};
pub use saga::{
    CompensationDef, SagaDefinition, SagaDefinitionBuilder, SagaValidationError, StepDef,
    StepGroup,
};
pub use telemetry::{
    init_telemetry, RunTelemetry, TelemetryConfig, TelemetryGuard, TracingTelemetry,
};
