//! Orchestration engine: drives runs from declaration to a terminal
//! status.
//!
//! The engine owns no state of its own. Every cycle it re-reads the run's
//! history from the durable log, folds it into a [`RunState`], asks the
//! [`SagaCoordinator`] for the next action, executes it, and appends the
//! outcome with optimistic concurrency. A crash at any point is recovered
//! by calling [`OrchestrationEngine::resume`], which replays the log and
//! picks up exactly where the history ends.

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::coordinator::{CompensationAction, NextAction, SagaCoordinator};
use crate::event::{EventKind, FailureInfo, RunEvent, RunId};
use crate::invoker::ActivityInvoker;
use crate::port::activity::ActivityClient;
use crate::port::durable_log::{DurableLog, DurableLogError};
use crate::run::{CompensationOutcome, RunState, RunStatus};
use crate::saga::{SagaDefinition, StepDef};
use crate::telemetry::RunTelemetry;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many append conflicts in a row to tolerate before giving up.
    /// Each conflict triggers a full re-read and re-decision.
    pub conflict_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_retry_limit: 5,
        }
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError<E> {
    /// `start` was called for a run that already has history.
    #[error("run already started: {run_id}")]
    AlreadyStarted { run_id: RunId },

    /// `resume` or `state` was called for a run with no history.
    #[error("run not found: {run_id}")]
    NotFound { run_id: RunId },

    /// The durable log failed.
    #[error(transparent)]
    Log(DurableLogError<E>),

    /// Appends kept conflicting with a concurrent writer beyond the
    /// configured limit.
    #[error("append conflicts exhausted for run {run_id} after {attempts} attempts")]
    ConflictRetriesExhausted { run_id: RunId, attempts: u32 },
}

/// Whether an execution pass moved the run forward or lost an append race.
enum Pass {
    Advanced,
    Conflicted,
}

/// Event-sourced saga engine over a [`DurableLog`] and an
/// [`ActivityClient`].
pub struct OrchestrationEngine<L: DurableLog, C: ActivityClient> {
    log: Arc<L>,
    invoker: Arc<ActivityInvoker<C>>,
    coordinator: SagaCoordinator,
    telemetry: Arc<dyn RunTelemetry>,
    config: EngineConfig,
    cancel_requests: RwLock<HashSet<RunId>>,
}

impl<L: DurableLog, C: ActivityClient> OrchestrationEngine<L, C> {
    pub fn new(
        log: Arc<L>,
        invoker: Arc<ActivityInvoker<C>>,
        telemetry: Arc<dyn RunTelemetry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            log,
            invoker,
            coordinator: SagaCoordinator::new(),
            telemetry,
            config,
            cancel_requests: RwLock::new(HashSet::new()),
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn invoker(&self) -> &ActivityInvoker<C> {
        &self.invoker
    }

    /// Start a new run of `saga` under `run_id` and drive it to a
    /// terminal status.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyStarted`] if the run already has history;
    /// use [`OrchestrationEngine::resume`] for that.
    pub async fn start(
        &self,
        run_id: RunId,
        saga: &SagaDefinition,
    ) -> Result<RunState, EngineError<L::Error>> {
        let exists = self
            .log
            .run_exists(&run_id)
            .await
            .map_err(|e| EngineError::Log(DurableLogError::Backend(e)))?;
        if exists {
            return Err(EngineError::AlreadyStarted { run_id });
        }

        self.telemetry.on_run_started(&run_id, saga.name());
        self.drive(&run_id, saga).await
    }

    /// Resume a run whose engine died mid-flight.
    ///
    /// Replays the history and re-derives the next action; steps whose
    /// outcome is already recorded are not re-invoked, so resuming a run
    /// any number of times is idempotent.
    pub async fn resume(
        &self,
        run_id: &RunId,
        saga: &SagaDefinition,
    ) -> Result<RunState, EngineError<L::Error>> {
        let exists = self
            .log
            .run_exists(run_id)
            .await
            .map_err(|e| EngineError::Log(DurableLogError::Backend(e)))?;
        if !exists {
            return Err(EngineError::NotFound {
                run_id: run_id.clone(),
            });
        }

        self.drive(run_id, saga).await
    }

    /// Request cancellation of a run.
    ///
    /// Takes effect at the next group boundary: in-flight steps are not
    /// interrupted, and completed work is unwound through the normal
    /// compensation path. Cancelling a terminal run is a no-op.
    pub async fn request_cancel(&self, run_id: &RunId) {
        self.cancel_requests.write().await.insert(run_id.clone());
    }

    /// Current state of a run, replayed from its history.
    pub async fn state(
        &self,
        run_id: &RunId,
        saga: &SagaDefinition,
    ) -> Result<RunState, EngineError<L::Error>> {
        let events = self
            .log
            .read(run_id)
            .await
            .map_err(|e| EngineError::Log(DurableLogError::Backend(e)))?;
        if events.is_empty() {
            return Err(EngineError::NotFound {
                run_id: run_id.clone(),
            });
        }
        Ok(RunState::replay(run_id.clone(), saga, &events))
    }

    /// Read, decide, execute, repeat until the run is terminal.
    async fn drive(
        &self,
        run_id: &RunId,
        saga: &SagaDefinition,
    ) -> Result<RunState, EngineError<L::Error>> {
        let mut conflicts: u32 = 0;

        loop {
            let events = self
                .log
                .read(run_id)
                .await
                .map_err(|e| EngineError::Log(DurableLogError::Backend(e)))?;
            let state = RunState::replay(run_id.clone(), saga, &events);
            let cancel = self.cancel_requests.read().await.contains(run_id);

            let pass = match self.coordinator.next_action(&state, saga, cancel) {
                NextAction::Idle => {
                    self.finish(run_id, saga, &state).await;
                    return Ok(state);
                }
                NextAction::ScheduleGroup { steps, .. } => {
                    self.execute_group(run_id, &state, steps).await?
                }
                NextAction::RunCompensations(actions) => {
                    self.execute_compensations(run_id, &state, actions).await?
                }
                NextAction::CompleteRun { output } => {
                    self.close_completed(run_id, &state, output).await?
                }
                NextAction::FailRun { reason } => self.close_failed(run_id, &state, reason).await?,
            };

            match pass {
                Pass::Advanced => conflicts = 0,
                Pass::Conflicted => {
                    conflicts += 1;
                    if conflicts >= self.config.conflict_retry_limit {
                        return Err(EngineError::ConflictRetriesExhausted {
                            run_id: run_id.clone(),
                            attempts: conflicts,
                        });
                    }
                }
            }
        }
    }

    /// Schedule and invoke the pending members of one group.
    ///
    /// All members are scheduled before any invocation; invocations run
    /// concurrently; outcomes are appended in declaration order so that
    /// replay (and therefore compensation ordering) is deterministic.
    async fn execute_group(
        &self,
        run_id: &RunId,
        state: &RunState,
        steps: Vec<StepDef>,
    ) -> Result<Pass, EngineError<L::Error>> {
        let mut expected = state.next_sequence;

        for step in &steps {
            // A crash may have left the schedule event behind already.
            if state.step_outcomes.contains_key(&step.name) {
                continue;
            }
            if !self
                .append(run_id, &mut expected, RunEvent::step_scheduled(run_id.clone(), &step.name))
                .await?
            {
                return Ok(Pass::Conflicted);
            }
            self.telemetry.on_step_scheduled(run_id, &step.name);
        }

        let invocations = steps
            .iter()
            .map(|step| self.invoker.invoke(&step.activity, &step.input));
        let outcomes = join_all(invocations).await;

        for (step, outcome) in steps.iter().zip(outcomes) {
            let event = match outcome {
                Ok(output) => {
                    self.telemetry.on_step_completed(run_id, &step.name);
                    RunEvent::step_completed(run_id.clone(), &step.name, output)
                }
                Err(err) => {
                    let failure = err.failure_info();
                    self.telemetry.on_step_failed(run_id, &step.name, &failure.message);
                    RunEvent::step_failed(run_id.clone(), &step.name, failure)
                }
            };
            if !self.append(run_id, &mut expected, event).await? {
                return Ok(Pass::Conflicted);
            }
        }

        Ok(Pass::Advanced)
    }

    /// Run compensations strictly in the given (LIFO) order.
    ///
    /// A compensation failure stops the sweep; the next decision cycle
    /// turns it into a terminal run failure.
    async fn execute_compensations(
        &self,
        run_id: &RunId,
        state: &RunState,
        actions: Vec<CompensationAction>,
    ) -> Result<Pass, EngineError<L::Error>> {
        let mut expected = state.next_sequence;

        if actions.is_empty() {
            // Nothing declares a compensation. Record the unwind start
            // with a bare schedule event so replay derives the
            // compensated terminal status.
            let marker = RunEvent::builder(run_id.clone(), EventKind::CompensationScheduled).build();
            if !self.append(run_id, &mut expected, marker).await? {
                return Ok(Pass::Conflicted);
            }
            return Ok(Pass::Advanced);
        }

        for action in actions {
            // A crash may have left the schedule event behind already.
            let already_scheduled = matches!(
                state.compensations.get(&action.step),
                Some(CompensationOutcome::Scheduled)
            );
            if !already_scheduled {
                if !self
                    .append(
                        run_id,
                        &mut expected,
                        RunEvent::compensation_scheduled(run_id.clone(), &action.step),
                    )
                    .await?
                {
                    return Ok(Pass::Conflicted);
                }
                self.telemetry.on_compensation_scheduled(run_id, &action.step);
            }

            let event = match self.invoker.invoke(&action.activity, &action.input).await {
                Ok(output) => {
                    self.telemetry.on_compensation_completed(run_id, &action.step);
                    RunEvent::compensation_completed(run_id.clone(), &action.step, output)
                }
                Err(err) => {
                    let failure = err.failure_info();
                    self.telemetry
                        .on_compensation_failed(run_id, &action.step, &failure.message);
                    RunEvent::compensation_failed(run_id.clone(), &action.step, failure)
                }
            };
            let failed = matches!(event.kind, EventKind::CompensationFailed);
            if !self.append(run_id, &mut expected, event).await? {
                return Ok(Pass::Conflicted);
            }
            if failed {
                break;
            }
        }

        Ok(Pass::Advanced)
    }

    async fn close_completed(
        &self,
        run_id: &RunId,
        state: &RunState,
        output: Value,
    ) -> Result<Pass, EngineError<L::Error>> {
        let mut expected = state.next_sequence;
        if !self
            .append(run_id, &mut expected, RunEvent::run_completed(run_id.clone(), output))
            .await?
        {
            return Ok(Pass::Conflicted);
        }
        Ok(Pass::Advanced)
    }

    async fn close_failed(
        &self,
        run_id: &RunId,
        state: &RunState,
        reason: FailureInfo,
    ) -> Result<Pass, EngineError<L::Error>> {
        let mut expected = state.next_sequence;
        if !self
            .append(run_id, &mut expected, RunEvent::run_failed(run_id.clone(), reason))
            .await?
        {
            return Ok(Pass::Conflicted);
        }
        Ok(Pass::Advanced)
    }

    /// Append at `expected`, bumping it on success. A conflict returns
    /// `Ok(false)`: the caller abandons the pass and the drive loop
    /// re-reads.
    async fn append(
        &self,
        run_id: &RunId,
        expected: &mut u64,
        event: RunEvent,
    ) -> Result<bool, EngineError<L::Error>> {
        match self.log.append(run_id, *expected, event).await {
            Ok(sequence) => {
                *expected = sequence.0 + 1;
                Ok(true)
            }
            Err(err) if err.is_conflict() => Ok(false),
            Err(err) => Err(EngineError::Log(err)),
        }
    }

    /// Terminal housekeeping: emit lifecycle telemetry and drop the
    /// cancel flag.
    async fn finish(&self, run_id: &RunId, saga: &SagaDefinition, state: &RunState) {
        match state.status {
            RunStatus::Completed => self.telemetry.on_run_completed(run_id, saga.name()),
            RunStatus::Compensated => self.telemetry.on_run_compensated(run_id, saga.name()),
            RunStatus::Failed => {
                let message = state
                    .failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unspecified");
                self.telemetry.on_run_failed(run_id, saga.name(), message);
            }
            _ => {}
        }
        self.cancel_requests.write().await.remove(run_id);
    }
}
