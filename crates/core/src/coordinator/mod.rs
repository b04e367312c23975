//! Saga coordinator: forward sequencing and compensation ordering.
//!
//! The coordinator is a pure decision layer. Given the replayed
//! [`RunState`] and the saga declaration it derives the next action for
//! the engine; it holds no state of its own, which is what keeps crash
//! recovery a plain replay-and-redecide.

use serde_json::Value;

use crate::event::FailureInfo;
use crate::port::activity::ActivityId;
use crate::run::{CompensationOutcome, RunState, RunStatus, StepOutcome};
use crate::saga::{SagaDefinition, StepDef};

/// A compensation ready to be invoked.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensationAction {
    /// Forward step being undone.
    pub step: String,
    /// Compensation activity to invoke.
    pub activity: ActivityId,
    /// Input for the compensation: the declared input, falling back to
    /// the forward step's recorded output.
    pub input: Value,
}

/// Next action for the engine to take on a run.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// Schedule the pending members of the group at `index`.
    ScheduleGroup { index: usize, steps: Vec<StepDef> },
    /// Run the listed compensations, in order (LIFO over completion).
    RunCompensations(Vec<CompensationAction>),
    /// All groups done: close the run successfully.
    CompleteRun { output: Value },
    /// Close the run as terminally failed.
    FailRun { reason: FailureInfo },
    /// Nothing to do; the run is already terminal.
    Idle,
}

/// Decides compensation ordering and drives forward sequencing.
#[derive(Debug, Default)]
pub struct SagaCoordinator;

impl SagaCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Derive the next action from the replayed state.
    ///
    /// Re-deriving from the same state always yields the same action, and
    /// actions whose outcome events already exist in the log produce
    /// empty pending sets, so re-issuing after a crash is a no-op.
    pub fn next_action(
        &self,
        state: &RunState,
        saga: &SagaDefinition,
        cancel_requested: bool,
    ) -> NextAction {
        if state.status.is_terminal() {
            return NextAction::Idle;
        }

        let unwinding = state.status == RunStatus::Compensating || cancel_requested;
        if unwinding {
            return self.compensation_action(state, saga, cancel_requested);
        }

        if state.cursor >= saga.groups().len() {
            let output = state
                .completion_order
                .last()
                .and_then(|name| state.step_output(name))
                .cloned()
                .unwrap_or(Value::Null);
            return NextAction::CompleteRun { output };
        }

        let pending: Vec<StepDef> = saga.groups()[state.cursor]
            .steps()
            .into_iter()
            .filter(|step| !state.step_completed(&step.name))
            .cloned()
            .collect();

        NextAction::ScheduleGroup {
            index: state.cursor,
            steps: pending,
        }
    }

    fn compensation_action(
        &self,
        state: &RunState,
        saga: &SagaDefinition,
        cancel_requested: bool,
    ) -> NextAction {
        // A compensation that exhausted its retries is terminal: the run
        // moves to failed and waits for an operator. No alternate
        // recovery is guessed at.
        if let Some((step, error)) = state.failed_compensation() {
            return NextAction::FailRun {
                reason: FailureInfo::permanent(format!(
                    "compensation for step '{step}' failed unrecoverably: {}",
                    error.message
                )),
            };
        }

        if state.completion_order.is_empty() {
            // Nothing was done, so there is nothing to unwind.
            return NextAction::FailRun {
                reason: self.terminal_reason(state, cancel_requested),
            };
        }

        let pending: Vec<CompensationAction> = state
            .compensation_plan(saga)
            .into_iter()
            .filter(|step| {
                !matches!(
                    state.compensations.get(&step.name),
                    Some(CompensationOutcome::Completed)
                )
            })
            .filter_map(|step| self.compensation_for(state, step))
            .collect();

        if !pending.is_empty() {
            return NextAction::RunCompensations(pending);
        }

        if state.status == RunStatus::Running {
            // Cancelled with completed work that declares no
            // compensations: steps without one count as already
            // compensated, so the unwind is trivially complete. It still
            // has to start, so replay can derive the terminal status.
            return NextAction::RunCompensations(Vec::new());
        }

        NextAction::Idle
    }

    fn compensation_for(&self, state: &RunState, step: &StepDef) -> Option<CompensationAction> {
        // compensation_plan only yields steps with a declared compensation.
        let compensation = step.compensation.as_ref()?;
        let input = compensation
            .input
            .clone()
            .or_else(|| state.step_output(&step.name).cloned())
            .unwrap_or(Value::Null);
        Some(CompensationAction {
            step: step.name.clone(),
            activity: compensation.activity.clone(),
            input,
        })
    }

    fn terminal_reason(&self, state: &RunState, cancel_requested: bool) -> FailureInfo {
        if let Some(error) = state.step_outcomes.values().find_map(|o| match o {
            StepOutcome::Failed(error) => Some(error.clone()),
            _ => None,
        }) {
            return error;
        }
        if cancel_requested {
            return FailureInfo::permanent("run cancelled by request");
        }
        FailureInfo::permanent("run failed with no completed steps")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RunEvent, RunId, SequenceNr};
    use crate::saga::StepDef;
    use serde_json::json;

    fn saga() -> SagaDefinition {
        SagaDefinition::builder("order-fulfilment")
            .step(
                StepDef::new("reserve-inventory", "inventory.reserve", json!({"sku": "A"}))
                    .with_compensation_from_output("inventory.release"),
            )
            .step(
                StepDef::new("charge-payment", "payments.charge", json!({"amount": 10}))
                    .with_compensation("payments.refund", json!({"amount": 10})),
            )
            .step(StepDef::new("ship-order", "shipping.dispatch", json!({})))
            .build()
            .unwrap()
    }

    fn replayed(events: Vec<RunEvent>) -> RunState {
        let stamped: Vec<RunEvent> = events
            .into_iter()
            .enumerate()
            .map(|(i, mut e)| {
                e.sequence = SequenceNr(i as u64 + 1);
                e
            })
            .collect();
        RunState::replay(RunId::from("r"), &saga(), &stamped)
    }

    #[test]
    fn test_fresh_run_schedules_first_group() {
        let state = replayed(vec![]);
        let action = SagaCoordinator::new().next_action(&state, &saga(), false);
        match action {
            NextAction::ScheduleGroup { index, steps } => {
                assert_eq!(index, 0);
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].name, "reserve-inventory");
            }
            other => panic!("expected ScheduleGroup, got {other:?}"),
        }
    }

    #[test]
    fn test_all_groups_done_completes_run() {
        let run_id = RunId::from("r");
        let state = replayed(vec![
            RunEvent::step_completed(run_id.clone(), "reserve-inventory", json!({"r": 1})),
            RunEvent::step_completed(run_id.clone(), "charge-payment", json!({"t": 2})),
            RunEvent::step_completed(run_id, "ship-order", json!({"track": "TRK-9"})),
        ]);
        let action = SagaCoordinator::new().next_action(&state, &saga(), false);
        assert_eq!(
            action,
            NextAction::CompleteRun {
                output: json!({"track": "TRK-9"})
            }
        );
    }

    #[test]
    fn test_failure_produces_lifo_compensations_for_completed_prefix_only() {
        let run_id = RunId::from("r");
        let state = replayed(vec![
            RunEvent::step_completed(run_id.clone(), "reserve-inventory", json!({"res": "R-1"})),
            RunEvent::step_completed(run_id.clone(), "charge-payment", json!({"txn": "T-1"})),
            RunEvent::step_failed(run_id, "ship-order", FailureInfo::permanent("no carrier")),
        ]);

        let action = SagaCoordinator::new().next_action(&state, &saga(), false);
        match action {
            NextAction::RunCompensations(actions) => {
                let steps: Vec<&str> = actions.iter().map(|a| a.step.as_str()).collect();
                assert_eq!(steps, vec!["charge-payment", "reserve-inventory"]);

                // Explicit input wins; missing input falls back to the
                // forward step's output.
                assert_eq!(actions[0].input, json!({"amount": 10}));
                assert_eq!(actions[1].input, json!({"res": "R-1"}));
                assert_eq!(actions[1].activity.as_str(), "inventory.release");
            }
            other => panic!("expected RunCompensations, got {other:?}"),
        }
    }

    #[test]
    fn test_already_compensated_steps_are_not_rescheduled() {
        let run_id = RunId::from("r");
        let state = replayed(vec![
            RunEvent::step_completed(run_id.clone(), "reserve-inventory", json!({})),
            RunEvent::step_completed(run_id.clone(), "charge-payment", json!({})),
            RunEvent::step_failed(run_id.clone(), "ship-order", FailureInfo::permanent("x")),
            RunEvent::compensation_scheduled(run_id.clone(), "charge-payment"),
            RunEvent::compensation_completed(run_id, "charge-payment", json!({})),
        ]);

        let action = SagaCoordinator::new().next_action(&state, &saga(), false);
        match action {
            NextAction::RunCompensations(actions) => {
                assert_eq!(actions.len(), 1);
                assert_eq!(actions[0].step, "reserve-inventory");
            }
            other => panic!("expected RunCompensations, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_compensation_fails_the_run() {
        let run_id = RunId::from("r");
        let state = replayed(vec![
            RunEvent::step_completed(run_id.clone(), "reserve-inventory", json!({})),
            RunEvent::step_failed(run_id.clone(), "charge-payment", FailureInfo::permanent("x")),
            RunEvent::compensation_scheduled(run_id.clone(), "reserve-inventory"),
            RunEvent::compensation_failed(
                run_id,
                "reserve-inventory",
                FailureInfo::transient("store unreachable"),
            ),
        ]);

        let action = SagaCoordinator::new().next_action(&state, &saga(), false);
        match action {
            NextAction::FailRun { reason } => {
                assert!(reason.message.contains("reserve-inventory"));
            }
            other => panic!("expected FailRun, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_with_nothing_completed_fails_run() {
        let run_id = RunId::from("r");
        let state = replayed(vec![RunEvent::step_failed(
            run_id,
            "reserve-inventory",
            FailureInfo::permanent("out of stock"),
        )]);

        let action = SagaCoordinator::new().next_action(&state, &saga(), false);
        match action {
            NextAction::FailRun { reason } => assert_eq!(reason.message, "out of stock"),
            other => panic!("expected FailRun, got {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_routes_through_compensation() {
        let run_id = RunId::from("r");
        let state = replayed(vec![RunEvent::step_completed(
            run_id,
            "reserve-inventory",
            json!({"res": "R-1"}),
        )]);

        let action = SagaCoordinator::new().next_action(&state, &saga(), true);
        match action {
            NextAction::RunCompensations(actions) => {
                assert_eq!(actions.len(), 1);
                assert_eq!(actions[0].step, "reserve-inventory");
            }
            other => panic!("expected RunCompensations, got {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_with_uncompensable_work_requests_empty_unwind() {
        let plain = SagaDefinition::builder("no-comp")
            .step(StepDef::new("s1", "a", json!({})))
            .step(StepDef::new("s2", "b", json!({})))
            .build()
            .unwrap();
        let run_id = RunId::from("r");
        let events: Vec<RunEvent> = vec![
            RunEvent::step_scheduled(run_id.clone(), "s1"),
            RunEvent::step_completed(run_id.clone(), "s1", json!({})),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, mut e)| {
            e.sequence = SequenceNr(i as u64 + 1);
            e
        })
        .collect();
        let state = RunState::replay(run_id, &plain, &events);

        // Steps without a compensation count as already compensated, so
        // the run must not close as failed; the engine records the
        // unwind start and replay derives the compensated status.
        let action = SagaCoordinator::new().next_action(&state, &plain, true);
        assert_eq!(action, NextAction::RunCompensations(Vec::new()));
    }

    #[test]
    fn test_cancellation_before_any_completion_fails_run() {
        let state = replayed(vec![]);
        let action = SagaCoordinator::new().next_action(&state, &saga(), true);
        match action {
            NextAction::FailRun { reason } => {
                assert!(reason.message.contains("cancelled"));
            }
            other => panic!("expected FailRun, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_state_is_idle() {
        let run_id = RunId::from("r");
        let state = replayed(vec![
            RunEvent::step_completed(run_id.clone(), "reserve-inventory", json!({})),
            RunEvent::step_completed(run_id.clone(), "charge-payment", json!({})),
            RunEvent::step_completed(run_id.clone(), "ship-order", json!({})),
            RunEvent::run_completed(run_id, json!({})),
        ]);
        let action = SagaCoordinator::new().next_action(&state, &saga(), false);
        assert_eq!(action, NextAction::Idle);

        // Cancellation after the fact changes nothing.
        let action = SagaCoordinator::new().next_action(&state, &saga(), true);
        assert_eq!(action, NextAction::Idle);
    }

    #[test]
    fn test_resume_mid_group_schedules_only_pending_members() {
        let wide = SagaDefinition::builder("fan")
            .parallel(vec![
                StepDef::new("left", "a", json!({})),
                StepDef::new("right", "b", json!({})),
            ])
            .build()
            .unwrap();
        let run_id = RunId::from("r");
        let events = vec![
            RunEvent::step_scheduled(run_id.clone(), "left"),
            RunEvent::step_scheduled(run_id.clone(), "right"),
            RunEvent::step_completed(run_id.clone(), "left", json!({})),
        ];
        let stamped: Vec<RunEvent> = events
            .into_iter()
            .enumerate()
            .map(|(i, mut e)| {
                e.sequence = SequenceNr(i as u64 + 1);
                e
            })
            .collect();
        let state = RunState::replay(run_id, &wide, &stamped);

        let action = SagaCoordinator::new().next_action(&state, &wide, false);
        match action {
            NextAction::ScheduleGroup { index, steps } => {
                assert_eq!(index, 0);
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].name, "right");
            }
            other => panic!("expected ScheduleGroup, got {other:?}"),
        }
    }
}
