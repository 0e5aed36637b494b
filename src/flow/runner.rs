//! The flow runner: the orchestration state machine.
//!
//! Per step, in declared order: evaluate the guard, resolve the capability,
//! check the safety gate, invoke with a timeout, merge output on success.
//! Every declared step is processed regardless of earlier failures — a
//! diagnostic flow's value is in collecting as much signal as possible, so
//! there is deliberately no abort-on-first-failure.

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::ContextStore;
use super::definition::{FlowSpec, StepDefinition};
use super::guard;
use super::outcome::{assemble_result, ErrorKind, RunResult, StepError, StepOutcome, StepStatus};
use crate::registry::{CapabilityRegistry, SafetyGate};

/// Cooperative cancellation handle for an in-flight run.
///
/// Cancelling stops the runner from scheduling further steps; outcomes
/// already accumulated are still folded into a valid (partial) result.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes flow specifications step by step.
///
/// The registry and gate are read-only for the lifetime of the runner, so a
/// single runner can serve concurrent runs; each run owns its own context
/// store and result.
pub struct FlowRunner {
    registry: Arc<CapabilityRegistry>,
    gate: SafetyGate,
    step_timeout: Duration,
}

impl FlowRunner {
    pub fn new(registry: Arc<CapabilityRegistry>, gate: SafetyGate, step_timeout: Duration) -> Self {
        Self {
            registry,
            gate,
            step_timeout,
        }
    }

    /// Run a flow to completion with the given initial input.
    pub async fn run(&self, spec: &FlowSpec, initial: Map<String, Value>) -> RunResult {
        self.run_with_cancellation(spec, initial, &CancelFlag::new())
            .await
    }

    /// Run a flow, stopping before the next step once `cancel` is set.
    pub async fn run_with_cancellation(
        &self,
        spec: &FlowSpec,
        initial: Map<String, Value>,
        cancel: &CancelFlag,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let run_start = Instant::now();
        let mut context = ContextStore::from_initial(initial);
        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(spec.steps.len());

        info!(flow = %spec.name, %run_id, steps = spec.steps.len(), "Starting flow run");

        for (index, step) in spec.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(flow = %spec.name, %run_id, index, "Run cancelled, not scheduling further steps");
                break;
            }

            let outcome = self.execute_step(spec, index, step, &context).await;

            if outcome.status == StepStatus::Ok {
                context.merge(outcome.output.clone());
                // Record completion so guards like `collect.ok == true` work.
                context.set(format!("{}.ok", step.run), Value::Bool(true));
            }

            info!(
                flow = %spec.name,
                %run_id,
                step = %step.run,
                index,
                status = ?outcome.status,
                duration_ms = outcome.duration.as_millis() as u64,
                "Step finished"
            );
            outcomes.push(outcome);
        }

        let result = assemble_result(&spec.name, run_id, outcomes, run_start.elapsed());
        info!(
            flow = %spec.name,
            %run_id,
            status = ?result.status,
            total_duration_ms = result.total_duration.as_millis() as u64,
            "Flow run finished"
        );
        result
    }

    async fn execute_step(
        &self,
        spec: &FlowSpec,
        index: usize,
        step: &StepDefinition,
        context: &ContextStore,
    ) -> StepOutcome {
        // Guards are advisory: evaluation problems degrade to guard-false,
        // recorded on the outcome rather than failing the step.
        if let Some(expression) = &step.when {
            match guard::evaluate(expression, &context.snapshot()) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(flow = %spec.name, step = %step.run, %expression, "Guard false, skipping");
                    return StepOutcome::skipped(&step.run, index, None);
                }
                Err(e) => {
                    warn!(flow = %spec.name, step = %step.run, %expression, error = %e, "Guard evaluation failed, skipping");
                    return StepOutcome::skipped(
                        &step.run,
                        index,
                        Some(StepError {
                            kind: ErrorKind::GuardEvaluation,
                            message: e.to_string(),
                        }),
                    );
                }
            }
        }

        // Unknown ids are caught at load time; runs of unvalidated flows
        // still have to produce an outcome per step.
        let descriptor = match self.registry.resolve(&step.run) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(flow = %spec.name, step = %step.run, "Capability not found at run time");
                return StepOutcome::failed(
                    &step.run,
                    index,
                    ErrorKind::UnknownCapability,
                    e.to_string(),
                    Duration::ZERO,
                );
            }
        };

        if !self.gate.check(&descriptor) {
            warn!(flow = %spec.name, step = %step.run, "Mutating capability blocked by policy");
            return StepOutcome::blocked(
                &step.run,
                index,
                format!(
                    "mutating capability '{}' blocked: mutating operations are disallowed",
                    step.run
                ),
            );
        }

        let timeout = step.timeout.unwrap_or(self.step_timeout);
        let snapshot = context.snapshot();
        let start = Instant::now();
        let invocation = descriptor.invoke(&snapshot, &step.params);

        match tokio::time::timeout(timeout, invocation).await {
            Ok(Ok(output)) => StepOutcome::ok(
                &step.run,
                index,
                output.values,
                output.report,
                start.elapsed(),
            ),
            Ok(Err(e)) => StepOutcome::failed(
                &step.run,
                index,
                ErrorKind::InvocationFailure,
                format!("{e:#}"),
                start.elapsed(),
            ),
            Err(_) => StepOutcome::failed(
                &step.run,
                index,
                ErrorKind::Timeout,
                format!("capability '{}' timed out after {timeout:?}", step.run),
                start.elapsed(),
            ),
        }
    }
}
