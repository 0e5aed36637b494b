//! Step outcomes, run results, and the result assembler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Terminal state of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Skipped,
    Blocked,
    Failed,
}

/// Classification of per-step errors. Never silently dropped: every kind is
/// recorded on the outcome it occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownCapability,
    BlockedByPolicy,
    InvocationFailure,
    Timeout,
    GuardEvaluation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Record of one executed (or skipped/blocked) step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Capability id the step referenced.
    pub step: String,
    /// Position in the declared step list.
    pub index: usize,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Values merged into the run context (only populated on `ok`).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub output: Map<String, Value>,
    /// Human-readable fragment for the run report (only populated on `ok`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl StepOutcome {
    fn base(step: &str, index: usize, status: StepStatus) -> Self {
        Self {
            step: step.to_string(),
            index,
            status,
            error: None,
            output: Map::new(),
            report: None,
            duration: Duration::ZERO,
            started_at: Utc::now(),
        }
    }

    pub fn ok(
        step: &str,
        index: usize,
        output: Map<String, Value>,
        report: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            output,
            report,
            duration,
            ..Self::base(step, index, StepStatus::Ok)
        }
    }

    pub fn skipped(step: &str, index: usize, error: Option<StepError>) -> Self {
        Self {
            error,
            ..Self::base(step, index, StepStatus::Skipped)
        }
    }

    pub fn blocked(step: &str, index: usize, message: String) -> Self {
        Self {
            error: Some(StepError {
                kind: ErrorKind::BlockedByPolicy,
                message,
            }),
            ..Self::base(step, index, StepStatus::Blocked)
        }
    }

    pub fn failed(
        step: &str,
        index: usize,
        kind: ErrorKind,
        message: String,
        duration: Duration,
    ) -> Self {
        Self {
            error: Some(StepError { kind, message }),
            duration,
            ..Self::base(step, index, StepStatus::Failed)
        }
    }
}

/// Overall status of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Partial,
    Failed,
}

/// Immutable result of one flow run, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub flow_name: String,
    pub status: RunStatus,
    pub steps: Vec<StepOutcome>,
    pub report_text: String,
    #[serde(with = "humantime_serde")]
    pub total_duration: Duration,
}

/// Fold accumulated step outcomes into a run result.
///
/// Pure function: derives the overall status and concatenates report
/// fragments in execution order. No I/O, no side effects.
pub fn assemble_result(
    flow_name: &str,
    run_id: Uuid,
    steps: Vec<StepOutcome>,
    total_duration: Duration,
) -> RunResult {
    let any_ok = steps.iter().any(|s| s.status == StepStatus::Ok);
    let any_bad = steps
        .iter()
        .any(|s| matches!(s.status, StepStatus::Failed | StepStatus::Blocked));

    let status = match (any_bad, any_ok) {
        (false, _) => RunStatus::Ok,
        (true, true) => RunStatus::Partial,
        (true, false) => RunStatus::Failed,
    };

    let report_text = steps
        .iter()
        .filter_map(|s| s.report.as_deref())
        .collect::<Vec<_>>()
        .join("\n\n");

    RunResult {
        run_id,
        flow_name: flow_name.to_string(),
        status,
        steps,
        report_text,
        total_duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn ok_step(id: &str, index: usize, report: Option<&str>) -> StepOutcome {
        StepOutcome::ok(
            id,
            index,
            Map::new(),
            report.map(str::to_string),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn all_ok_and_skipped_is_ok() {
        let steps = vec![
            ok_step("a", 0, None),
            StepOutcome::skipped("b", 1, None),
            ok_step("c", 2, None),
        ];
        let result = assemble_result("f", Uuid::new_v4(), steps, Duration::ZERO);
        assert_eq!(result.status, RunStatus::Ok);
    }

    #[test]
    fn mixed_outcomes_are_partial() {
        let steps = vec![
            ok_step("a", 0, None),
            StepOutcome::failed(
                "b",
                1,
                ErrorKind::InvocationFailure,
                "boom".into(),
                Duration::ZERO,
            ),
        ];
        let result = assemble_result("f", Uuid::new_v4(), steps, Duration::ZERO);
        assert_eq!(result.status, RunStatus::Partial);
    }

    #[test]
    fn all_failed_or_blocked_is_failed() {
        let steps = vec![
            StepOutcome::blocked("a", 0, "mutating disallowed".into()),
            StepOutcome::failed(
                "b",
                1,
                ErrorKind::Timeout,
                "timed out".into(),
                Duration::ZERO,
            ),
            StepOutcome::skipped("c", 2, None),
        ];
        let result = assemble_result("f", Uuid::new_v4(), steps, Duration::ZERO);
        assert_eq!(result.status, RunStatus::Failed);
    }

    #[test]
    fn report_fragments_join_in_execution_order() {
        let steps = vec![
            ok_step("a", 0, Some("first")),
            ok_step("b", 1, None),
            ok_step("c", 2, Some("second")),
        ];
        let result = assemble_result("f", Uuid::new_v4(), steps, Duration::ZERO);
        assert_eq!(result.report_text, "first\n\nsecond");
    }
}
