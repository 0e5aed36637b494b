use super::definition::{FlowSpec, StepDefinition};
use super::outcome::{ErrorKind, RunStatus, StepStatus};
use super::runner::{CancelFlag, FlowRunner};
use crate::flow::context::ContextSnapshot;
use crate::registry::{
    Capability, CapabilityDescriptor, CapabilityRegistry, Params, SafetyGate, StepOutput,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingStub {
    calls: Arc<AtomicUsize>,
    output: Map<String, Value>,
}

impl CountingStub {
    fn new(calls: Arc<AtomicUsize>) -> Self {
        Self {
            calls,
            output: Map::new(),
        }
    }

    fn with_output(calls: Arc<AtomicUsize>, key: &str, value: Value) -> Self {
        let mut output = Map::new();
        output.insert(key.to_string(), value);
        Self { calls, output }
    }
}

#[async_trait]
impl Capability for CountingStub {
    async fn invoke(
        &self,
        _context: &ContextSnapshot,
        _params: &Params,
    ) -> anyhow::Result<StepOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutput {
            values: self.output.clone(),
            report: None,
        })
    }
}

struct FailingStub;

#[async_trait]
impl Capability for FailingStub {
    async fn invoke(
        &self,
        _context: &ContextSnapshot,
        _params: &Params,
    ) -> anyhow::Result<StepOutput> {
        anyhow::bail!("adapter exploded")
    }
}

struct HangingStub;

#[async_trait]
impl Capability for HangingStub {
    async fn invoke(
        &self,
        _context: &ContextSnapshot,
        _params: &Params,
    ) -> anyhow::Result<StepOutput> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(StepOutput::new())
    }
}

/// Captures the context snapshot it was invoked with.
struct SnapshotStub {
    seen: Arc<std::sync::Mutex<Option<ContextSnapshot>>>,
}

#[async_trait]
impl Capability for SnapshotStub {
    async fn invoke(
        &self,
        context: &ContextSnapshot,
        _params: &Params,
    ) -> anyhow::Result<StepOutput> {
        *self.seen.lock().unwrap() = Some(context.clone());
        Ok(StepOutput::new())
    }
}

fn step(run: &str) -> StepDefinition {
    StepDefinition {
        run: run.to_string(),
        params: Map::new(),
        when: None,
        timeout: None,
    }
}

fn guarded_step(run: &str, when: &str) -> StepDefinition {
    StepDefinition {
        when: Some(when.to_string()),
        ..step(run)
    }
}

fn runner(registry: CapabilityRegistry, allow_mutating: bool) -> FlowRunner {
    FlowRunner::new(
        Arc::new(registry),
        SafetyGate::new(allow_mutating),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn produces_one_outcome_per_step_in_declared_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "collect",
            false,
            Arc::new(CountingStub::new(calls.clone())),
        ))
        .unwrap();
    registry
        .register(CapabilityDescriptor::new("fail", false, Arc::new(FailingStub)))
        .unwrap();

    let spec = FlowSpec::new(
        "diag",
        vec![step("collect"), step("fail"), step("collect"), step("fail")],
    );
    let result = runner(registry, false).run(&spec, Map::new()).await;

    assert_eq!(result.steps.len(), 4);
    let ids: Vec<&str> = result.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(ids, vec!["collect", "fail", "collect", "fail"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.status, RunStatus::Partial);
}

#[tokio::test]
async fn blocked_mutating_step_never_invokes_capability() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "sync",
            true,
            Arc::new(CountingStub::new(calls.clone())),
        ))
        .unwrap();

    let spec = FlowSpec::new("remediate", vec![step("sync")]);
    let result = runner(registry, false).run(&spec, Map::new()).await;

    assert_eq!(result.steps[0].status, StepStatus::Blocked);
    assert_eq!(
        result.steps[0].error.as_ref().unwrap().kind,
        ErrorKind::BlockedByPolicy
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.status, RunStatus::Failed);
}

#[tokio::test]
async fn allowed_mutating_step_invokes_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "sync",
            true,
            Arc::new(CountingStub::new(calls.clone())),
        ))
        .unwrap();

    let spec = FlowSpec::new("remediate", vec![step("sync")]);
    let result = runner(registry, true).run(&spec, Map::new()).await;

    assert_eq!(result.steps[0].status, StepStatus::Ok);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn context_from_ok_step_is_visible_downstream() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(std::sync::Mutex::new(None));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "collect",
            false,
            Arc::new(CountingStub::with_output(
                calls.clone(),
                "pods",
                json!("3 running"),
            )),
        ))
        .unwrap();
    registry
        .register(CapabilityDescriptor::new(
            "inspect",
            false,
            Arc::new(SnapshotStub { seen: seen.clone() }),
        ))
        .unwrap();

    let spec = FlowSpec::new("diag", vec![step("collect"), step("inspect")]);
    runner(registry, false).run(&spec, Map::new()).await;

    let snapshot = seen.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot.get("pods"), Some(&json!("3 running")));
    assert_eq!(snapshot.get("collect.ok"), Some(&json!(true)));
}

#[tokio::test]
async fn failed_step_output_is_never_merged() {
    let seen = Arc::new(std::sync::Mutex::new(None));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new("fail", false, Arc::new(FailingStub)))
        .unwrap();
    registry
        .register(CapabilityDescriptor::new(
            "inspect",
            false,
            Arc::new(SnapshotStub { seen: seen.clone() }),
        ))
        .unwrap();

    let spec = FlowSpec::new("diag", vec![step("fail"), step("inspect")]);
    let result = runner(registry, false).run(&spec, Map::new()).await;

    assert_eq!(result.steps[0].status, StepStatus::Failed);
    assert_eq!(
        result.steps[0].error.as_ref().unwrap().kind,
        ErrorKind::InvocationFailure
    );
    assert!(result.steps[0]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("adapter exploded"));

    let snapshot = seen.lock().unwrap().clone().unwrap();
    assert!(snapshot.get("fail.ok").is_none());
}

#[tokio::test]
async fn guard_false_skips_and_later_steps_still_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new("collect", false, Arc::new(FailingStub)))
        .unwrap();
    registry
        .register(CapabilityDescriptor::new(
            "explain",
            false,
            Arc::new(CountingStub::new(calls.clone())),
        ))
        .unwrap();
    registry
        .register(CapabilityDescriptor::new(
            "notify",
            false,
            Arc::new(CountingStub::new(calls.clone())),
        ))
        .unwrap();

    // collect fails, explain's guard can't see
    // `collect.ok`, notify still runs, overall partial.
    let spec = FlowSpec::new(
        "diag",
        vec![
            step("collect"),
            guarded_step("explain", "collect.ok == true"),
            step("notify"),
        ],
    );
    let result = runner(registry, false).run(&spec, Map::new()).await;

    assert_eq!(result.steps[0].status, StepStatus::Failed);
    assert_eq!(result.steps[1].status, StepStatus::Skipped);
    assert_eq!(result.steps[2].status, StepStatus::Ok);
    assert_eq!(result.status, RunStatus::Partial);
    // Only notify ran; explain was skipped before invocation.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_guard_records_evaluation_error_on_skip() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "notify",
            false,
            Arc::new(CountingStub::new(Arc::new(AtomicUsize::new(0)))),
        ))
        .unwrap();

    let spec = FlowSpec::new("diag", vec![guarded_step("notify", "a = b")]);
    let result = runner(registry, false).run(&spec, Map::new()).await;

    assert_eq!(result.steps[0].status, StepStatus::Skipped);
    assert_eq!(
        result.steps[0].error.as_ref().unwrap().kind,
        ErrorKind::GuardEvaluation
    );
}

#[tokio::test]
async fn hanging_capability_times_out_and_run_completes() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new("hang", false, Arc::new(HangingStub)))
        .unwrap();
    registry
        .register(CapabilityDescriptor::new(
            "notify",
            false,
            Arc::new(CountingStub::new(Arc::new(AtomicUsize::new(0)))),
        ))
        .unwrap();

    let mut hang = step("hang");
    hang.timeout = Some(Duration::from_millis(50));
    let spec = FlowSpec::new("diag", vec![hang, step("notify")]);
    let result = runner(registry, false).run(&spec, Map::new()).await;

    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].status, StepStatus::Failed);
    assert_eq!(result.steps[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(result.steps[1].status, StepStatus::Ok);
    assert_eq!(result.status, RunStatus::Partial);
}

#[tokio::test]
async fn unknown_capability_at_run_time_fails_step_without_crashing() {
    // Specs are normally validated at load time; an unvalidated spec must
    // still produce a result instead of a fault.
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "notify",
            false,
            Arc::new(CountingStub::new(Arc::new(AtomicUsize::new(0)))),
        ))
        .unwrap();

    let spec = FlowSpec::new("diag", vec![step("does_not_exist"), step("notify")]);
    let result = runner(registry, false).run(&spec, Map::new()).await;

    assert_eq!(result.steps[0].status, StepStatus::Failed);
    assert_eq!(
        result.steps[0].error.as_ref().unwrap().kind,
        ErrorKind::UnknownCapability
    );
    assert_eq!(result.steps[1].status, StepStatus::Ok);
}

#[tokio::test]
async fn cancellation_stops_scheduling_but_yields_partial_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "collect",
            false,
            Arc::new(CountingStub::new(calls.clone())),
        ))
        .unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();

    let spec = FlowSpec::new("diag", vec![step("collect"), step("collect")]);
    let registry = Arc::new(registry);
    let runner = FlowRunner::new(registry, SafetyGate::new(false), Duration::from_secs(5));
    let result = runner
        .run_with_cancellation(&spec, Map::new(), &cancel)
        .await;

    assert!(result.steps.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.flow_name, "diag");
}

#[tokio::test]
async fn identical_runs_yield_structurally_identical_results() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new(
            "collect",
            false,
            Arc::new(CountingStub::with_output(calls.clone(), "k", json!(1))),
        ))
        .unwrap();
    registry
        .register(CapabilityDescriptor::new("fail", false, Arc::new(FailingStub)))
        .unwrap();

    let spec = FlowSpec::new("diag", vec![step("collect"), step("fail")]);
    let runner = runner(registry, false);

    let first = runner.run(&spec, Map::new()).await;
    let second = runner.run(&spec, Map::new()).await;

    let shape = |r: &crate::flow::RunResult| {
        (
            r.status,
            r.steps
                .iter()
                .map(|s| (s.step.clone(), s.status, s.output.clone()))
                .collect::<Vec<_>>(),
        )
    };
    assert_eq!(shape(&first), shape(&second));
}
