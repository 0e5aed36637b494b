//! Load-time validation of flow definition files.

use async_trait::async_trait;
use std::sync::Arc;

use k8spilot::error::Error;
use k8spilot::flow::{ContextSnapshot, FlowSet};
use k8spilot::registry::{
    Capability, CapabilityDescriptor, CapabilityRegistry, Params, StepOutput,
};

struct Noop;

#[async_trait]
impl Capability for Noop {
    async fn invoke(
        &self,
        _context: &ContextSnapshot,
        _params: &Params,
    ) -> anyhow::Result<StepOutput> {
        Ok(StepOutput::new())
    }
}

fn registry_with(ids: &[&str]) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for id in ids {
        registry
            .register(CapabilityDescriptor::new(*id, false, Arc::new(Noop)))
            .unwrap();
    }
    registry
}

fn write_flow(dir: &std::path::Path, file_name: &str, contents: &str) {
    std::fs::write(dir.join(file_name), contents).unwrap();
}

#[test]
fn discovers_and_loads_flow_files() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "flow-healthcheck.yaml",
        "steps:\n  - run: collect\n  - run: notify\n",
    );
    write_flow(dir.path(), "flow-remediate.yaml", "steps:\n  - run: sync\n");
    // Non-flow files in the config dir are ignored.
    write_flow(dir.path(), "behavior.yaml", "agents: []\n");

    let registry = registry_with(&["collect", "notify", "sync"]);
    let flows = FlowSet::load_dir(dir.path(), &registry).unwrap();

    assert_eq!(flows.names(), vec!["healthcheck", "remediate"]);
    assert_eq!(flows.get("healthcheck").unwrap().steps.len(), 2);
}

#[test]
fn empty_step_list_is_rejected_at_load_time() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(dir.path(), "flow-empty.yaml", "steps: []\n");

    let registry = registry_with(&["collect"]);
    let err = FlowSet::load_dir(dir.path(), &registry).unwrap_err();
    assert!(matches!(err, Error::EmptyFlow { flow } if flow == "empty"));
}

#[test]
fn unknown_capability_is_rejected_naming_the_offender() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "flow-diag.yaml",
        "steps:\n  - run: collect\n  - run: does_not_exist\n",
    );

    let registry = registry_with(&["collect"]);
    match FlowSet::load_dir(dir.path(), &registry) {
        Err(Error::UnknownCapability { flow, index, id }) => {
            assert_eq!(flow, "diag");
            assert_eq!(index, 1);
            assert_eq!(id, "does_not_exist");
        }
        other => panic!("expected UnknownCapability, got {other:?}"),
    }
}

#[test]
fn explicit_name_field_overrides_file_stem() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "flow-old-name.yaml",
        "name: new-name\nsteps:\n  - run: collect\n",
    );

    let registry = registry_with(&["collect"]);
    let flows = FlowSet::load_dir(dir.path(), &registry).unwrap();
    assert!(flows.get("new-name").is_ok());
    assert!(matches!(
        flows.get("old-name").unwrap_err(),
        Error::FlowNotFound(_)
    ));
}

#[test]
fn duplicate_flow_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    // Two files resolving to the same flow name via an explicit override.
    write_flow(dir.path(), "flow-a.yaml", "name: diag\nsteps:\n  - run: collect\n");
    write_flow(dir.path(), "flow-b.yaml", "name: diag\nsteps:\n  - run: collect\n");

    let registry = registry_with(&["collect"]);
    let err = FlowSet::load_dir(dir.path(), &registry).unwrap_err();
    assert!(matches!(err, Error::DuplicateFlow(name) if name == "diag"));
}

#[test]
fn unknown_top_level_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "flow-diag.yaml",
        "steps:\n  - run: collect\nunexpected: true\n",
    );

    let registry = registry_with(&["collect"]);
    assert!(matches!(
        FlowSet::load_dir(dir.path(), &registry),
        Err(Error::InvalidDefinition { .. })
    ));
}

#[test]
fn step_level_unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "flow-diag.yaml",
        "steps:\n  - run: collect\n    retries: 3\n",
    );

    let registry = registry_with(&["collect"]);
    assert!(FlowSet::load_dir(dir.path(), &registry).is_err());
}

#[test]
fn shipped_flow_definitions_load_against_builtin_registry() {
    let settings = k8spilot::Settings::default();
    let registry = k8spilot::capabilities::builtin_registry(&settings).unwrap();
    let flows = FlowSet::load_dir(std::path::Path::new("config"), &registry).unwrap();
    assert_eq!(
        flows.names(),
        vec!["app-redeploy", "infra-health", "k8s-healthcheck"]
    );
}
