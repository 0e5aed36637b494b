//! Flow definitions: the declarative step lists operators write as YAML.
//!
//! A flow file is named `flow-<name>.yaml` and contains an ordered `steps`
//! list. Definitions are validated against the capability registry at load
//! time, so a flow referencing an unknown capability is rejected before any
//! step ever executes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::registry::CapabilityRegistry;

const FLOW_FILE_PREFIX: &str = "flow-";

/// One entry in a flow: a capability reference plus optional parameters,
/// guard expression, and timeout override. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Capability id to invoke.
    pub run: String,
    /// Parameters handed to the capability alongside the context snapshot.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Guard expression; the step is skipped when it evaluates false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Per-step timeout override (e.g. "30s"); the runner's configured
    /// default applies when absent.
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlowFile {
    #[serde(default)]
    name: Option<String>,
    steps: Vec<StepDefinition>,
}

/// A named, ordered step list. Loaded once, reused across many runs.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSpec {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl FlowSpec {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Parse a flow document. `default_name` (typically derived from the
    /// file name) applies unless the document carries an explicit `name`.
    pub fn from_yaml_str(default_name: &str, source: &str) -> Result<Self> {
        let file: FlowFile = serde_yaml::from_str(source).map_err(|e| Error::InvalidDefinition {
            flow: default_name.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name: file.name.unwrap_or_else(|| default_name.to_string()),
            steps: file.steps,
        })
    }

    /// Fail-fast structural validation: a flow must have at least one step
    /// and every step id must resolve in the registry.
    pub fn validate(&self, registry: &CapabilityRegistry) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::EmptyFlow {
                flow: self.name.clone(),
            });
        }
        for (index, step) in self.steps.iter().enumerate() {
            if !registry.contains(&step.run) {
                return Err(Error::UnknownCapability {
                    flow: self.name.clone(),
                    index,
                    id: step.run.clone(),
                });
            }
        }
        Ok(())
    }
}

/// All loaded flow specifications, keyed by unique name.
#[derive(Debug, Default)]
pub struct FlowSet {
    flows: BTreeMap<String, Arc<FlowSpec>>,
}

impl FlowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: FlowSpec) -> Result<()> {
        if self.flows.contains_key(&spec.name) {
            return Err(Error::DuplicateFlow(spec.name));
        }
        self.flows.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<FlowSpec>> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FlowNotFound(name.to_string()))
    }

    /// Available flow names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.flows.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Discover and load every `flow-*.yaml` in `dir`, validating each
    /// against the registry. Any structural problem aborts the whole load.
    pub fn load_dir(dir: &Path, registry: &CapabilityRegistry) -> Result<Self> {
        let mut set = Self::new();
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        entries.sort();

        for path in entries {
            let Some(stem) = flow_name_from_path(&path) else {
                continue;
            };
            debug!(path = %path.display(), flow = %stem, "Loading flow file");
            let source = std::fs::read_to_string(&path)?;
            let spec = FlowSpec::from_yaml_str(&stem, &source)?;
            spec.validate(registry)?;
            set.insert(spec)?;
        }

        info!(count = set.len(), flows = ?set.names(), "Loaded flow definitions");
        Ok(set)
    }
}

/// `flow-k8s-healthcheck.yaml` -> `k8s-healthcheck`
fn flow_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name
        .strip_suffix(".yaml")
        .or_else(|| file_name.strip_suffix(".yml"))?;
    let name = stem.strip_prefix(FLOW_FILE_PREFIX)?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}
