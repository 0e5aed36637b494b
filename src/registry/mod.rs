//! Capability registry: stable string ids mapped to invocable units of work.
//!
//! The registry is populated once at process startup from the builtin
//! capability table and is read-only afterwards. That immutability is what
//! lets concurrently executing runs share it by `Arc` without locking.

mod gate;

pub use gate::SafetyGate;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::flow::context::ContextSnapshot;

/// Per-step parameters from the flow definition.
pub type Params = Map<String, Value>;

/// Output of a successful capability invocation.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// Values merged into the run context, visible to subsequent steps.
    pub values: Map<String, Value>,
    /// Optional human-readable fragment for the run report.
    pub report: Option<String>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with_report(mut self, report: impl Into<String>) -> Self {
        self.report = Some(report.into());
        self
    }
}

/// An invocable unit of work. Implementations wrap tool adapters (kubectl,
/// HTTP clients, LLM gateway) and are treated opaquely by the flow runner:
/// input is an immutable context snapshot plus the step's parameters, output
/// is a [`StepOutput`]. Errors are converted into failed step outcomes by
/// the runner, never propagated out of a run.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params)
        -> anyhow::Result<StepOutput>;
}

/// A registered capability: stable id, mutating classification, handler.
pub struct CapabilityDescriptor {
    id: String,
    mutating: bool,
    handler: Arc<dyn Capability>,
}

impl CapabilityDescriptor {
    pub fn new(id: impl Into<String>, mutating: bool, handler: Arc<dyn Capability>) -> Self {
        Self {
            id: id.into(),
            mutating,
            handler,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether invoking this capability can change state in an external
    /// system. Consulted by the [`SafetyGate`] before every invocation.
    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    pub async fn invoke(
        &self,
        context: &ContextSnapshot,
        params: &Params,
    ) -> anyhow::Result<StepOutput> {
        self.handler.invoke(context, params).await
    }
}

/// String-keyed table of capability descriptors, built once at startup.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, Arc<CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Ids are unique per process.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Result<()> {
        let id = descriptor.id().to_string();
        if self.entries.contains_key(&id) {
            return Err(Error::DuplicateCapability(id));
        }
        self.entries.insert(id, Arc::new(descriptor));
        Ok(())
    }

    /// Look up a descriptor by id.
    pub fn resolve(&self, id: &str) -> Result<Arc<CapabilityDescriptor>> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| Error::CapabilityNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// All registered ids with their mutating classification, sorted by id.
    pub fn list(&self) -> Vec<(String, bool)> {
        self.entries
            .values()
            .map(|d| (d.id().to_string(), d.is_mutating()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
