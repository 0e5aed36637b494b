//! # k8spilot
//!
//! Operational automation service that runs declaratively-defined flows of
//! diagnostic and remediation steps against a Kubernetes cluster and its
//! surrounding infrastructure (Argo CD, Loki, Cloudflare DNS, GitHub issues,
//! an LLM gateway), producing a textual report per run.
//!
//! ## Modules
//!
//! - `flow` - Flow execution core: definitions, context, guards, runner,
//!   result assembly
//! - `registry` - Capability registry and the mutating-operations safety gate
//! - `capabilities` - Builtin tool adapters registered as capabilities
//! - `subprocess` - Subprocess abstraction used by the kubectl adapter
//! - `api` - HTTP front-end for triggering flows
//! - `config` - Process configuration read from the environment
//! - `error` - Load-time error taxonomy

pub mod api;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod flow;
pub mod registry;
pub mod subprocess;

pub use config::Settings;
pub use error::{Error, Result};
pub use flow::{CancelFlag, FlowRunner, FlowSet, FlowSpec, RunResult, RunStatus};
pub use registry::{Capability, CapabilityDescriptor, CapabilityRegistry, SafetyGate};
