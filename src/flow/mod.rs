//! Flow execution core.
//!
//! Definitions, per-run context, guard evaluation, the sequential runner,
//! and result assembly.

pub mod context;
pub mod definition;
pub mod guard;
pub mod outcome;
pub mod runner;
#[cfg(test)]
mod runner_tests;

pub use context::{ContextSnapshot, ContextStore};
pub use definition::{FlowSet, FlowSpec, StepDefinition};
pub use outcome::{ErrorKind, RunResult, RunStatus, StepError, StepOutcome, StepStatus};
pub use runner::{CancelFlag, FlowRunner};
