//! Safety gate for state-mutating capabilities.

use super::CapabilityDescriptor;

/// Process-wide policy consulted before any mutating capability executes.
///
/// The flag is set once from configuration at startup and is read-only for
/// the lifetime of every run, which is why the gate can be shared freely
/// across concurrent runs. A denial is surfaced by the runner as a `blocked`
/// outcome, never as a silent skip.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGate {
    allow_mutating: bool,
}

impl SafetyGate {
    pub fn new(allow_mutating: bool) -> Self {
        Self { allow_mutating }
    }

    /// Pure predicate: may this capability execute under the current policy?
    pub fn check(&self, descriptor: &CapabilityDescriptor) -> bool {
        !descriptor.is_mutating() || self.allow_mutating
    }

    pub fn allows_mutating(&self) -> bool {
        self.allow_mutating
    }
}
