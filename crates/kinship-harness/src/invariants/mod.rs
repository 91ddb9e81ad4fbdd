//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during system execution.
//! Unlike example-based tests that check specific scenarios, invariants
//! verify behavioral properties across all possible execution paths.
//!
//! # Architecture
//!
//! Observable state of each client (connection state history, window
//! contents, the server's record of its subscriptions) is captured into a
//! [`SystemSnapshot`], then every registered [`Invariant`] runs against it.
//! Transition invariants compare each window with the one from the previous
//! capture.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SystemSnapshot::single(ClientSnapshot::capture(&client, &server));
//! registry.assert_all(&snapshot, "after reconnect");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    ResolvedEntriesRetained, StatusMonotonicity, SubscriptionsRestored, UnconfirmedAreOwnSends,
    UniqueResolvedIds, ValidConnectionTransitions,
};
pub use snapshot::{
    ClientSnapshot, EntrySnapshot, SystemSnapshot, Transcript, TranscriptLine, WindowSnapshot,
};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against system state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    ///
    /// Returns `Ok(())` if the invariant holds, or a [`Violation`]
    /// describing what went wrong.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with every standard invariant.
    ///
    /// Includes:
    /// - [`UniqueResolvedIds`]: no duplicate server ids in a window
    /// - [`UnconfirmedAreOwnSends`]: only own in-flight or failed sends lack
    ///   an id
    /// - [`StatusMonotonicity`]: statuses never move backwards
    /// - [`ResolvedEntriesRetained`]: confirmed entries never vanish or
    ///   reorder
    /// - [`ValidConnectionTransitions`]: state changes follow legal edges
    /// - [`SubscriptionsRestored`]: a live connection carries every
    ///   registered subscription
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(UniqueResolvedIds);
        registry.add(UnconfirmedAreOwnSends);
        registry.add(StatusMonotonicity);
        registry.add(ResolvedEntriesRetained);
        registry.add(ValidConnectionTransitions);
        registry.add(SubscriptionsRestored);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    #[allow(clippy::panic, reason = "test harness assertion")]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&SystemSnapshot::empty()).is_ok());
    }

    #[test]
    fn violation_names_the_invariant() {
        let violation = Violation { invariant: "example", message: "broken".into() };
        assert_eq!(violation.to_string(), "example: broken");
    }
}
