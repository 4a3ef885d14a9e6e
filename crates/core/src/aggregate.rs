//! Aggregate root trait and optimistic concurrency helpers.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Deliberately small: an aggregate only has to expose its identity and the
/// version a persistence layer uses for conflict detection. How it models
/// state transitions is up to the aggregate.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Incremented by one per committed state change.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for idempotent commands, migrations, etc.).
    Any,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }

    /// Check against the current version of an aggregate.
    pub fn check_aggregate<A: AggregateRoot>(self, aggregate: &A) -> DomainResult<()> {
        self.check(aggregate.version())
    }
}
