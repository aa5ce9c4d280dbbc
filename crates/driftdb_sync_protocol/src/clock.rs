//! Replica identity and Lamport stamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a replica (one store on one device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(Uuid);

impl ReplicaId {
    /// Generates a new random replica id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a replica id from a u128, for deterministic fixtures.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Returns the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReplicaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica:{}", self.0.simple())
    }
}

/// A Lamport stamp: logical clock plus the replica that produced it.
///
/// Stamps are totally ordered by clock, then replica id, which is the
/// tie-breaker every replica agrees on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Logical clock value.
    pub clock: u64,
    /// Replica that issued the stamp.
    pub replica: ReplicaId,
}

impl Stamp {
    /// Creates a stamp.
    pub const fn new(clock: u64, replica: ReplicaId) -> Self {
        Self { clock, replica }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.clock, self.replica.0.simple())
    }
}

/// A Lamport clock.
///
/// `tick` issues strictly increasing values; `observe` folds in a remote
/// value so later local stamps order after everything already seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LamportClock {
    current: u64,
}

impl LamportClock {
    /// Creates a clock at zero.
    pub const fn new() -> Self {
        Self { current: 0 }
    }

    /// Creates a clock resumed from a persisted value.
    pub const fn from_value(current: u64) -> Self {
        Self { current }
    }

    /// Advances the clock and returns the new value.
    pub fn tick(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// Folds in a value observed from another replica.
    pub fn observe(&mut self, remote: u64) {
        self.current = self.current.max(remote);
    }

    /// Returns the current value.
    pub const fn value(&self) -> u64 {
        self.current
    }
}
