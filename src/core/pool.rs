//! Typed resource pools with capacity accounting.
//!
//! Pools are created once from static configuration and are mutated only
//! through the reservation ledger; no other component touches the counters.

use serde::{Deserialize, Serialize};

/// Kind of resource a pool accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Compute units (cores, slots).
    Compute,
    /// Memory in arbitrary units (e.g. megabytes).
    Memory,
    /// I/O operations per scheduling window.
    Io,
    /// Network bandwidth units.
    Network,
}

/// A bounded counter of one resource kind from which reservations are drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePool {
    /// Pool identifier, unique across the ledger.
    pub id: String,
    /// Resource kind this pool accounts for.
    pub kind: ResourceKind,
    capacity: u64,
    allocated: u64,
}

impl ResourcePool {
    /// Create a pool with the given capacity and nothing allocated.
    pub fn new(id: impl Into<String>, kind: ResourceKind, capacity: u64) -> Self {
        Self {
            id: id.into(),
            kind,
            capacity,
            allocated: 0,
        }
    }

    /// Total capacity in units.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Units currently allocated to active reservations.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    /// Units still available for new reservations.
    pub fn available(&self) -> u64 {
        self.capacity - self.allocated
    }

    /// Take `amount` units out of the pool. Returns false without mutating
    /// if the pool cannot cover the amount.
    pub(crate) fn grant(&mut self, amount: u64) -> bool {
        if amount > self.available() {
            return false;
        }
        self.allocated += amount;
        true
    }

    /// Return `amount` units to the pool. Saturates at zero so an idempotent
    /// double-release cannot underflow the counter.
    pub(crate) fn restore(&mut self, amount: u64) {
        self.allocated = self.allocated.saturating_sub(amount);
    }
}

/// Read-only view of a pool for status APIs and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pool identifier.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Total capacity.
    pub capacity: u64,
    /// Currently allocated units.
    pub allocated: u64,
    /// Derived available units.
    pub available: u64,
}

impl From<&ResourcePool> for PoolSnapshot {
    fn from(pool: &ResourcePool) -> Self {
        Self {
            id: pool.id.clone(),
            kind: pool.kind,
            capacity: pool.capacity(),
            allocated: pool.allocated(),
            available: pool.available(),
        }
    }
}
