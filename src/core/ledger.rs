//! Reservation ledger: the single serialized mutation path for pool counters.
//!
//! All capacity accounting goes through [`ReservationLedger`]; no other
//! component mutates a pool. The check-then-update critical section is held
//! under one `parking_lot::Mutex` because a grant may span several pools
//! atomically.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::events::{EventBus, SchedulerEvent};
use crate::core::pool::{PoolSnapshot, ResourceKind, ResourcePool};
use crate::core::task::{Priority, ResourceRequirement};
use crate::util::ids::{ReservationId, TaskId};

/// A granted, time-bounded claim on a quantity of a pool's capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier.
    pub id: ReservationId,
    /// Owning pool.
    pub pool_id: String,
    /// Reserved amount.
    pub amount: u64,
    /// Priority used for reclamation ordering.
    pub priority: Priority,
    /// Absolute expiry (ms since epoch); the sweep force-releases past this.
    pub expires_at_ms: u128,
    /// Task that owns the reservation.
    pub task_id: TaskId,
    /// Free-form purpose recorded for observability.
    pub purpose: String,
}

/// Result of an all-or-nothing grant.
#[derive(Debug, Default)]
pub struct Grant {
    /// Reservations created for the requester, one per requirement.
    pub reservations: Vec<ReservationId>,
    /// Lower-priority reservations reclaimed to make room. Their owning
    /// tasks must be re-queued by the scheduler.
    pub reclaimed: Vec<Reservation>,
}

struct LedgerState {
    pools: HashMap<String, ResourcePool>,
    reservations: HashMap<ReservationId, Reservation>,
}

/// The set of active reservations across all pools.
pub struct ReservationLedger {
    state: Mutex<LedgerState>,
    events: EventBus,
}

impl ReservationLedger {
    /// Build a ledger over the given pools.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on duplicate pool ids or zero capacity.
    pub fn new(
        pools: impl IntoIterator<Item = (String, ResourceKind, u64)>,
        events: EventBus,
    ) -> Result<Self, SchedulerError> {
        let mut map = HashMap::new();
        for (id, kind, capacity) in pools {
            if capacity == 0 {
                return Err(SchedulerError::InvalidConfig(format!(
                    "pool `{id}` has zero capacity"
                )));
            }
            if map
                .insert(id.clone(), ResourcePool::new(id.clone(), kind, capacity))
                .is_some()
            {
                return Err(SchedulerError::InvalidConfig(format!(
                    "duplicate pool id `{id}`"
                )));
            }
        }
        Ok(Self {
            state: Mutex::new(LedgerState {
                pools: map,
                reservations: HashMap::new(),
            }),
            events,
        })
    }

    /// Whether the ledger manages a pool with this id.
    pub fn has_pool(&self, pool_id: &str) -> bool {
        self.state.lock().pools.contains_key(pool_id)
    }

    /// Snapshot a single pool.
    pub fn pool(&self, pool_id: &str) -> Option<PoolSnapshot> {
        self.state.lock().pools.get(pool_id).map(PoolSnapshot::from)
    }

    /// Snapshot every pool.
    pub fn pools(&self) -> Vec<PoolSnapshot> {
        let state = self.state.lock();
        let mut pools: Vec<PoolSnapshot> = state.pools.values().map(PoolSnapshot::from).collect();
        pools.sort_by(|a, b| a.id.cmp(&b.id));
        pools
    }

    /// Snapshot every active reservation.
    pub fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().reservations.values().cloned().collect()
    }

    /// Reserve `amount` units on one pool, reclaiming strictly-lower-priority
    /// reservations if the pool is short.
    ///
    /// # Errors
    ///
    /// `UnknownPool` for an unmanaged pool id; `InsufficientCapacity` when
    /// reclamation cannot free enough room.
    pub fn reserve(
        &self,
        pool_id: &str,
        amount: u64,
        priority: Priority,
        ttl_ms: u64,
        task_id: TaskId,
        purpose: impl Into<String>,
        now_ms: u128,
    ) -> Result<ReservationId, SchedulerError> {
        let req = ResourceRequirement::new(pool_id, amount);
        let grant = self.reserve_all(
            std::slice::from_ref(&req),
            priority,
            ttl_ms,
            task_id,
            purpose,
            now_ms,
        )?;
        // Exactly one requirement, so exactly one reservation.
        Ok(grant.reservations[0])
    }

    /// Grant all requirements atomically, or none of them.
    ///
    /// Reclamation scans each short pool's reservations by priority
    /// ascending, then expiry ascending, force-releasing only reservations
    /// whose priority is strictly lower than the requester's. Equal-or-higher
    /// priority holders are never displaced.
    ///
    /// # Errors
    ///
    /// `UnknownPool` for an unmanaged pool id; `InsufficientCapacity` when
    /// any single requirement cannot be satisfied even after reclamation (in
    /// which case no requirement is granted and nothing is reclaimed).
    pub fn reserve_all(
        &self,
        requirements: &[ResourceRequirement],
        priority: Priority,
        ttl_ms: u64,
        task_id: TaskId,
        purpose: impl Into<String>,
        now_ms: u128,
    ) -> Result<Grant, SchedulerError> {
        let purpose = purpose.into();
        let mut state = self.state.lock();

        for (i, req) in requirements.iter().enumerate() {
            if !state.pools.contains_key(&req.pool_id) {
                return Err(SchedulerError::UnknownPool(req.pool_id.clone()));
            }
            if requirements[..i].iter().any(|r| r.pool_id == req.pool_id) {
                return Err(SchedulerError::InvalidConfig(format!(
                    "duplicate requirement for pool `{}`",
                    req.pool_id
                )));
            }
        }

        // Plan first: decide per pool which victims reclamation would take,
        // without mutating anything, so a shortfall on the last requirement
        // leaves the ledger untouched.
        let mut victims: Vec<ReservationId> = Vec::new();
        for req in requirements {
            let pool = &state.pools[&req.pool_id];
            let already_planned: u64 = planned_amount(&state, &victims, &req.pool_id);
            let mut freeable = pool.available() + already_planned;
            if freeable >= req.amount {
                continue;
            }
            let mut candidates: Vec<&Reservation> = state
                .reservations
                .values()
                .filter(|r| {
                    r.pool_id == req.pool_id
                        && r.priority < priority
                        && !victims.contains(&r.id)
                })
                .collect();
            candidates.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.expires_at_ms.cmp(&b.expires_at_ms))
            });
            for candidate in candidates {
                if freeable >= req.amount {
                    break;
                }
                freeable += candidate.amount;
                victims.push(candidate.id);
            }
            if freeable < req.amount {
                return Err(SchedulerError::InsufficientCapacity {
                    pool_id: req.pool_id.clone(),
                    requested: req.amount,
                    available: freeable,
                });
            }
        }

        // Commit: reclaim the planned victims, then grant every requirement.
        let mut reclaimed = Vec::with_capacity(victims.len());
        for id in victims {
            if let Some(victim) = state.reservations.remove(&id) {
                if let Some(pool) = state.pools.get_mut(&victim.pool_id) {
                    pool.restore(victim.amount);
                }
                self.events.emit(
                    SchedulerEvent::ReservationReclaimed {
                        reservation_id: victim.id,
                        pool_id: victim.pool_id.clone(),
                        amount: victim.amount,
                        task_id: victim.task_id,
                    },
                    now_ms,
                );
                tracing::info!(
                    reservation = %victim.id,
                    pool = %victim.pool_id,
                    "reclaimed reservation for task {task_id}"
                );
                reclaimed.push(victim);
            }
        }

        let mut granted = Vec::with_capacity(requirements.len());
        for req in requirements {
            let pool = state
                .pools
                .get_mut(&req.pool_id)
                .ok_or_else(|| SchedulerError::UnknownPool(req.pool_id.clone()))?;
            if !pool.grant(req.amount) {
                // Should not happen after planning; roll back and bail.
                for res_id in &granted {
                    if let Some(res) = state.reservations.remove(res_id) {
                        if let Some(p) = state.pools.get_mut(&res.pool_id) {
                            p.restore(res.amount);
                        }
                    }
                }
                return Err(SchedulerError::InsufficientCapacity {
                    pool_id: req.pool_id.clone(),
                    requested: req.amount,
                    available: state.pools[&req.pool_id].available(),
                });
            }
            let reservation = Reservation {
                id: ReservationId::new(),
                pool_id: req.pool_id.clone(),
                amount: req.amount,
                priority,
                expires_at_ms: now_ms + u128::from(ttl_ms),
                task_id,
                purpose: purpose.clone(),
            };
            self.events.emit(
                SchedulerEvent::ReservationGranted {
                    reservation_id: reservation.id,
                    pool_id: reservation.pool_id.clone(),
                    amount: reservation.amount,
                    task_id,
                },
                now_ms,
            );
            granted.push(reservation.id);
            state.reservations.insert(reservation.id, reservation);
        }

        Ok(Grant {
            reservations: granted,
            reclaimed,
        })
    }

    /// Release a reservation. Idempotent: releasing an unknown id is a no-op
    /// so cleanup paths can run unconditionally.
    pub fn release(&self, reservation_id: ReservationId, now_ms: u128) {
        let mut state = self.state.lock();
        if let Some(reservation) = state.reservations.remove(&reservation_id) {
            if let Some(pool) = state.pools.get_mut(&reservation.pool_id) {
                pool.restore(reservation.amount);
            }
            self.events.emit(
                SchedulerEvent::ReservationReleased {
                    reservation_id,
                    pool_id: reservation.pool_id,
                    amount: reservation.amount,
                },
                now_ms,
            );
        }
    }

    /// Force-release every reservation past its expiry and return them so
    /// the scheduler can fail or retry the owning tasks. This is a safety
    /// net for reservations that outlive their owner, not the primary
    /// release path.
    pub fn sweep_expired(&self, now_ms: u128) -> Vec<Reservation> {
        let mut state = self.state.lock();
        let expired_ids: Vec<ReservationId> = state
            .reservations
            .values()
            .filter(|r| r.expires_at_ms <= now_ms)
            .map(|r| r.id)
            .collect();
        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(reservation) = state.reservations.remove(&id) {
                if let Some(pool) = state.pools.get_mut(&reservation.pool_id) {
                    pool.restore(reservation.amount);
                }
                self.events.emit(
                    SchedulerEvent::ReservationExpired {
                        reservation_id: reservation.id,
                        pool_id: reservation.pool_id.clone(),
                        amount: reservation.amount,
                        task_id: reservation.task_id,
                    },
                    now_ms,
                );
                tracing::warn!(reservation = %reservation.id, pool = %reservation.pool_id, "reservation expired");
                expired.push(reservation);
            }
        }
        expired
    }
}

/// Amount already earmarked for reclamation on `pool_id` by the current plan.
fn planned_amount(state: &LedgerState, victims: &[ReservationId], pool_id: &str) -> u64 {
    victims
        .iter()
        .filter_map(|id| state.reservations.get(id))
        .filter(|r| r.pool_id == pool_id)
        .map(|r| r.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(capacity: u64) -> ReservationLedger {
        ReservationLedger::new(
            [("compute".to_string(), ResourceKind::Compute, capacity)],
            EventBus::new(),
        )
        .unwrap()
    }

    fn invariant_holds(ledger: &ReservationLedger) -> bool {
        ledger.pools().iter().all(|pool| {
            let sum: u64 = ledger
                .reservations()
                .iter()
                .filter(|r| r.pool_id == pool.id)
                .map(|r| r.amount)
                .sum();
            pool.allocated == sum && pool.allocated <= pool.capacity
        })
    }

    #[test]
    fn reserve_and_release_roundtrip() {
        let ledger = ledger(8);
        let id = ledger
            .reserve("compute", 5, Priority::Medium, 10_000, TaskId::new(), "t", 0)
            .unwrap();
        assert_eq!(ledger.pool("compute").unwrap().allocated, 5);
        assert!(invariant_holds(&ledger));
        ledger.release(id, 10);
        assert_eq!(ledger.pool("compute").unwrap().allocated, 0);
        // Idempotent: second release is a no-op.
        ledger.release(id, 20);
        assert_eq!(ledger.pool("compute").unwrap().allocated, 0);
        assert!(invariant_holds(&ledger));
    }

    #[test]
    fn unknown_pool_is_an_error() {
        let ledger = ledger(8);
        let err = ledger
            .reserve("gpu", 1, Priority::Low, 1_000, TaskId::new(), "t", 0)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownPool(_)));
    }

    #[test]
    fn reclamation_displaces_strictly_lower_priority() {
        let ledger = ledger(4);
        let low_task = TaskId::new();
        ledger
            .reserve("compute", 4, Priority::Low, 60_000, low_task, "bg", 0)
            .unwrap();

        let grant = ledger
            .reserve_all(
                &[ResourceRequirement::new("compute", 2)],
                Priority::Critical,
                60_000,
                TaskId::new(),
                "urgent",
                0,
            )
            .unwrap();
        assert_eq!(grant.reclaimed.len(), 1);
        assert_eq!(grant.reclaimed[0].task_id, low_task);
        assert_eq!(ledger.pool("compute").unwrap().allocated, 2);
        assert!(invariant_holds(&ledger));
    }

    #[test]
    fn same_priority_is_never_reclaimed() {
        let ledger = ledger(4);
        ledger
            .reserve("compute", 4, Priority::Medium, 60_000, TaskId::new(), "a", 0)
            .unwrap();
        let err = ledger
            .reserve("compute", 1, Priority::Medium, 60_000, TaskId::new(), "b", 0)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InsufficientCapacity { .. }));
        assert_eq!(ledger.pool("compute").unwrap().allocated, 4);
    }

    #[test]
    fn reclamation_prefers_oldest_expiry_among_equal_priority() {
        let ledger = ledger(4);
        let old = TaskId::new();
        let newer = TaskId::new();
        ledger
            .reserve("compute", 2, Priority::Low, 1_000, old, "old", 0)
            .unwrap();
        ledger
            .reserve("compute", 2, Priority::Low, 9_000, newer, "new", 0)
            .unwrap();

        let grant = ledger
            .reserve_all(
                &[ResourceRequirement::new("compute", 2)],
                Priority::High,
                60_000,
                TaskId::new(),
                "hi",
                0,
            )
            .unwrap();
        assert_eq!(grant.reclaimed.len(), 1);
        assert_eq!(grant.reclaimed[0].task_id, old);
    }

    #[test]
    fn failed_multi_pool_grant_leaves_ledger_untouched() {
        let ledger = ReservationLedger::new(
            [
                ("compute".to_string(), ResourceKind::Compute, 4),
                ("memory".to_string(), ResourceKind::Memory, 2),
            ],
            EventBus::new(),
        )
        .unwrap();
        let holder = TaskId::new();
        ledger
            .reserve("memory", 2, Priority::High, 60_000, holder, "held", 0)
            .unwrap();

        // compute would fit, memory cannot (holder has equal priority).
        let err = ledger
            .reserve_all(
                &[
                    ResourceRequirement::new("compute", 4),
                    ResourceRequirement::new("memory", 1),
                ],
                Priority::High,
                60_000,
                TaskId::new(),
                "both",
                0,
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InsufficientCapacity { .. }));
        assert_eq!(ledger.pool("compute").unwrap().allocated, 0);
        assert_eq!(ledger.pool("memory").unwrap().allocated, 2);
        assert!(invariant_holds(&ledger));
    }

    #[test]
    fn sweep_releases_expired_only() {
        let ledger = ledger(8);
        let short = TaskId::new();
        ledger
            .reserve("compute", 3, Priority::Medium, 1_000, short, "short", 0)
            .unwrap();
        ledger
            .reserve("compute", 2, Priority::Medium, 10_000, TaskId::new(), "long", 0)
            .unwrap();

        let swept = ledger.sweep_expired(5_000);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].task_id, short);
        assert_eq!(ledger.pool("compute").unwrap().allocated, 2);
        assert!(invariant_holds(&ledger));
    }
}
