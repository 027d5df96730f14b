//! At-most-one in-flight order per (asset, direction).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Direction;

type OrderKey = (String, Direction);

/// Set of in-flight order keys. Cloning shares the set.
#[derive(Debug, Clone, Default)]
pub struct PendingOrderGuard {
    keys: Arc<Mutex<HashSet<OrderKey>>>,
}

impl PendingOrderGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<OrderKey>> {
        // The set is never left half-updated, so a poisoned lock is still usable
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert the key if absent. The returned ticket removes it on drop.
    pub fn try_acquire(&self, asset_ref: &str, direction: Direction) -> Option<PendingTicket> {
        let key = (asset_ref.to_string(), direction);
        if !self.keys().insert(key.clone()) {
            return None;
        }
        Some(PendingTicket {
            guard: self.clone(),
            key,
        })
    }

    pub fn is_pending(&self, asset_ref: &str, direction: Direction) -> bool {
        self.keys().contains(&(asset_ref.to_string(), direction))
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Membership in the guard for the lifetime of one order call.
#[derive(Debug)]
pub struct PendingTicket {
    guard: PendingOrderGuard,
    key: OrderKey,
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        self.guard.keys().remove(&self.key);
    }
}
