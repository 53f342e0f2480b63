//! In-process exclusion of concurrent passes on one parent item.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Set of parent items that currently have a pass running.
///
/// Exclusion only covers holders of the same table: each `SyncOrchestrator`
/// creates its own, so orchestrators that share a store in one process must
/// be given a common table with `SyncOrchestrator::with_leases`. Separate
/// processes are not excluded.
#[derive(Debug, Clone, Default)]
pub struct LeaseTable {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for a parent item, or `None` if a pass already holds it.
    pub fn try_acquire(&self, parent_id: i64) -> Option<Lease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(parent_id).then(|| Lease {
            held: Arc::clone(&self.held),
            parent_id,
        })
    }

    pub fn is_held(&self, parent_id: i64) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&parent_id)
    }
}

/// Released on drop, including when the pass future is dropped mid-way.
#[derive(Debug)]
pub struct Lease {
    held: Arc<Mutex<HashSet<i64>>>,
    parent_id: i64,
}

impl Lease {
    pub fn parent_id(&self) -> i64 {
        self.parent_id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.parent_id);
    }
}
