//! In-process lease table.

use super::{Lease, LeaseManager, LeaseResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// [`LeaseManager`] over a concurrent map. Leases vanish with the process,
/// so this is for local runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryLeaseManager {
    table_created: AtomicBool,
    leases: DashMap<String, Lease>,
    get_calls: AtomicUsize,
}

impl InMemoryLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_lease` calls served.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of stored leases.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[async_trait]
impl LeaseManager for InMemoryLeaseManager {
    async fn create_lease_table_if_not_exists(
        &self,
        _read_capacity: i64,
        _write_capacity: i64,
    ) -> LeaseResult<bool> {
        Ok(!self.table_created.swap(true, Ordering::SeqCst))
    }

    async fn get_lease(&self, lease_key: &str) -> LeaseResult<Option<Lease>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.leases.get(lease_key).map(|lease| lease.value().clone()))
    }

    async fn create_lease_if_not_exists(&self, lease: &Lease) -> LeaseResult<bool> {
        match self.leases.entry(lease.lease_key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
                Ok(true)
            }
        }
    }

    async fn update_lease(&self, lease: &Lease) -> LeaseResult<bool> {
        match self.leases.get_mut(&lease.lease_key) {
            Some(mut stored) => {
                stored.checkpoint = lease.checkpoint.clone();
                stored.lease_owner = lease.lease_owner.clone();
                stored.lease_counter += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
