//! Per-record serialization
//!
//! Operations on the same record run one at a time; operations on different
//! records proceed concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use prmission_types::{CampaignId, EscrowId, PermissionId};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The record an operation serializes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Permission(PermissionId),
    Escrow(EscrowId),
    Campaign(CampaignId),
}

#[derive(Default)]
pub struct RecordLocks {
    locks: DashMap<RecordKey, Arc<Mutex<()>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`; released when the guard drops
    pub async fn acquire(&self, key: RecordKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key).or_default().clone();
        lock.lock_owned().await
    }
}
