//! Single-writer serialization per account.
//!
//! Cart mutations and checkout steps for one account run one at a time;
//! different accounts never wait on each other. Locks are created on demand
//! and pruned once nobody holds or awaits them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct AccountLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `account_id`. Released when the guard drops.
    pub async fn acquire(&self, account_id: Uuid) -> AccountGuard {
        let lock = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        AccountGuard {
            guard: Some(guard),
            account_id,
            locks: self.locks.clone(),
        }
    }

    /// Number of accounts with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

pub struct AccountGuard {
    guard: Option<OwnedMutexGuard<()>>,
    account_id: Uuid,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AccountGuard {
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still references the mutex: nobody holds or awaits it.
        self.locks
            .remove_if(&self.account_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
