//! Per-entity exclusive locks backing serializable transactions

use crate::core::record::EntityId;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<EntityId, Arc<Mutex<()>>>;

/// Guard held by a transaction until it commits or rolls back
#[derive(Debug)]
pub struct EntityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    entity_id: EntityId,
    locks: Arc<LockMap>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.locks, &self.entity_id);
    }
}

/// Forget the entity's mutex once no guard or waiter refers to it.
/// `remove_if` holds the shard lock, so no acquirer can clone it meanwhile.
fn prune(locks: &LockMap, entity_id: &EntityId) {
    locks.remove_if(entity_id, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Lock table keyed by entity.
///
/// A transaction locks an entity on first access and keeps the lock until it
/// ends, so same-entity transactions run strictly one after another while
/// different entities never contend. Entries only live while someone holds
/// or waits for them.
pub struct LockTable {
    locks: Arc<LockMap>,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Number of entities currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Wait for the entity's lock, giving up with a conflict after the
    /// configured timeout.
    pub async fn acquire(&self, entity_id: &EntityId) -> Result<EntityGuard> {
        let mutex = self
            .locks
            .entry(entity_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let acquired = tokio::time::timeout(self.timeout, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(EntityGuard {
                guard: Some(guard),
                entity_id: entity_id.clone(),
                locks: Arc::clone(&self.locks),
            }),
            Err(_) => {
                prune(&self.locks, entity_id);
                Err(Error::Conflict(format!(
                    "could not serialize access to {entity_id} within {:?}",
                    self.timeout
                )))
            }
        }
    }
}
