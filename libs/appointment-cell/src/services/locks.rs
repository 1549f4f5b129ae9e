use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

type LockMap = HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per provider so that check-then-write on a provider's calendar is serialised.
///
/// Entries only live while someone holds or waits for them; the last guard out removes its entry.
#[derive(Default)]
pub struct ProviderLocks {
    locks: Mutex<LockMap>,
}

impl ProviderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, provider_id: Uuid) -> ProviderLockGuard<'_> {
        let lock = self.map().entry(provider_id).or_default().clone();
        let guard = lock.lock_owned().await;
        ProviderLockGuard {
            locks: self,
            provider_id,
            guard: Some(guard),
        }
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.map().len()
    }
}

/// Holds one provider's lock; dropping it releases the lock and prunes the idle entry.
pub struct ProviderLockGuard<'a> {
    locks: &'a ProviderLocks,
    provider_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProviderLockGuard<'_> {
    fn drop(&mut self) {
        // Release before counting so the only remaining references are the map's and any waiters'.
        self.guard.take();

        let mut locks = self.locks.map();
        let idle = locks
            .get(&self.provider_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.provider_id);
        }
    }
}
