use crate::db::{EntityKey, PollStore};
use crate::error::{PollError, StoreError};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

type LockTable = DashMap<EntityKey, Arc<Mutex<()>>>;

/// Serializes read-modify-write on a single counter.
///
/// Locks are per entity, so increments on unrelated polls and options never
/// wait on each other. Whatever runs in the `on_commit` hook of
/// [`CounterMutator::increment_then`] is still inside the entity's critical
/// section, which is what keeps notification order equal to commit order.
///
/// Critical sections run on their own task. Dropping the caller's future
/// neither skips the hook of a committed write nor leaks a lock.
#[derive(Clone)]
pub struct CounterMutator {
    store: Arc<dyn PollStore>,
    locks: Arc<LockTable>,
}

impl std::fmt::Debug for CounterMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterMutator")
            .field("held_locks", &self.locks.len())
            .finish()
    }
}

impl CounterMutator {
    pub fn new(store: Arc<dyn PollStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn increment(&self, entity: EntityKey) -> Result<i64, PollError> {
        self.increment_then(entity, |_| async {}).await
    }

    /// Increments the entity's counter and, if the write committed, runs
    /// `on_commit` with the new value before the entity lock is released.
    pub async fn increment_then<F, Fut>(&self, entity: EntityKey, on_commit: F) -> Result<i64, PollError>
    where
        F: FnOnce(i64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.store.counter_value(entity).await?.is_none() {
            return Err(not_found(entity));
        }

        let store = self.store.clone();
        self.with_locks([entity], async move {
            match store.increment(entity).await {
                Ok(Some(value)) => {
                    on_commit(value).await;
                    Ok(value)
                }
                Ok(None) => Err(not_found(entity)),
                Err(e) => {
                    warn!("Increment of {} failed: {}", entity, e);
                    Err(PollError::StoreFailure(e))
                }
            }
        })
        .await
    }

    /// Runs `work` while holding the locks of every listed entity.
    ///
    /// Locks are taken in key order. The work is spawned, so it runs to
    /// completion even if the returned future is dropped.
    pub async fn with_locks<T, Fut>(
        &self,
        entities: impl IntoIterator<Item = EntityKey>,
        work: Fut,
    ) -> Result<T, PollError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, PollError>> + Send + 'static,
    {
        let mut entities: Vec<EntityKey> = entities.into_iter().collect();
        entities.sort_unstable();
        entities.dedup();

        let mut leases: Vec<LockLease> = entities.into_iter().map(|e| self.lease(e)).collect();

        let task = tokio::spawn(async move {
            for lease in &mut leases {
                lease.acquire().await;
            }
            let outcome = work.await;
            drop(leases);
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!("Locked section did not finish: {}", e);
                Err(PollError::StoreFailure(StoreError::Unavailable(
                    "mutation task cancelled".to_string(),
                )))
            }
        }
    }

    fn lease(&self, entity: EntityKey) -> LockLease {
        let lock = self.locks.entry(entity).or_default().clone();
        LockLease {
            locks: self.locks.clone(),
            entity,
            lock: Some(lock),
            guard: None,
        }
    }
}

/// A claim on one entity lock. Dropping it unlocks and, when nobody else
/// holds a claim, removes the idle lock from the table.
struct LockLease {
    locks: Arc<LockTable>,
    entity: EntityKey,
    lock: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockLease {
    async fn acquire(&mut self) {
        if let Some(lock) = self.lock.clone() {
            self.guard = Some(lock.lock_owned().await);
        }
    }
}

impl Drop for LockLease {
    // Clones only happen under the shard lock held by `entry`, so once our
    // own references are gone a strong count of one means the lock is idle.
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        self.locks
            .remove_if(&self.entity, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn not_found(entity: EntityKey) -> PollError {
    match entity {
        EntityKey::Poll(_) => PollError::PollNotFound,
        EntityKey::Option(_) => PollError::OptionNotFound,
    }
}
