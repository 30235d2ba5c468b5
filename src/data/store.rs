//! Local store contract and in-memory backend
//!
//! A local store keeps one entity kind, keyed by `Storable::key`, and
//! enforces the kind's retention ceiling on every upsert. Mutations run
//! on the shared `MutationContext`; reads go straight to the index.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;

use super::context::MutationContext;
use super::models::{CachedEntity, EntityKind, StoreKey, Storable};
use crate::error::AppError;

/// Queryable, unique-keyed local cache for one entity kind
#[async_trait]
pub trait LocalStore<R: Storable>: Send + Sync {
    /// Insert or replace every record of the batch
    ///
    /// Idempotent. Enforces the retention ceiling within the same
    /// transaction.
    async fn upsert(&self, batch: Vec<R>) -> Result<(), AppError> {
        self.upsert_guarded(batch, &WriteGuard::unguarded())
            .await
            .map(|_| ())
    }

    /// `upsert`, unless the session `guard` was issued under has ended
    ///
    /// The guard is checked inside the mutation job, so it is ordered
    /// against logout wipes. Returns `false` when the batch was dropped.
    async fn upsert_guarded(&self, batch: Vec<R>, guard: &WriteGuard) -> Result<bool, AppError>;

    /// Remove one entity; removing a missing key is not an error
    async fn delete(&self, key: &StoreKey) -> Result<(), AppError>;

    /// Remove every entity if this store's kind is listed
    async fn wipe(&self, kinds: &[EntityKind]) -> Result<(), AppError>;

    async fn get(&self, key: &StoreKey) -> Result<Option<R>, AppError>;

    /// All records, newest first
    async fn all(&self) -> Result<Vec<R>, AppError>;

    async fn count(&self) -> Result<usize, AppError>;

    /// Revision counter bumped after every effective mutation
    fn changes(&self) -> watch::Receiver<u64>;
}

// =============================================================================
// Write Guard
// =============================================================================

/// Session epoch a cache write was issued under
///
/// The epoch advances on every sign-in and logout; a guard whose epoch has
/// moved on no longer admits writes.
#[derive(Clone)]
pub struct WriteGuard {
    epoch: Option<(watch::Receiver<u64>, u64)>,
}

impl WriteGuard {
    /// Guard pinned to the current value of `epoch`
    pub fn new(epoch: watch::Receiver<u64>) -> Self {
        let issued = *epoch.borrow();
        Self {
            epoch: Some((epoch, issued)),
        }
    }

    /// Guard that always admits writes
    pub fn unguarded() -> Self {
        Self { epoch: None }
    }

    pub fn is_current(&self) -> bool {
        match &self.epoch {
            Some((epoch, issued)) => *epoch.borrow() == *issued,
            None => true,
        }
    }
}

// =============================================================================
// Record Index
// =============================================================================

/// Explicit key index with trim-on-insert retention
#[derive(Debug)]
pub struct RecordIndex<R: Storable> {
    entries: HashMap<StoreKey, CachedEntity<R>>,
}

/// What a single upsert did to the index
#[derive(Debug, Default)]
pub struct UpsertEffect {
    pub changed: bool,
    pub evicted: Vec<StoreKey>,
}

impl<R: Storable> RecordIndex<R> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn upsert(&mut self, record: R) -> UpsertEffect {
        let entity = CachedEntity::from_record(record);
        let changed = self.entries.get(&entity.key) != Some(&entity);
        let group = entity.group.clone();
        self.entries.insert(entity.key.clone(), entity);

        let evicted = match (R::SCHEMA.retention, group) {
            (Some(retention), Some(group)) => self.trim_group(&group, retention.ceiling),
            _ => Vec::new(),
        };

        UpsertEffect {
            changed: changed || !evicted.is_empty(),
            evicted,
        }
    }

    /// Evict the oldest members of `group` beyond `ceiling`
    ///
    /// Oldest means smallest timestamp; ties break on the smaller key.
    fn trim_group(&mut self, group: &str, ceiling: usize) -> Vec<StoreKey> {
        let mut members: Vec<_> = self
            .entries
            .values()
            .filter(|entity| entity.group.as_deref() == Some(group))
            .map(|entity| (entity.timestamp, entity.key.clone()))
            .collect();

        if members.len() <= ceiling {
            return Vec::new();
        }

        members.sort();
        let excess = members.len() - ceiling;
        members
            .into_iter()
            .take(excess)
            .map(|(_, key)| {
                self.entries.remove(&key);
                key
            })
            .collect()
    }

    pub fn remove(&mut self, key: &StoreKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn get(&self, key: &StoreKey) -> Option<&R> {
        self.entries.get(key).map(|entity| &entity.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records ordered newest first, then by key descending
    pub fn newest_first(&self) -> Vec<R> {
        let mut entities: Vec<&CachedEntity<R>> = self.entries.values().collect();
        entities.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.key.cmp(&a.key))
        });
        entities.into_iter().map(|e| e.record.clone()).collect()
    }
}

impl<R: Storable> Default for RecordIndex<R> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Logout wipe
// =============================================================================

/// Wipe `store` every time a logout event arrives
///
/// Holds only a weak reference; the task ends when the store is gone
/// or the event stream closes.
pub fn spawn_logout_wipe<S, R>(
    store: Weak<S>,
    mut events: broadcast::Receiver<()>,
) -> JoinHandle<()>
where
    S: LocalStore<R> + 'static,
    R: Storable,
{
    use tokio::sync::broadcast::error::RecvError;

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    let Some(store) = store.upgrade() else {
                        break;
                    };
                    match store.wipe(&[R::KIND]).await {
                        Ok(()) => tracing::info!(kind = R::KIND.as_str(), "Cache wiped on logout"),
                        Err(error) => tracing::error!(
                            kind = R::KIND.as_str(),
                            %error,
                            "Failed to wipe cache on logout"
                        ),
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn record_cache_size(kind: EntityKind, size: usize) {
    crate::metrics::CACHE_SIZE
        .with_label_values(&[kind.as_str()])
        .set(size as i64);
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory local store
pub struct MemoryStore<R: Storable> {
    index: Arc<RwLock<RecordIndex<R>>>,
    context: MutationContext,
    revision: Arc<watch::Sender<u64>>,
}

impl<R: Storable> MemoryStore<R> {
    /// Create a store that is wiped whenever `logout_events` fires
    pub fn open(context: MutationContext, logout_events: broadcast::Receiver<()>) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        let store = Arc::new(Self {
            index: Arc::new(RwLock::new(RecordIndex::new())),
            context,
            revision: Arc::new(revision),
        });
        spawn_logout_wipe::<Self, R>(Arc::downgrade(&store), logout_events);
        store
    }
}

#[async_trait]
impl<R: Storable> LocalStore<R> for MemoryStore<R> {
    async fn upsert_guarded(&self, batch: Vec<R>, guard: &WriteGuard) -> Result<bool, AppError> {
        if batch.is_empty() {
            return Ok(guard.is_current());
        }

        let index = self.index.clone();
        let revision = self.revision.clone();
        let guard = guard.clone();
        let size = self
            .context
            .run(async move {
                if !guard.is_current() {
                    return Ok(None);
                }

                let mut index = index.write().await;
                let mut changed = false;
                for record in batch {
                    let effect = index.upsert(record);
                    if !effect.evicted.is_empty() {
                        tracing::debug!(
                            kind = R::KIND.as_str(),
                            evicted = effect.evicted.len(),
                            "Retention ceiling evicted entities"
                        );
                    }
                    changed |= effect.changed;
                }
                if changed {
                    revision.send_modify(|value| *value += 1);
                }
                Ok(Some(index.len()))
            })
            .await?;

        let Some(size) = size else {
            tracing::debug!(kind = R::KIND.as_str(), "Batch dropped, session ended");
            return Ok(false);
        };
        record_cache_size(R::KIND, size);
        Ok(true)
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), AppError> {
        let index = self.index.clone();
        let revision = self.revision.clone();
        let key = key.clone();
        let size = self
            .context
            .run(async move {
                let mut index = index.write().await;
                if index.remove(&key) {
                    revision.send_modify(|value| *value += 1);
                }
                Ok(index.len())
            })
            .await?;

        record_cache_size(R::KIND, size);
        Ok(())
    }

    async fn wipe(&self, kinds: &[EntityKind]) -> Result<(), AppError> {
        if !kinds.contains(&R::KIND) {
            return Ok(());
        }

        let index = self.index.clone();
        let revision = self.revision.clone();
        self.context
            .run(async move {
                if index.write().await.clear() > 0 {
                    revision.send_modify(|value| *value += 1);
                }
                Ok(())
            })
            .await?;

        record_cache_size(R::KIND, 0);
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<R>, AppError> {
        Ok(self.index.read().await.get(key).cloned())
    }

    async fn all(&self) -> Result<Vec<R>, AppError> {
        Ok(self.index.read().await.newest_first())
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.index.read().await.len())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
