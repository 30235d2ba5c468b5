//! SQLite-backed persistent cache
//!
//! All entity kinds share one `cached_entities` table keyed by
//! `(kind, entity_key)`. Records are stored as JSON payloads next to the
//! grouping key and timestamp the retention ceiling needs.

use async_trait::async_trait;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::context::MutationContext;
use super::models::{EntityKind, StoreKey, Storable};
use super::store::{LocalStore, WriteGuard, record_cache_size, spawn_logout_wipe};
use crate::error::AppError;

/// Connection pool for the cache database
#[derive(Clone)]
pub struct CacheDatabase {
    pool: Pool<Sqlite>,
}

impl CacheDatabase {
    /// Connect to the SQLite cache file
    ///
    /// Creates the file and its parent directory if missing and runs
    /// pending migrations.
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Cache database connected and migrated");

        Ok(Self { pool })
    }
}

/// Persistent local store for one entity kind
pub struct SqliteStore<R: Storable> {
    pool: Pool<Sqlite>,
    context: MutationContext,
    revision: Arc<watch::Sender<u64>>,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Storable> SqliteStore<R> {
    /// Create a store that is wiped whenever `logout_events` fires
    pub fn open(
        database: &CacheDatabase,
        context: MutationContext,
        logout_events: broadcast::Receiver<()>,
    ) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        let store = Arc::new(Self {
            pool: database.pool.clone(),
            context,
            revision: Arc::new(revision),
            _kind: PhantomData,
        });
        spawn_logout_wipe::<Self, R>(Arc::downgrade(&store), logout_events);
        store
    }

    async fn count_rows(pool: &Pool<Sqlite>) -> Result<usize, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM cached_entities WHERE kind = ?",
        )
        .bind(R::KIND.as_str())
        .fetch_one(pool)
        .await?;

        Ok(count.max(0) as usize)
    }
}

fn decode_payload<R: Storable>(payload: &str) -> Result<R, AppError> {
    serde_json::from_str(payload).map_err(AppError::from)
}

#[async_trait]
impl<R: Storable> LocalStore<R> for SqliteStore<R> {
    async fn upsert_guarded(&self, batch: Vec<R>, guard: &WriteGuard) -> Result<bool, AppError> {
        if batch.is_empty() {
            return Ok(guard.is_current());
        }

        let pool = self.pool.clone();
        let revision = self.revision.clone();
        let guard = guard.clone();
        let size = self
            .context
            .run(async move {
                if !guard.is_current() {
                    return Ok(None);
                }

                let kind = R::KIND.as_str();
                let mut tx = pool.begin().await?;
                let mut affected = 0u64;

                for record in &batch {
                    let payload = serde_json::to_string(record)?;
                    let group = record.group();

                    affected += sqlx::query(
                        r#"
                        INSERT INTO cached_entities
                            (kind, entity_key, group_key, timestamp_ms, payload)
                        VALUES (?, ?, ?, ?, ?)
                        ON CONFLICT(kind, entity_key) DO UPDATE SET
                            group_key = excluded.group_key,
                            timestamp_ms = excluded.timestamp_ms,
                            payload = excluded.payload
                        WHERE cached_entities.payload IS NOT excluded.payload
                        "#,
                    )
                    .bind(kind)
                    .bind(record.key().to_string())
                    .bind(&group)
                    .bind(record.timestamp().map(|at| at.timestamp_millis()))
                    .bind(&payload)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

                    if let (Some(retention), Some(group)) = (R::SCHEMA.retention, group) {
                        let evicted = sqlx::query(
                            r#"
                            DELETE FROM cached_entities
                            WHERE kind = ? AND group_key = ? AND entity_key NOT IN (
                                SELECT entity_key FROM cached_entities
                                WHERE kind = ? AND group_key = ?
                                ORDER BY timestamp_ms DESC, entity_key DESC
                                LIMIT ?
                            )
                            "#,
                        )
                        .bind(kind)
                        .bind(&group)
                        .bind(kind)
                        .bind(&group)
                        .bind(retention.ceiling as i64)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();

                        if evicted > 0 {
                            tracing::debug!(kind, evicted, "Retention ceiling evicted entities");
                        }
                        affected += evicted;
                    }
                }

                tx.commit().await?;

                if affected > 0 {
                    revision.send_modify(|value| *value += 1);
                }
                Self::count_rows(&pool).await.map(Some)
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
        let pool = self.pool.clone();
        let revision = self.revision.clone();
        let key = key.to_string();
        let size = self
            .context
            .run(async move {
                let removed =
                    sqlx::query("DELETE FROM cached_entities WHERE kind = ? AND entity_key = ?")
                        .bind(R::KIND.as_str())
                        .bind(&key)
                        .execute(&pool)
                        .await?
                        .rows_affected();

                if removed > 0 {
                    revision.send_modify(|value| *value += 1);
                }
                Self::count_rows(&pool).await
            })
            .await?;

        record_cache_size(R::KIND, size);
        Ok(())
    }

    async fn wipe(&self, kinds: &[EntityKind]) -> Result<(), AppError> {
        if !kinds.contains(&R::KIND) {
            return Ok(());
        }

        let pool = self.pool.clone();
        let revision = self.revision.clone();
        self.context
            .run(async move {
                let removed = sqlx::query("DELETE FROM cached_entities WHERE kind = ?")
                    .bind(R::KIND.as_str())
                    .execute(&pool)
                    .await?
                    .rows_affected();

                if removed > 0 {
                    revision.send_modify(|value| *value += 1);
                }
                Ok(())
            })
            .await?;

        record_cache_size(R::KIND, 0);
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<R>, AppError> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM cached_entities WHERE kind = ? AND entity_key = ?",
        )
        .bind(R::KIND.as_str())
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;

        payload.as_deref().map(decode_payload).transpose()
    }

    async fn all(&self) -> Result<Vec<R>, AppError> {
        let payloads = sqlx::query_scalar::<_, String>(
            r#"
            SELECT payload FROM cached_entities
            WHERE kind = ?
            ORDER BY timestamp_ms DESC, entity_key DESC
            "#,
        )
        .bind(R::KIND.as_str())
        .fetch_all(&self.pool)
        .await?;

        payloads.iter().map(|payload| decode_payload(payload)).collect()
    }

    async fn count(&self) -> Result<usize, AppError> {
        Self::count_rows(&self.pool).await
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
