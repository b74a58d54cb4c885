//! Tiered-migration controller (spec §4.5). Moves objects between storage
//! tiers under per-SHA locks so a read or write racing a migration always
//! sees a consistent tier, and tracks per-SHA access statistics to decide
//! what should move.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::MigrationConfig;
use crate::errors::StoreError;
use crate::hash::ObjectHash;
use crate::store::tier::{Tier, TierBlobStore};

/// Selection criteria for `find_candidates` (spec §4.5).
#[derive(Debug, Clone)]
pub struct MigrationPolicy {
    pub max_age_in_hot_seconds: i64,
    pub min_access_count: i64,
    pub hot_bytes_budget: i64,
}

/// What kind of access an object received, for the access tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        }
    }
}

/// Optional metrics attached to a recorded access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessMetrics {
    pub bytes_read: Option<i64>,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Default)]
pub struct BatchMigrationResult {
    pub succeeded: Vec<ObjectHash>,
    pub failed: Vec<(ObjectHash, String)>,
}

/// Moves objects between tiers, maintaining the `object_index` location
/// table and `access_patterns` statistics.
pub struct Migrator {
    conn: DatabaseConnection,
    tier_store: Arc<dyn TierBlobStore>,
    config: MigrationConfig,
    locks: DashMap<ObjectHash, Arc<AsyncMutex<()>>>,
    pending_writes: DashMap<ObjectHash, Vec<u8>>,
}

impl Migrator {
    pub fn new(conn: DatabaseConnection, tier_store: Arc<dyn TierBlobStore>, config: MigrationConfig) -> Self {
        Migrator {
            conn,
            tier_store,
            config,
            locks: DashMap::new(),
            pending_writes: DashMap::new(),
        }
    }

    fn backend(&self) -> sea_orm::DatabaseBackend {
        self.conn.get_database_backend()
    }

    fn lock_for(&self, sha: ObjectHash) -> Arc<AsyncMutex<()>> {
        self.locks.entry(sha).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Hot-tier objects eligible for migration out, oldest-accessed first
    /// and then largest first, bounded by a total-bytes budget.
    pub async fn find_candidates(&self, policy: &MigrationPolicy) -> Result<Vec<ObjectHash>, StoreError> {
        let cutoff = Utc::now().timestamp() - policy.max_age_in_hot_seconds;
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT h.sha AS sha, h.accessed_at AS accessed_at,
                    LENGTH(h.data) AS size,
                    COALESCE(a.read_count, 0) + COALESCE(a.write_count, 0) AS access_count
             FROM hot_objects h
             LEFT JOIN access_patterns a ON a.sha = h.sha
             WHERE h.accessed_at < $1
               AND COALESCE(a.read_count, 0) + COALESCE(a.write_count, 0) < $2
             ORDER BY h.accessed_at ASC, size DESC",
            [cutoff.into(), policy.min_access_count.into()],
        );
        let rows = self
            .conn
            .query_all(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;

        let mut candidates = Vec::new();
        let mut budget_used: i64 = 0;
        for row in rows {
            let sha_hex: String = row.try_get("", "sha").map_err(|e| StoreError::Backend(e.to_string()))?;
            let size: i64 = row.try_get("", "size").map_err(|e| StoreError::Backend(e.to_string()))?;
            if budget_used + size > policy.hot_bytes_budget {
                continue;
            }
            let sha = sha_hex
                .parse::<ObjectHash>()
                .map_err(|e| StoreError::Backend(format!("corrupt sha in hot_objects: {e}")))?;
            budget_used += size;
            candidates.push(sha);
        }
        Ok(candidates)
    }

    pub(crate) async fn read_tier(&self, tier: Tier, sha: ObjectHash) -> Result<Option<Vec<u8>>, StoreError> {
        if tier == Tier::Hot {
            let stmt = Statement::from_sql_and_values(
                self.backend(),
                "SELECT data FROM hot_objects WHERE sha = $1",
                [sha.to_string().into()],
            );
            let row = self
                .conn
                .query_one(stmt)
                .await
                .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
            return match row {
                Some(r) => Ok(Some(r.try_get("", "data").map_err(|e| StoreError::Backend(e.to_string()))?)),
                None => Ok(None),
            };
        }
        self.tier_store.get(tier, sha).await
    }

    pub(crate) async fn write_tier(&self, tier: Tier, sha: ObjectHash, data: Vec<u8>, object_type: &str) -> Result<(), StoreError> {
        if tier == Tier::Hot {
            let now = Utc::now().timestamp();
            let stmt = Statement::from_sql_and_values(
                self.backend(),
                "INSERT INTO hot_objects (sha, type, data, accessed_at, created_at)
                 VALUES ($1, $2, $3, $4, $4)
                 ON CONFLICT(sha) DO UPDATE SET data = excluded.data, accessed_at = excluded.accessed_at",
                [sha.to_string().into(), object_type.into(), data.into(), now.into()],
            );
            self.conn
                .execute(stmt)
                .await
                .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
            return Ok(());
        }
        self.tier_store.put(tier, sha, data).await
    }

    pub(crate) async fn delete_tier(&self, tier: Tier, sha: ObjectHash) -> Result<(), StoreError> {
        if tier == Tier::Hot {
            let stmt = Statement::from_sql_and_values(
                self.backend(),
                "DELETE FROM hot_objects WHERE sha = $1",
                [sha.to_string().into()],
            );
            self.conn
                .execute(stmt)
                .await
                .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
            return Ok(());
        }
        self.tier_store.delete(tier, sha).await
    }

    pub(crate) async fn set_index_tier(&self, sha: ObjectHash, tier: Tier, size: i64, object_type: &str) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO object_index (sha, tier, pack_id, offset, size, type, updated_at)
             VALUES ($1, $2, NULL, NULL, $3, $4, $5)
             ON CONFLICT(sha) DO UPDATE SET tier = excluded.tier, size = excluded.size, type = excluded.type, updated_at = excluded.updated_at",
            [sha.to_string().into(), tier.as_str().into(), size.into(), object_type.into(), now.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Moves one object from `src` to `dst` under a per-SHA lock. Verifies
    /// the destination re-hashes correctly before deleting the source; on
    /// any failure the source is left untouched and the destination's
    /// partial write is removed.
    pub async fn migrate(&self, sha: ObjectHash, src: Tier, dst: Tier) -> Result<(), StoreError> {
        let lock = self.lock_for(sha);
        let guard = tokio::time::timeout(Duration::from_millis(self.config.lock_timeout_ms), lock.lock())
            .await
            .map_err(|_| StoreError::LockTimeout(sha.to_string()))?;

        let result = self.migrate_locked(sha, src, dst).await;
        drop(guard);

        if let Some(pending) = self.pending_writes.remove(&sha) {
            let (_, data) = pending;
            match &result {
                Ok(()) => {
                    let object_type = self.object_type_for(sha).await.unwrap_or_else(|_| "blob".to_string());
                    if let Err(e) = self.write_tier(dst, sha, data, &object_type).await {
                        warn!(sha = %sha, error = %e, "failed to replay pending write against migration destination");
                    }
                }
                Err(_) => {
                    let object_type = self.object_type_for(sha).await.unwrap_or_else(|_| "blob".to_string());
                    if let Err(e) = self.write_tier(src, sha, data, &object_type).await {
                        warn!(sha = %sha, error = %e, "failed to replay pending write against migration source after rollback");
                    }
                }
            }
        }

        result
    }

    pub(crate) async fn object_type_for(&self, sha: ObjectHash) -> Result<String, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT type FROM objects WHERE sha = $1",
            [sha.to_string().into()],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(sha.to_string()))?;
        row.try_get("", "type").map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn migrate_locked(&self, sha: ObjectHash, src: Tier, dst: Tier) -> Result<(), StoreError> {
        let data = self
            .read_tier(src, sha)
            .await?
            .ok_or_else(|| StoreError::NotFound(sha.to_string()))?;

        let rehash = ObjectHash::new(&data);
        if rehash != sha {
            return Err(StoreError::CorruptObject { sha: sha.to_string() });
        }

        let object_type = self.object_type_for(sha).await.unwrap_or_else(|_| "blob".to_string());
        let size = data.len() as i64;

        if let Err(e) = self.write_tier(dst, sha, data, &object_type).await {
            let _ = self.delete_tier(dst, sha).await;
            return Err(StoreError::MigrationFailed {
                sha: sha.to_string(),
                source_tier: src.as_str().to_string(),
                target_tier: dst.as_str().to_string(),
                cause: e.to_string(),
            });
        }

        if let Err(e) = self.set_index_tier(sha, dst, size, &object_type).await {
            let _ = self.delete_tier(dst, sha).await;
            return Err(StoreError::MigrationFailed {
                sha: sha.to_string(),
                source_tier: src.as_str().to_string(),
                target_tier: dst.as_str().to_string(),
                cause: e.to_string(),
            });
        }

        self.delete_tier(src, sha).await?;
        debug!(sha = %sha, src = src.as_str(), dst = dst.as_str(), "migration complete");
        Ok(())
    }

    /// Reads through a possible in-flight migration: prefers the destination
    /// once its write has completed (tracked via `object_index.tier`),
    /// otherwise falls back to the source.
    pub async fn read_during_migration(&self, sha: ObjectHash, src: Tier, dst: Tier) -> Result<Option<Vec<u8>>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT tier FROM object_index WHERE sha = $1",
            [sha.to_string().into()],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        if let Some(r) = row {
            let tier_str: String = r.try_get("", "tier").map_err(|e| StoreError::Backend(e.to_string()))?;
            if tier_str == dst.as_str() {
                return self.read_tier(dst, sha).await;
            }
        }
        self.read_tier(src, sha).await
    }

    /// Buffers a write that arrived mid-migration; applied once `migrate`
    /// finishes, against whichever tier the migration settled on.
    pub fn write_during_migration(&self, sha: ObjectHash, data: Vec<u8>) {
        self.pending_writes.insert(sha, data);
    }

    /// Runs up to `concurrency` migrations at a time, returning per-SHA
    /// success and failure lists.
    pub async fn migrate_batch(&self, shas: Vec<ObjectHash>, src: Tier, dst: Tier, concurrency: usize) -> BatchMigrationResult {
        use futures::stream::{self, StreamExt};

        let results: Vec<(ObjectHash, Result<(), StoreError>)> = stream::iter(shas)
            .map(|sha| async move { (sha, self.migrate(sha, src, dst).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut out = BatchMigrationResult::default();
        for (sha, result) in results {
            match result {
                Ok(()) => out.succeeded.push(sha),
                Err(e) => out.failed.push((sha, e.to_string())),
            }
        }
        out
    }

    /// Updates per-SHA access counters (spec §4.5 "access tracker").
    pub async fn record_access(&self, sha: ObjectHash, kind: AccessKind, metrics: AccessMetrics) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let (read_inc, write_inc) = match kind {
            AccessKind::Read => (1, 0),
            AccessKind::Write => (0, 1),
        };
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO access_patterns (sha, read_count, write_count, last_accessed_at, access_frequency, bytes_read, latency_ms_total)
             VALUES ($1, $2, $3, $4, 1.0, $5, $6)
             ON CONFLICT(sha) DO UPDATE SET
                read_count = access_patterns.read_count + $2,
                write_count = access_patterns.write_count + $3,
                last_accessed_at = $4,
                access_frequency = access_patterns.access_frequency + 1.0,
                bytes_read = COALESCE(access_patterns.bytes_read, 0) + COALESCE($5, 0),
                latency_ms_total = COALESCE(access_patterns.latency_ms_total, 0) + COALESCE($6, 0)",
            [
                sha.to_string().into(),
                read_inc.into(),
                write_inc.into(),
                now.into(),
                metrics.bytes_read.into(),
                metrics.latency_ms.into(),
            ],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        debug!(sha = %sha, kind = kind.as_str(), "access recorded");
        Ok(())
    }

    /// Decays every access-frequency counter older than `min_age_ms` by
    /// `factor` (spec §4.5 "apply_decay").
    pub async fn apply_decay(&self, factor: f64, min_age_ms: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now().timestamp() - min_age_ms / 1000;
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "UPDATE access_patterns SET access_frequency = access_frequency * $1 WHERE last_accessed_at < $2",
            [factor.into(), cutoff.into()],
        );
        let result = self
            .conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// SHAs whose access frequency is at or above `min_frequency`.
    pub async fn identify_hot_objects(&self, min_frequency: f64) -> Result<Vec<ObjectHash>, StoreError> {
        self.shas_by_frequency(min_frequency, true).await
    }

    /// SHAs whose access frequency is at or below `max_frequency`.
    pub async fn identify_cold_objects(&self, max_frequency: f64) -> Result<Vec<ObjectHash>, StoreError> {
        self.shas_by_frequency(max_frequency, false).await
    }

    async fn shas_by_frequency(&self, threshold: f64, above: bool) -> Result<Vec<ObjectHash>, StoreError> {
        let sql = if above {
            "SELECT sha FROM access_patterns WHERE access_frequency >= $1"
        } else {
            "SELECT sha FROM access_patterns WHERE access_frequency <= $1"
        };
        let stmt = Statement::from_sql_and_values(self.backend(), sql, [threshold.into()]);
        let rows = self
            .conn
            .query_all(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let sha_hex: String = row.try_get("", "sha").map_err(|e| StoreError::Backend(e.to_string()))?;
            if let Ok(sha) = sha_hex.parse::<ObjectHash>() {
                out.push(sha);
            }
        }
        Ok(out)
    }
}

/// Counters snapshot for diagnostics/testing.
pub fn summarize_locks(migrator: &Migrator) -> HashMap<ObjectHash, usize> {
    migrator
        .locks
        .iter()
        .map(|entry| (*entry.key(), Arc::strong_count(entry.value())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tier::InMemoryTierBlobStore;
    use sea_orm::Database;

    async fn test_migrator() -> Migrator {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        crate::store::schema::ensure_schema(&conn).await.unwrap();
        Migrator::new(conn, Arc::new(InMemoryTierBlobStore::new()), MigrationConfig::default())
    }

    async fn seed_hot(m: &Migrator, data: &[u8]) -> ObjectHash {
        let sha = ObjectHash::new(data);
        m.write_tier(Tier::Hot, sha, data.to_vec(), "blob").await.unwrap();
        let stmt = Statement::from_sql_and_values(
            m.backend(),
            "INSERT INTO objects (sha, type, size, data, created_at) VALUES ($1, 'blob', $2, $3, $4)",
            [sha.to_string().into(), (data.len() as i64).into(), data.to_vec().into(), 0i64.into()],
        );
        m.conn.execute(stmt).await.unwrap();
        sha
    }

    #[tokio::test]
    async fn migrate_moves_blob_between_tiers() {
        let m = test_migrator().await;
        let sha = seed_hot(&m, b"hello world").await;
        m.migrate(sha, Tier::Hot, Tier::Warm).await.unwrap();
        assert_eq!(m.read_tier(Tier::Hot, sha).await.unwrap(), None);
        assert_eq!(m.read_tier(Tier::Warm, sha).await.unwrap(), Some(b"hello world".to_vec()));
    }

    #[tokio::test]
    async fn read_during_migration_prefers_destination_once_indexed() {
        let m = test_migrator().await;
        let sha = seed_hot(&m, b"payload").await;
        m.migrate(sha, Tier::Hot, Tier::Cold).await.unwrap();
        let read = m.read_during_migration(sha, Tier::Hot, Tier::Cold).await.unwrap();
        assert_eq!(read, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn record_access_accumulates_counts() {
        let m = test_migrator().await;
        let sha = seed_hot(&m, b"x").await;
        m.record_access(sha, AccessKind::Read, AccessMetrics::default()).await.unwrap();
        m.record_access(sha, AccessKind::Read, AccessMetrics::default()).await.unwrap();
        let hot = m.identify_hot_objects(1.5).await.unwrap();
        assert!(hot.contains(&sha));
    }

    #[tokio::test]
    async fn migrate_batch_reports_success_for_each_sha() {
        let m = test_migrator().await;
        let a = seed_hot(&m, b"aaa").await;
        let b = seed_hot(&m, b"bbb").await;
        let result = m.migrate_batch(vec![a, b], Tier::Hot, Tier::Warm, 2).await;
        assert_eq!(result.succeeded.len(), 2);
        assert!(result.failed.is_empty());
    }
}
