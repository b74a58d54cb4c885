//! Durable object store (spec §4.3): a cache-fronted, WAL-backed table of
//! content-addressed objects spread across hot/warm/cold tiers, with a
//! migration controller moving objects between tiers in the background.

pub mod cache;
pub mod migrator;
pub mod repository;
pub mod schema;
pub mod tier;
pub mod wal;

pub use cache::{Cache, CacheMetrics, EvictionReason};
pub use migrator::{AccessKind, AccessMetrics, BatchMigrationResult, MigrationPolicy, Migrator};
pub use repository::RepositoryHandle;
pub use tier::{InMemoryTierBlobStore, Tier, TierBlobStore};
pub use wal::{Wal, WalEntry};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::config::{MigrationConfig, StoreConfig};
use crate::errors::StoreError;
use crate::hash::ObjectHash;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::tag::Tag;
use crate::internal::object::tree::Tree;
use crate::internal::object::types::ObjectType;
use crate::internal::object::ObjectTrait;

/// Ties the cache, write-ahead log, and tiered migration controller to one
/// SQL connection so callers see a single content-addressed object API.
pub struct ObjectStore {
    conn: DatabaseConnection,
    cache: AsyncMutex<Cache>,
    wal: Wal,
    migrator: Migrator,
}

impl ObjectStore {
    pub async fn new(
        conn: DatabaseConnection,
        tier_store: Arc<dyn TierBlobStore>,
        store_config: StoreConfig,
        migration_config: MigrationConfig,
    ) -> Result<Self, StoreError> {
        schema::ensure_schema(&conn).await?;
        let cache = Cache::new(
            store_config.cache.max_count,
            store_config.cache.max_bytes,
            store_config.cache.ttl_seconds.map(Duration::from_secs),
        )
        .with_metrics(store_config.metrics_enabled);
        let wal = Wal::new(conn.clone());
        let migrator = Migrator::new(conn.clone(), tier_store, migration_config);
        Ok(ObjectStore {
            conn,
            cache: AsyncMutex::new(cache),
            wal,
            migrator,
        })
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    async fn insert_metadata_row(&self, sha: ObjectHash, object_type: ObjectType, data: &[u8]) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let stmt = Statement::from_sql_and_values(
            self.conn.get_database_backend(),
            "INSERT INTO objects (sha, type, size, data, created_at) VALUES ($1, $2, $3, NULL, $4) ON CONFLICT(sha) DO NOTHING",
            [
                sha.to_string().into(),
                object_type.to_string().into(),
                (data.len() as i64).into(),
                now.into(),
            ],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Writes one object, landing it in the hot tier. Returns its computed
    /// content hash.
    pub async fn put(&self, object_type: ObjectType, data: Vec<u8>) -> Result<ObjectHash, StoreError> {
        let sha = ObjectHash::from_type_and_data(object_type, &data);
        let wal_id = self.wal.append("put", &data, None).await?;

        self.insert_metadata_row(sha, object_type, &data).await?;
        self.migrator
            .write_tier(Tier::Hot, sha, data.clone(), &object_type.to_string())
            .await?;
        self.migrator
            .set_index_tier(sha, Tier::Hot, data.len() as i64, &object_type.to_string())
            .await?;

        self.wal.flush(wal_id).await?;
        self.cache.lock().await.insert(sha, data);
        debug!(sha = %sha, object_type = %object_type, "object stored");
        Ok(sha)
    }

    /// Writes a batch of objects under one WAL transaction; a failure partway
    /// through rolls the whole batch back (spec §4.4 "batch writes").
    pub async fn put_many(&self, objects: Vec<(ObjectType, Vec<u8>)>) -> Result<Vec<ObjectHash>, StoreError> {
        let tx = self.wal.begin_tx();
        let mut staged = Vec::with_capacity(objects.len());
        for (object_type, data) in objects {
            let sha = ObjectHash::from_type_and_data(object_type, &data);
            self.wal.append("put", &data, Some(&tx)).await?;
            staged.push((sha, object_type, data));
        }

        for (sha, object_type, data) in &staged {
            if let Err(e) = self.insert_metadata_row(*sha, *object_type, data).await {
                let _ = self.wal.rollback_tx(&tx).await;
                return Err(StoreError::BatchWriteFailed(e.to_string()));
            }
            if let Err(e) = self
                .migrator
                .write_tier(Tier::Hot, *sha, data.clone(), &object_type.to_string())
                .await
            {
                let _ = self.wal.rollback_tx(&tx).await;
                return Err(StoreError::BatchWriteFailed(e.to_string()));
            }
            if let Err(e) = self
                .migrator
                .set_index_tier(*sha, Tier::Hot, data.len() as i64, &object_type.to_string())
                .await
            {
                let _ = self.wal.rollback_tx(&tx).await;
                return Err(StoreError::BatchWriteFailed(e.to_string()));
            }
        }

        self.wal.commit_tx(&tx).await?;
        let mut cache = self.cache.lock().await;
        for (sha, _, data) in &staged {
            cache.insert(*sha, data.clone());
        }
        Ok(staged.into_iter().map(|(sha, _, _)| sha).collect())
    }

    async fn tier_of(&self, sha: ObjectHash) -> Result<Option<Tier>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.conn.get_database_backend(),
            "SELECT tier FROM object_index WHERE sha = $1",
            [sha.to_string().into()],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        match row {
            Some(r) => {
                let tier_str: String = r.try_get("", "tier").map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Tier::from_str(&tier_str))
            }
            None => Ok(None),
        }
    }

    /// Reads an object's raw bytes, checking the in-memory cache first, then
    /// falling through to whichever tier the location index names.
    pub async fn get(&self, sha: ObjectHash) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(data) = self.cache.lock().await.get(&sha) {
            return Ok(Some(data));
        }
        let tier = match self.tier_of(sha).await? {
            Some(t) => t,
            None => return Ok(None),
        };
        let data = self.migrator.read_tier(tier, sha).await?;
        if let Some(data) = &data {
            self.cache.lock().await.insert(sha, data.clone());
        }
        Ok(data)
    }

    /// Cache pass first, then one batched `IN (...)` query against the hot
    /// tier for the remainder (spec §4.3 `get_many`); anything still missing
    /// (cold/warm tiers have no batch read) falls back to `get` per sha.
    pub async fn get_many(&self, shas: &[ObjectHash]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let mut out: Vec<Option<Vec<u8>>> = Vec::with_capacity(shas.len());
        let mut misses: Vec<(usize, ObjectHash)> = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            for (i, sha) in shas.iter().enumerate() {
                match cache.get(sha) {
                    Some(data) => out.push(Some(data)),
                    None => {
                        out.push(None);
                        misses.push((i, *sha));
                    }
                }
            }
        }
        if misses.is_empty() {
            return Ok(out);
        }

        let placeholders: Vec<String> = (1..=misses.len()).map(|n| format!("${n}")).collect();
        let stmt = Statement::from_sql_and_values(
            self.conn.get_database_backend(),
            &format!("SELECT sha, data FROM hot_objects WHERE sha IN ({})", placeholders.join(", ")),
            misses.iter().map(|(_, sha)| sha.to_string().into()).collect::<Vec<_>>(),
        );
        let rows = self
            .conn
            .query_all(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;

        let mut found: std::collections::HashMap<ObjectHash, Vec<u8>> = std::collections::HashMap::with_capacity(rows.len());
        for row in rows {
            let sha_hex: String = row.try_get("", "sha").map_err(|e| StoreError::Backend(e.to_string()))?;
            let data: Vec<u8> = row.try_get("", "data").map_err(|e| StoreError::Backend(e.to_string()))?;
            if let Ok(sha) = sha_hex.parse::<ObjectHash>() {
                found.insert(sha, data);
            }
        }

        let mut remaining = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            for (i, sha) in misses {
                if let Some(data) = found.get(&sha).cloned() {
                    cache.insert(sha, data.clone());
                    out[i] = Some(data);
                } else {
                    remaining.push((i, sha));
                }
            }
        }

        for (i, sha) in remaining {
            out[i] = self.get(sha).await?;
        }
        Ok(out)
    }

    pub async fn has(&self, sha: ObjectHash) -> Result<bool, StoreError> {
        Ok(self.tier_of(sha).await?.is_some())
    }

    pub async fn get_type(&self, sha: ObjectHash) -> Result<Option<ObjectType>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.conn.get_database_backend(),
            "SELECT type FROM objects WHERE sha = $1",
            [sha.to_string().into()],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        match row {
            Some(r) => {
                let t: String = r.try_get("", "type").map_err(|e| StoreError::Backend(e.to_string()))?;
                ObjectType::from_string(&t).map(Some).map_err(|e| StoreError::Backend(e.to_string()))
            }
            None => Ok(None),
        }
    }

    pub async fn get_size(&self, sha: ObjectHash) -> Result<Option<usize>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.conn.get_database_backend(),
            "SELECT size FROM objects WHERE sha = $1",
            [sha.to_string().into()],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        match row {
            Some(r) => {
                let size: i64 = r.try_get("", "size").map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some(size as usize))
            }
            None => Ok(None),
        }
    }

    /// Deletes an object, returning `false` if it wasn't present. The WAL
    /// delete entry is appended before the tier and index rows are removed
    /// (spec §4.4 WAL ordering).
    pub async fn delete(&self, sha: ObjectHash) -> Result<bool, StoreError> {
        let tier = match self.tier_of(sha).await? {
            Some(tier) => tier,
            None => return Ok(false),
        };
        self.wal.append("delete", sha.to_string().as_bytes(), None).await?;

        self.migrator.delete_tier(tier, sha).await?;
        for table in ["object_index", "objects"] {
            let stmt = Statement::from_sql_and_values(
                self.conn.get_database_backend(),
                &format!("DELETE FROM {table} WHERE sha = $1"),
                [sha.to_string().into()],
            );
            self.conn
                .execute(stmt)
                .await
                .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        }
        self.cache.lock().await.remove(&sha);
        Ok(true)
    }

    /// Re-reads the raw stored bytes directly from their tier, bypassing the
    /// cache, and confirms they still hash to `sha` under Git framing (spec
    /// §4.3 `verify`).
    pub async fn verify(&self, sha: ObjectHash) -> Result<bool, StoreError> {
        let object_type = self.get_type(sha).await?.ok_or_else(|| StoreError::NotFound(sha.to_string()))?;
        let tier = self.tier_of(sha).await?.ok_or_else(|| StoreError::NotFound(sha.to_string()))?;
        let data = self
            .migrator
            .read_tier(tier, sha)
            .await?
            .ok_or_else(|| StoreError::NotFound(sha.to_string()))?;
        Ok(ObjectHash::from_type_and_data(object_type, &data) == sha)
    }

    async fn get_typed<T: ObjectTrait>(&self, sha: ObjectHash) -> Result<Option<T>, StoreError> {
        match self.get(sha).await? {
            Some(data) => T::from_bytes(&data, sha)
                .map(Some)
                .map_err(|_| StoreError::CorruptObject { sha: sha.to_string() }),
            None => Ok(None),
        }
    }

    pub async fn get_blob(&self, sha: ObjectHash) -> Result<Option<Blob>, StoreError> {
        self.get_typed(sha).await
    }

    pub async fn get_tree(&self, sha: ObjectHash) -> Result<Option<Tree>, StoreError> {
        self.get_typed(sha).await
    }

    pub async fn get_commit(&self, sha: ObjectHash) -> Result<Option<Commit>, StoreError> {
        self.get_typed(sha).await
    }

    pub async fn get_tag(&self, sha: ObjectHash) -> Result<Option<Tag>, StoreError> {
        self.get_typed(sha).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;

    async fn test_store() -> ObjectStore {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        ObjectStore::new(
            conn,
            Arc::new(InMemoryTierBlobStore::new()),
            StoreConfig::default(),
            MigrationConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = test_store().await;
        let sha = store.put(ObjectType::Blob, b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get(sha).await.unwrap(), Some(b"hello".to_vec()));
        assert!(store.has(sha).await.unwrap());
        assert_eq!(store.get_type(sha).await.unwrap(), Some(ObjectType::Blob));
        assert_eq!(store.get_size(sha).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn verify_detects_matching_hash() {
        let store = test_store().await;
        let sha = store.put(ObjectType::Blob, b"data".to_vec()).await.unwrap();
        assert!(store.verify(sha).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_object_and_index() {
        let store = test_store().await;
        let sha = store.put(ObjectType::Blob, b"gone".to_vec()).await.unwrap();
        assert!(store.delete(sha).await.unwrap());
        assert_eq!(store.get(sha).await.unwrap(), None);
        assert!(!store.has(sha).await.unwrap());
    }

    #[tokio::test]
    async fn delete_returns_false_for_missing_object() {
        let store = test_store().await;
        let sha = ObjectHash::new(b"never stored");
        assert!(!store.delete(sha).await.unwrap());
    }

    #[tokio::test]
    async fn get_many_batches_cache_misses() {
        let store = test_store().await;
        let a = store.put(ObjectType::Blob, b"a".to_vec()).await.unwrap();
        let b = store.put(ObjectType::Blob, b"b".to_vec()).await.unwrap();
        let missing = ObjectHash::new(b"never stored");
        let results = store.get_many(&[a, b, missing]).await.unwrap();
        assert_eq!(results, vec![Some(b"a".to_vec()), Some(b"b".to_vec()), None]);
    }

    #[tokio::test]
    async fn put_many_is_all_or_nothing_on_success() {
        let store = test_store().await;
        let shas = store
            .put_many(vec![(ObjectType::Blob, b"a".to_vec()), (ObjectType::Blob, b"b".to_vec())])
            .await
            .unwrap();
        assert_eq!(shas.len(), 2);
        for sha in shas {
            assert!(store.has(sha).await.unwrap());
        }
    }

    #[tokio::test]
    async fn get_blob_decodes_typed_object() {
        let store = test_store().await;
        let sha = store.put(ObjectType::Blob, b"typed".to_vec()).await.unwrap();
        let blob = store.get_blob(sha).await.unwrap().unwrap();
        assert_eq!(blob.data, b"typed".to_vec());
    }
}
