//! Write-ahead log over the `wal` table (spec §4.4 "WAL & transactions").
//! Every mutation is appended before it is applied to the durable object
//! tables, so a crash between the two leaves a replayable record rather than
//! silent loss; `flush` marks entries durable once the caller has applied
//! them, `recover` replays everything still unflushed.

use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::StoreError;

/// One durable WAL record.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub id: i64,
    pub operation: String,
    pub payload: Vec<u8>,
    pub created_at: i64,
    pub flushed: bool,
    pub transaction_id: Option<String>,
}

pub struct Wal {
    conn: DatabaseConnection,
}

impl Wal {
    pub fn new(conn: DatabaseConnection) -> Self {
        Wal { conn }
    }

    fn backend(&self) -> sea_orm::DatabaseBackend {
        self.conn.get_database_backend()
    }

    /// Appends an operation to the log, optionally tagged with a transaction
    /// id, and returns the new row's id.
    pub async fn append(
        &self,
        operation: &str,
        payload: &[u8],
        transaction_id: Option<&str>,
    ) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp();
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO wal (operation, payload, created_at, flushed, transaction_id) VALUES ($1, $2, $3, 0, $4)",
            [
                operation.into(),
                payload.to_vec().into(),
                now.into(),
                transaction_id.map(|s| s.to_string()).into(),
            ],
        );
        let result = self
            .conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::WalAppendFailed(e.to_string()))?;
        let id = result.last_insert_id() as i64;
        debug!(wal_id = id, operation, "wal append");
        Ok(id)
    }

    /// Marks a single entry as durably applied.
    pub async fn flush(&self, id: i64) -> Result<(), StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "UPDATE wal SET flushed = 1 WHERE id = $1",
            [id.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::WalAppendFailed(e.to_string()))?;
        Ok(())
    }

    /// Marks every entry belonging to a transaction as flushed in one call.
    pub async fn flush_transaction(&self, transaction_id: &str) -> Result<(), StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "UPDATE wal SET flushed = 1 WHERE transaction_id = $1",
            [transaction_id.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::WalAppendFailed(e.to_string()))?;
        Ok(())
    }

    /// Returns every entry not yet marked flushed, oldest first, for replay
    /// after a restart.
    pub async fn recover(&self) -> Result<Vec<WalEntry>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT id, operation, payload, created_at, flushed, transaction_id FROM wal WHERE flushed = 0 ORDER BY id ASC",
            [],
        );
        let rows = self
            .conn
            .query_all(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let flushed_raw: i32 = row
                .try_get("", "flushed")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            entries.push(WalEntry {
                id: row.try_get("", "id").map_err(|e| StoreError::Backend(e.to_string()))?,
                operation: row
                    .try_get("", "operation")
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
                payload: row
                    .try_get("", "payload")
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
                created_at: row
                    .try_get("", "created_at")
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
                flushed: flushed_raw != 0,
                transaction_id: row
                    .try_get("", "transaction_id")
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
            });
        }
        if !entries.is_empty() {
            warn!(count = entries.len(), "replaying unflushed wal entries");
        }
        Ok(entries)
    }

    pub async fn unflushed_count(&self) -> Result<u64, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT COUNT(*) AS c FROM wal WHERE flushed = 0",
            [],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::Backend("count query returned no row".into()))?;
        let count: i64 = row.try_get("", "c").map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count as u64)
    }

    /// Starts a transaction scope: subsequent `append` calls should pass the
    /// returned id so `commit_tx`/`rollback_tx` can act on the whole group.
    pub fn begin_tx(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Commits a transaction by flushing all of its entries.
    pub async fn commit_tx(&self, transaction_id: &str) -> Result<(), StoreError> {
        self.flush_transaction(transaction_id).await
    }

    /// Rolls back a transaction by deleting its unflushed entries. Entries
    /// already flushed (none, in normal use) are left untouched.
    pub async fn rollback_tx(&self, transaction_id: &str) -> Result<(), StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "DELETE FROM wal WHERE transaction_id = $1 AND flushed = 0",
            [transaction_id.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::InvalidTransaction(transaction_id.to_string(), e.to_string()))?;
        Ok(())
    }

    /// Records a checkpoint at the current max wal id, allowing entries
    /// before it to be truncated later.
    pub async fn create_checkpoint(&self, metadata: Option<&str>) -> Result<i64, StoreError> {
        let position_stmt =
            Statement::from_sql_and_values(self.backend(), "SELECT COALESCE(MAX(id), 0) AS m FROM wal", []);
        let row = self
            .conn
            .query_one(position_stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::Backend("checkpoint position query returned no row".into()))?;
        let position: i64 = row.try_get("", "m").map_err(|e| StoreError::Backend(e.to_string()))?;

        let now = Utc::now().timestamp();
        let insert = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO wal_checkpoints (wal_position, created_at, metadata) VALUES ($1, $2, $3)",
            [position.into(), now.into(), metadata.map(|s| s.to_string()).into()],
        );
        let result = self
            .conn
            .execute(insert)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(result.last_insert_id() as i64)
    }

    /// The wal id of the most recent checkpoint, or 0 if none exist yet.
    pub async fn last_checkpoint(&self) -> Result<i64, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT COALESCE(MAX(wal_position), 0) AS m FROM wal_checkpoints",
            [],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::Backend("last checkpoint query returned no row".into()))?;
        Ok(row.try_get("", "m").map_err(|e| StoreError::Backend(e.to_string()))?)
    }

    /// Deletes flushed entries at or before `wal_id`, typically the position
    /// of the most recent checkpoint.
    pub async fn truncate_before(&self, wal_id: i64) -> Result<u64, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "DELETE FROM wal WHERE id <= $1 AND flushed = 1",
            [wal_id.into()],
        );
        let result = self
            .conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;

    async fn test_wal() -> Wal {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        crate::store::schema::ensure_schema(&conn).await.unwrap();
        Wal::new(conn)
    }

    #[tokio::test]
    async fn append_and_recover_roundtrip() {
        let wal = test_wal().await;
        wal.append("put", b"payload-a", None).await.unwrap();
        let entries = wal.recover().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, b"payload-a");
        assert!(!entries[0].flushed);
    }

    #[tokio::test]
    async fn flush_removes_entry_from_recovery_set() {
        let wal = test_wal().await;
        let id = wal.append("put", b"x", None).await.unwrap();
        wal.flush(id).await.unwrap();
        assert!(wal.recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transaction_commit_flushes_all_members() {
        let wal = test_wal().await;
        let tx = wal.begin_tx();
        wal.append("put", b"a", Some(&tx)).await.unwrap();
        wal.append("put", b"b", Some(&tx)).await.unwrap();
        assert_eq!(wal.unflushed_count().await.unwrap(), 2);
        wal.commit_tx(&tx).await.unwrap();
        assert_eq!(wal.unflushed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transaction_rollback_discards_unflushed_members() {
        let wal = test_wal().await;
        let tx = wal.begin_tx();
        wal.append("put", b"a", Some(&tx)).await.unwrap();
        wal.rollback_tx(&tx).await.unwrap();
        assert_eq!(wal.unflushed_count().await.unwrap(), 0);
        assert!(wal.recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_tracks_last_position() {
        let wal = test_wal().await;
        let id = wal.append("put", b"a", None).await.unwrap();
        wal.flush(id).await.unwrap();
        let checkpoint_id = wal.create_checkpoint(Some("periodic")).await.unwrap();
        assert!(checkpoint_id > 0);
        assert_eq!(wal.last_checkpoint().await.unwrap(), id);
    }

    #[tokio::test]
    async fn truncate_before_drops_flushed_entries_only() {
        let wal = test_wal().await;
        let id1 = wal.append("put", b"a", None).await.unwrap();
        wal.append("put", b"b", None).await.unwrap();
        wal.flush(id1).await.unwrap();
        let removed = wal.truncate_before(id1).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(wal.unflushed_count().await.unwrap(), 1);
    }
}
