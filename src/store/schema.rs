//! SQL schema bootstrap (spec §6 "Storage schema"). One `CREATE TABLE IF NOT
//! EXISTS` per required table plus the indexes spec §6 calls out, executed
//! through `sea_orm`'s connection rather than a separate migration tool —
//! this crate owns its own schema, it is not a general migration framework.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};

use crate::errors::StoreError;

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS objects (
        sha TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        size INTEGER NOT NULL,
        data BLOB,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_objects_type ON objects(type)",
    "CREATE TABLE IF NOT EXISTS object_index (
        sha TEXT PRIMARY KEY,
        tier TEXT NOT NULL,
        pack_id TEXT,
        offset INTEGER,
        size INTEGER NOT NULL,
        type TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_object_index_tier ON object_index(tier)",
    "CREATE INDEX IF NOT EXISTS idx_object_index_pack_id ON object_index(pack_id)",
    "CREATE TABLE IF NOT EXISTS hot_objects (
        sha TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        data BLOB NOT NULL,
        accessed_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_hot_objects_accessed_at ON hot_objects(accessed_at)",
    "CREATE TABLE IF NOT EXISTS wal (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        payload BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        flushed INTEGER NOT NULL DEFAULT 0,
        transaction_id TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_wal_flushed ON wal(flushed)",
    "CREATE TABLE IF NOT EXISTS wal_checkpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        wal_position INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        metadata TEXT
    )",
    "CREATE TABLE IF NOT EXISTS access_patterns (
        sha TEXT PRIMARY KEY,
        read_count INTEGER NOT NULL DEFAULT 0,
        write_count INTEGER NOT NULL DEFAULT 0,
        last_accessed_at INTEGER NOT NULL,
        access_frequency REAL NOT NULL DEFAULT 0,
        bytes_read INTEGER,
        latency_ms_total INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS migration_jobs (
        id TEXT PRIMARY KEY,
        sha TEXT NOT NULL,
        source_tier TEXT NOT NULL,
        target_tier TEXT NOT NULL,
        state TEXT NOT NULL,
        bytes_transferred INTEGER NOT NULL DEFAULT 0,
        bytes_total INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS refs (
        name TEXT PRIMARY KEY,
        target TEXT NOT NULL,
        type TEXT NOT NULL DEFAULT 'sha',
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pull_requests (
        number INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        body TEXT,
        status TEXT NOT NULL,
        source_branch TEXT NOT NULL,
        target_branch TEXT NOT NULL,
        author TEXT NOT NULL,
        labels TEXT NOT NULL DEFAULT '[]',
        source_sha TEXT NOT NULL,
        target_sha TEXT NOT NULL,
        merge_commit_sha TEXT,
        merge_method TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS merge_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        merge_head TEXT NOT NULL,
        orig_head TEXT NOT NULL,
        options TEXT NOT NULL,
        unresolved TEXT NOT NULL,
        resolved TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pull_request_reviews (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pr_number INTEGER NOT NULL,
        reviewer TEXT NOT NULL,
        state TEXT NOT NULL,
        body TEXT,
        created_at INTEGER NOT NULL
    )",
];

/// Idempotently creates every table and index the core requires. Safe to
/// call on every startup.
pub async fn ensure_schema(conn: &DatabaseConnection) -> Result<(), StoreError> {
    for stmt in STATEMENTS {
        conn.execute_unprepared(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
    }
    Ok(())
}
