//! Named references: `refs/heads/*`, `refs/tags/*`, `HEAD`. Storage-side
//! counterpart to `protocol::types::GitRef`/`RefCommand`, which carry refs
//! over the wire; this module is what actually persists them, last-writer-
//! wins, under the `refs` table of spec §6.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};

use crate::errors::StoreError;
use crate::hash::ObjectHash;

/// Whether a ref's target is a concrete SHA or another ref name (`HEAD`
/// pointing at `refs/heads/main`, say).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Sha,
    Symbolic,
}

impl RefKind {
    fn as_str(self) -> &'static str {
        match self {
            RefKind::Sha => "sha",
            RefKind::Symbolic => "symbolic",
        }
    }

    fn from_str(s: &str) -> RefKind {
        match s {
            "symbolic" => RefKind::Symbolic,
            _ => RefKind::Sha,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub name: String,
    pub target: String,
    pub kind: RefKind,
    pub updated_at: i64,
}

impl Ref {
    /// Resolves a `Sha`-kind ref's target to an `ObjectHash`. Callers on a
    /// `Symbolic` ref should follow `target` as a ref name instead.
    pub fn target_sha(&self) -> Result<Option<ObjectHash>, StoreError> {
        if self.kind != RefKind::Sha {
            return Ok(None);
        }
        self.target
            .parse()
            .map(Some)
            .map_err(|_| StoreError::CorruptObject { sha: self.target.clone() })
    }
}

/// Storage-backed ref table. One instance per repository, matching
/// `store::ObjectStore`'s "a repository instance owns its own store" model.
pub struct RefStore {
    conn: DatabaseConnection,
}

impl RefStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        RefStore { conn }
    }

    fn backend(&self) -> sea_orm::DatabaseBackend {
        self.conn.get_database_backend()
    }

    /// Creates or overwrites `name`'s target. Last-writer-wins: no
    /// compare-and-swap against the previous value.
    pub async fn set(&self, name: &str, target: &str, kind: RefKind, now: i64) -> Result<(), StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO refs (name, target, type, updated_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT(name) DO UPDATE SET target = excluded.target, type = excluded.type, updated_at = excluded.updated_at",
            [name.into(), target.into(), kind.as_str().into(), now.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Ref>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT name, target, type, updated_at FROM refs WHERE name = $1",
            [name.into()],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(Ref {
            name: row.try_get("", "name").map_err(|e| StoreError::Backend(e.to_string()))?,
            target: row.try_get("", "target").map_err(|e| StoreError::Backend(e.to_string()))?,
            kind: RefKind::from_str(&row.try_get::<String>("", "type").map_err(|e| StoreError::Backend(e.to_string()))?),
            updated_at: row.try_get("", "updated_at").map_err(|e| StoreError::Backend(e.to_string()))?,
        }))
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let stmt = Statement::from_sql_and_values(self.backend(), "DELETE FROM refs WHERE name = $1", [name.into()]);
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Lists refs under a prefix (e.g. `refs/heads/` for branches,
    /// `refs/tags/` for tags), sorted by name.
    pub async fn list(&self, prefix: &str) -> Result<Vec<Ref>, StoreError> {
        let like_pattern = format!("{prefix}%");
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT name, target, type, updated_at FROM refs WHERE name LIKE $1 ORDER BY name ASC",
            [like_pattern.into()],
        );
        let rows = self
            .conn
            .query_all(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(Ref {
                    name: row.try_get("", "name").map_err(|e| StoreError::Backend(e.to_string()))?,
                    target: row.try_get("", "target").map_err(|e| StoreError::Backend(e.to_string()))?,
                    kind: RefKind::from_str(&row.try_get::<String>("", "type").map_err(|e| StoreError::Backend(e.to_string()))?),
                    updated_at: row.try_get("", "updated_at").map_err(|e| StoreError::Backend(e.to_string()))?,
                })
            })
            .collect()
    }

    /// Follows `HEAD` (or any symbolic ref) to its final SHA target,
    /// bounded against cycles.
    pub async fn resolve(&self, name: &str) -> Result<Option<ObjectHash>, StoreError> {
        let mut current = name.to_string();
        for _ in 0..16 {
            let Some(r) = self.get(&current).await? else {
                return Ok(None);
            };
            match r.kind {
                RefKind::Sha => return r.target_sha(),
                RefKind::Symbolic => current = r.target,
            }
        }
        Err(StoreError::Backend(format!("ref resolution exceeded depth limit starting at {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;
    use sea_orm::Database;

    async fn test_refs() -> RefStore {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        schema::ensure_schema(&conn).await.unwrap();
        RefStore::new(conn)
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let refs = test_refs().await;
        let sha = "a".repeat(40);
        refs.set("refs/heads/main", &sha, RefKind::Sha, 100).await.unwrap();
        let r = refs.get("refs/heads/main").await.unwrap().unwrap();
        assert_eq!(r.target, sha);
        assert_eq!(r.kind, RefKind::Sha);
    }

    #[tokio::test]
    async fn set_is_last_writer_wins() {
        let refs = test_refs().await;
        let first = "a".repeat(40);
        let second = "b".repeat(40);
        refs.set("refs/heads/main", &first, RefKind::Sha, 100).await.unwrap();
        refs.set("refs/heads/main", &second, RefKind::Sha, 200).await.unwrap();
        let r = refs.get("refs/heads/main").await.unwrap().unwrap();
        assert_eq!(r.target, second);
        assert_eq!(r.updated_at, 200);
    }

    #[tokio::test]
    async fn head_resolves_through_symbolic_indirection() {
        let refs = test_refs().await;
        let sha = "c".repeat(40);
        refs.set("refs/heads/main", &sha, RefKind::Sha, 100).await.unwrap();
        refs.set("HEAD", "refs/heads/main", RefKind::Symbolic, 100).await.unwrap();
        let resolved = refs.resolve("HEAD").await.unwrap().unwrap();
        assert_eq!(resolved.to_string(), sha);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let refs = test_refs().await;
        refs.set("refs/heads/main", &"a".repeat(40), RefKind::Sha, 1).await.unwrap();
        refs.set("refs/heads/dev", &"b".repeat(40), RefKind::Sha, 2).await.unwrap();
        refs.set("refs/tags/v1", &"c".repeat(40), RefKind::Sha, 3).await.unwrap();
        let branches = refs.list("refs/heads/").await.unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].name, "refs/heads/dev");
    }

    #[tokio::test]
    async fn delete_removes_ref() {
        let refs = test_refs().await;
        refs.set("refs/heads/main", &"a".repeat(40), RefKind::Sha, 1).await.unwrap();
        refs.delete("refs/heads/main").await.unwrap();
        assert!(refs.get("refs/heads/main").await.unwrap().is_none());
    }
}
