//! Pull-request workflow (spec §4.10): two relational tables
//! (`pull_requests`, `pull_request_reviews`), CRUD plus a merge operation
//! that delegates to [`crate::merge`]. Persistence follows the same raw
//! `sea_orm::Statement` idiom as [`crate::store::wal`] and [`crate::refs`]
//! rather than sea-orm's entity derive macros, since the teacher carries
//! the `sea-orm` dependency but never exercises its ORM layer itself.

use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::hash::ObjectHash;
use crate::merge::{self, MergeObjectSource, MergeOptions, MergeStatus};
use crate::refs::{RefKind, RefStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrStatus {
    Open,
    Draft,
    Closed,
    Merged,
}

impl PrStatus {
    fn as_str(self) -> &'static str {
        match self {
            PrStatus::Open => "open",
            PrStatus::Draft => "draft",
            PrStatus::Closed => "closed",
            PrStatus::Merged => "merged",
        }
    }

    fn from_str(s: &str) -> Result<PrStatus, StoreError> {
        match s {
            "open" => Ok(PrStatus::Open),
            "draft" => Ok(PrStatus::Draft),
            "closed" => Ok(PrStatus::Closed),
            "merged" => Ok(PrStatus::Merged),
            other => Err(StoreError::Backend(format!("unknown pull request status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMethod {
    Merge,
    Squash,
    FastForward,
}

impl MergeMethod {
    fn as_str(self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::FastForward => "fast-forward",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
}

impl ReviewState {
    fn as_str(self) -> &'static str {
        match self {
            ReviewState::Approved => "approved",
            ReviewState::ChangesRequested => "changes-requested",
            ReviewState::Commented => "commented",
            ReviewState::Dismissed => "dismissed",
        }
    }

    fn from_str(s: &str) -> Result<ReviewState, StoreError> {
        match s {
            "approved" => Ok(ReviewState::Approved),
            "changes-requested" => Ok(ReviewState::ChangesRequested),
            "commented" => Ok(ReviewState::Commented),
            "dismissed" => Ok(ReviewState::Dismissed),
            other => Err(StoreError::Backend(format!("unknown review state: {other}"))),
        }
    }
}

/// Aggregate review state per spec §4.10: latest review per reviewer,
/// changes-requested beats approved beats pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateReviewState {
    ChangesRequested,
    Approved,
    Pending,
}

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub status: PrStatus,
    pub source_branch: String,
    pub target_branch: String,
    pub author: String,
    pub labels: Vec<String>,
    pub source_sha: String,
    pub target_sha: String,
    pub merge_commit_sha: Option<String>,
    pub merge_method: Option<MergeMethod>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct Review {
    pub id: i64,
    pub pr_number: i64,
    pub reviewer: String,
    pub state: ReviewState,
    pub body: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PullRequestFilter {
    pub status: Option<PrStatus>,
    pub target_branch: Option<String>,
    pub source_branch: Option<String>,
    pub author: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

fn row_to_pr(row: &sea_orm::QueryResult) -> Result<PullRequest, StoreError> {
    let labels_json: String = row.try_get("", "labels").map_err(|e| StoreError::Backend(e.to_string()))?;
    let status_str: String = row.try_get("", "status").map_err(|e| StoreError::Backend(e.to_string()))?;
    let merge_method: Option<String> = row.try_get("", "merge_method").map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(PullRequest {
        number: row.try_get("", "number").map_err(|e| StoreError::Backend(e.to_string()))?,
        title: row.try_get("", "title").map_err(|e| StoreError::Backend(e.to_string()))?,
        body: row.try_get("", "body").map_err(|e| StoreError::Backend(e.to_string()))?,
        status: PrStatus::from_str(&status_str)?,
        source_branch: row.try_get("", "source_branch").map_err(|e| StoreError::Backend(e.to_string()))?,
        target_branch: row.try_get("", "target_branch").map_err(|e| StoreError::Backend(e.to_string()))?,
        author: row.try_get("", "author").map_err(|e| StoreError::Backend(e.to_string()))?,
        labels: serde_json::from_str(&labels_json).map_err(|e| StoreError::Backend(e.to_string()))?,
        source_sha: row.try_get("", "source_sha").map_err(|e| StoreError::Backend(e.to_string()))?,
        target_sha: row.try_get("", "target_sha").map_err(|e| StoreError::Backend(e.to_string()))?,
        merge_commit_sha: row.try_get("", "merge_commit_sha").map_err(|e| StoreError::Backend(e.to_string()))?,
        merge_method: merge_method.map(|m| match m.as_str() {
            "squash" => MergeMethod::Squash,
            "fast-forward" => MergeMethod::FastForward,
            _ => MergeMethod::Merge,
        }),
        created_at: row.try_get("", "created_at").map_err(|e| StoreError::Backend(e.to_string()))?,
        updated_at: row.try_get("", "updated_at").map_err(|e| StoreError::Backend(e.to_string()))?,
    })
}

fn row_to_review(row: &sea_orm::QueryResult) -> Result<Review, StoreError> {
    let state_str: String = row.try_get("", "state").map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(Review {
        id: row.try_get("", "id").map_err(|e| StoreError::Backend(e.to_string()))?,
        pr_number: row.try_get("", "pr_number").map_err(|e| StoreError::Backend(e.to_string()))?,
        reviewer: row.try_get("", "reviewer").map_err(|e| StoreError::Backend(e.to_string()))?,
        state: ReviewState::from_str(&state_str)?,
        body: row.try_get("", "body").map_err(|e| StoreError::Backend(e.to_string()))?,
        created_at: row.try_get("", "created_at").map_err(|e| StoreError::Backend(e.to_string()))?,
    })
}

pub struct PrStore {
    conn: DatabaseConnection,
}

impl PrStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        PrStore { conn }
    }

    fn backend(&self) -> sea_orm::DatabaseBackend {
        self.conn.get_database_backend()
    }

    pub async fn create(
        &self,
        title: &str,
        body: Option<&str>,
        source_branch: &str,
        target_branch: &str,
        author: &str,
        labels: &[String],
        source_sha: ObjectHash,
        target_sha: ObjectHash,
    ) -> Result<PullRequest, StoreError> {
        let now = Utc::now().timestamp();
        let labels_json = serde_json::to_string(labels).map_err(|e| StoreError::Backend(e.to_string()))?;
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO pull_requests
                (title, body, status, source_branch, target_branch, author, labels, source_sha, target_sha, created_at, updated_at)
             VALUES ($1, $2, 'open', $3, $4, $5, $6, $7, $8, $9, $9)",
            [
                title.into(),
                body.map(|s| s.to_string()).into(),
                source_branch.into(),
                target_branch.into(),
                author.into(),
                labels_json.into(),
                source_sha.to_string().into(),
                target_sha.to_string().into(),
                now.into(),
            ],
        );
        let result = self
            .conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        let number = result.last_insert_id() as i64;
        self.get(number)
            .await?
            .ok_or_else(|| StoreError::Backend("pull request row vanished immediately after insert".into()))
    }

    pub async fn get(&self, number: i64) -> Result<Option<PullRequest>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT * FROM pull_requests WHERE number = $1",
            [number.into()],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        row.as_ref().map(row_to_pr).transpose()
    }

    pub async fn list(&self, filter: &PullRequestFilter) -> Result<Vec<PullRequest>, StoreError> {
        let mut clauses = Vec::new();
        let mut values: Vec<sea_orm::Value> = Vec::new();

        if let Some(status) = filter.status {
            values.push(status.as_str().into());
            clauses.push(format!("status = ${}", values.len()));
        }
        if let Some(target) = &filter.target_branch {
            values.push(target.clone().into());
            clauses.push(format!("target_branch = ${}", values.len()));
        }
        if let Some(source) = &filter.source_branch {
            values.push(source.clone().into());
            clauses.push(format!("source_branch = ${}", values.len()));
        }
        if let Some(author) = &filter.author {
            values.push(author.clone().into());
            clauses.push(format!("author = ${}", values.len()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        values.push((limit as i64).into());
        let limit_idx = values.len();
        values.push((filter.offset as i64).into());
        let offset_idx = values.len();

        let sql = format!(
            "SELECT * FROM pull_requests {where_clause} ORDER BY number DESC LIMIT ${limit_idx} OFFSET ${offset_idx}"
        );
        let stmt = Statement::from_sql_and_values(self.backend(), sql, values);
        let rows = self
            .conn
            .query_all(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        rows.iter().map(row_to_pr).collect()
    }

    /// Updates open/closed/draft status directly. `merged` is reached only
    /// through [`PrStore::merge`].
    pub async fn update_status(&self, number: i64, status: PrStatus) -> Result<(), StoreError> {
        if status == PrStatus::Merged {
            return Err(StoreError::Backend("merged status is reached only via merge()".into()));
        }
        let now = Utc::now().timestamp();
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "UPDATE pull_requests SET status = $1, updated_at = $2 WHERE number = $3",
            [status.as_str().into(), now.into(), number.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Resolves the PR's branches to their current ref targets (not the
    /// SHAs snapshotted at creation), merges via [`crate::merge`], writes
    /// the target branch ref on success, and persists merge method/status.
    pub async fn merge(
        &self,
        number: i64,
        object_source: &dyn MergeObjectSource,
        refs: &RefStore,
        method: MergeMethod,
        options: &MergeOptions,
    ) -> Result<MergeStatus, StoreError> {
        let pr = self
            .get(number)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("pull request #{number}")))?;
        if pr.status == PrStatus::Merged {
            return Err(StoreError::Backend(format!("pull request #{number} is already merged")));
        }

        let source_sha = refs
            .resolve(&pr.source_branch)
            .await?
            .ok_or_else(|| StoreError::NotFound(pr.source_branch.clone()))?;
        let target_sha = refs
            .resolve(&pr.target_branch)
            .await?
            .ok_or_else(|| StoreError::NotFound(pr.target_branch.clone()))?;

        let mut merge_options = options.clone();
        if method == MergeMethod::FastForward {
            merge_options.fast_forward_only = true;
        }

        let result = merge::merge_commits(object_source, target_sha, source_sha, &merge_options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match result.status {
            MergeStatus::Conflicted => {
                return Err(StoreError::Backend(format!("pull request #{number} has unresolved conflicts")));
            }
            MergeStatus::UpToDate => {
                return Err(StoreError::Backend(format!("pull request #{number} source is already merged into target")));
            }
            _ => {}
        }

        let written_sha = result.commit.or(result.tree).ok_or_else(|| StoreError::Backend("merge produced neither a commit nor a tree".into()))?;
        let now = Utc::now().timestamp();
        refs.set(&pr.target_branch, &written_sha.to_string(), RefKind::Sha, now).await?;

        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "UPDATE pull_requests SET status = 'merged', merge_commit_sha = $1, merge_method = $2, updated_at = $3 WHERE number = $4",
            [written_sha.to_string().into(), method.as_str().into(), now.into(), number.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;

        Ok(result.status)
    }

    pub async fn add_review(&self, pr_number: i64, reviewer: &str, state: ReviewState, body: Option<&str>) -> Result<Review, StoreError> {
        let now = Utc::now().timestamp();
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO pull_request_reviews (pr_number, reviewer, state, body, created_at) VALUES ($1, $2, $3, $4, $5)",
            [pr_number.into(), reviewer.into(), state.as_str().into(), body.map(|s| s.to_string()).into(), now.into()],
        );
        let result = self
            .conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        let id = result.last_insert_id() as i64;
        let stmt = Statement::from_sql_and_values(self.backend(), "SELECT * FROM pull_request_reviews WHERE id = $1", [id.into()]);
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::Backend("review row vanished immediately after insert".into()))?;
        row_to_review(&row)
    }

    pub async fn list_reviews(&self, pr_number: i64) -> Result<Vec<Review>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT * FROM pull_request_reviews WHERE pr_number = $1 ORDER BY created_at ASC",
            [pr_number.into()],
        );
        let rows = self
            .conn
            .query_all(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        rows.iter().map(row_to_review).collect()
    }

    pub async fn dismiss_review(&self, review_id: i64) -> Result<(), StoreError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "UPDATE pull_request_reviews SET state = 'dismissed' WHERE id = $1",
            [review_id.into()],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Keeps only the latest review per reviewer, then applies spec §4.10's
    /// precedence: any changes-requested wins, else any approved, else
    /// pending.
    pub async fn aggregate_review_state(&self, pr_number: i64) -> Result<AggregateReviewState, StoreError> {
        let reviews = self.list_reviews(pr_number).await?;
        let mut latest: std::collections::HashMap<String, ReviewState> = std::collections::HashMap::new();
        for review in reviews {
            latest.insert(review.reviewer, review.state);
        }
        if latest.values().any(|s| *s == ReviewState::ChangesRequested) {
            Ok(AggregateReviewState::ChangesRequested)
        } else if latest.values().any(|s| *s == ReviewState::Approved) {
            Ok(AggregateReviewState::Approved)
        } else {
            Ok(AggregateReviewState::Pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;
    use sea_orm::Database;

    async fn test_store() -> PrStore {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        schema::ensure_schema(&conn).await.unwrap();
        PrStore::new(conn)
    }

    fn sha(byte: u8) -> ObjectHash {
        ObjectHash::new(&[byte; 4])
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = test_store().await;
        let pr = store
            .create("Add feature", Some("description"), "refs/heads/feature", "refs/heads/main", "alice", &["enhancement".to_string()], sha(1), sha(2))
            .await
            .unwrap();
        assert_eq!(pr.status, PrStatus::Open);
        let fetched = store.get(pr.number).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Add feature");
        assert_eq!(fetched.labels, vec!["enhancement".to_string()]);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_target() {
        let store = test_store().await;
        let pr1 = store.create("A", None, "refs/heads/a", "refs/heads/main", "alice", &[], sha(1), sha(2)).await.unwrap();
        store.create("B", None, "refs/heads/b", "refs/heads/dev", "bob", &[], sha(3), sha(4)).await.unwrap();
        store.update_status(pr1.number, PrStatus::Closed).await.unwrap();

        let open_on_main = store
            .list(&PullRequestFilter {
                status: Some(PrStatus::Open),
                target_branch: Some("refs/heads/main".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(open_on_main.is_empty());
    }

    #[tokio::test]
    async fn aggregate_review_state_prefers_changes_requested() {
        let store = test_store().await;
        let pr = store.create("A", None, "refs/heads/a", "refs/heads/main", "alice", &[], sha(1), sha(2)).await.unwrap();
        store.add_review(pr.number, "bob", ReviewState::Approved, None).await.unwrap();
        store.add_review(pr.number, "carol", ReviewState::ChangesRequested, None).await.unwrap();
        let aggregate = store.aggregate_review_state(pr.number).await.unwrap();
        assert_eq!(aggregate, AggregateReviewState::ChangesRequested);
    }

    #[tokio::test]
    async fn aggregate_review_state_keeps_only_latest_per_reviewer() {
        let store = test_store().await;
        let pr = store.create("A", None, "refs/heads/a", "refs/heads/main", "alice", &[], sha(1), sha(2)).await.unwrap();
        store.add_review(pr.number, "bob", ReviewState::ChangesRequested, None).await.unwrap();
        store.add_review(pr.number, "bob", ReviewState::Approved, None).await.unwrap();
        let aggregate = store.aggregate_review_state(pr.number).await.unwrap();
        assert_eq!(aggregate, AggregateReviewState::Approved);
    }
}
