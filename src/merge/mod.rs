//! Three-way merge engine (spec §4.7). Content merge adapts `diff.rs`'s
//! Myers-algorithm line diffing (`similar::TextDiff`, already used there for
//! unified-diff hunks) to a three-way line merge instead of a two-way
//! unified diff; tree traversal mirrors `protocol/pack.rs`'s recursive tree
//! walk, generalized from object collection to building a flat path map.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};
use serde::{Deserialize, Serialize};
use similar::{DiffOp, TextDiff};
use tracing::debug;

use crate::errors::{GitError, MergeError, StoreError};
use crate::graph;
use crate::hash::ObjectHash;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::signature::Signature;
use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
use crate::internal::object::ObjectTrait;

/// Final disposition of a merge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    FastForward,
    Merged,
    Conflicted,
    UpToDate,
    Aborted,
    InProgress,
}

/// Which row of the per-path decision table a conflict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    ModifyDelete,
    DeleteModify,
    DirectoryFile,
    AddAdd,
    Content,
}

/// One overlapping, differing region inside a content conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictHunk {
    pub start_line: usize,
    pub end_line: usize,
    pub base_lines: Vec<String>,
    pub ours_lines: Vec<String>,
    pub theirs_lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
    pub base: Option<ObjectHash>,
    pub ours: Option<ObjectHash>,
    pub theirs: Option<ObjectHash>,
    pub hunks: Vec<ConflictHunk>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MergeStats {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub conflicted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoResolveStrategy {
    Ours,
    Theirs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOptions {
    pub fast_forward_only: bool,
    pub no_commit: bool,
    pub auto_resolve: Option<AutoResolveStrategy>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub status: MergeStatus,
    pub tree: Option<ObjectHash>,
    pub commit: Option<ObjectHash>,
    pub conflicts: Vec<Conflict>,
    pub stats: MergeStats,
}

impl MergeResult {
    fn up_to_date() -> Self {
        MergeResult {
            status: MergeStatus::UpToDate,
            tree: None,
            commit: None,
            conflicts: vec![],
            stats: MergeStats::default(),
        }
    }

    fn fast_forward(tree: ObjectHash, commit: ObjectHash) -> Self {
        MergeResult {
            status: MergeStatus::FastForward,
            tree: Some(tree),
            commit: Some(commit),
            conflicts: vec![],
            stats: MergeStats::default(),
        }
    }
}

/// Persisted merge-in-progress state (spec §4.7 step 9 / resolution API).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MergeState {
    merge_head: ObjectHash,
    orig_head: ObjectHash,
    options: MergeOptions,
    unresolved: Vec<Conflict>,
    resolved: Vec<Conflict>,
}

/// The narrow object read/write/merge-base seam the merge engine needs,
/// rather than the full storage API (spec §9 design note on capability
/// seams over a god-interface).
#[async_trait]
pub trait MergeObjectSource: Send + Sync {
    async fn get_commit(&self, sha: ObjectHash) -> Result<Option<Commit>, MergeError>;
    async fn get_tree(&self, sha: ObjectHash) -> Result<Option<Tree>, MergeError>;
    async fn get_blob(&self, sha: ObjectHash) -> Result<Option<Blob>, MergeError>;
    async fn put_blob(&self, data: Vec<u8>) -> Result<ObjectHash, MergeError>;
    async fn put_tree(&self, tree: Tree) -> Result<ObjectHash, MergeError>;
    async fn put_commit(&self, commit: Commit) -> Result<ObjectHash, MergeError>;
    async fn merge_base(&self, a: ObjectHash, b: ObjectHash) -> Result<Option<ObjectHash>, MergeError>;
}

#[async_trait]
impl MergeObjectSource for crate::store::ObjectStore {
    async fn get_commit(&self, sha: ObjectHash) -> Result<Option<Commit>, MergeError> {
        Ok(crate::store::ObjectStore::get_commit(self, sha).await?)
    }

    async fn get_tree(&self, sha: ObjectHash) -> Result<Option<Tree>, MergeError> {
        Ok(crate::store::ObjectStore::get_tree(self, sha).await?)
    }

    async fn get_blob(&self, sha: ObjectHash) -> Result<Option<Blob>, MergeError> {
        Ok(crate::store::ObjectStore::get_blob(self, sha).await?)
    }

    async fn put_blob(&self, data: Vec<u8>) -> Result<ObjectHash, MergeError> {
        Ok(self.put(crate::internal::object::types::ObjectType::Blob, data).await?)
    }

    async fn put_tree(&self, tree: Tree) -> Result<ObjectHash, MergeError> {
        let data = tree.to_data().map_err(MergeError::Object)?;
        Ok(self.put(crate::internal::object::types::ObjectType::Tree, data).await?)
    }

    async fn put_commit(&self, commit: Commit) -> Result<ObjectHash, MergeError> {
        let data = commit.to_data().map_err(MergeError::Object)?;
        self.put(crate::internal::object::types::ObjectType::Commit, data).await?;
        Ok(commit.id)
    }

    async fn merge_base(&self, a: ObjectHash, b: ObjectHash) -> Result<Option<ObjectHash>, MergeError> {
        graph::merge_base(self, a, b)
            .await
            .map_err(MergeError::Object)
    }
}

type LeafEntry = (TreeItemMode, ObjectHash);

/// Recursively walks a tree, emitting `path -> (mode, id)` for every leaf
/// (blob, symlink, or submodule gitlink) entry. `None` yields an empty map,
/// standing in for a history with no common base.
async fn flatten_tree(source: &dyn MergeObjectSource, tree_sha: Option<ObjectHash>) -> Result<BTreeMap<String, LeafEntry>, MergeError> {
    let mut out = BTreeMap::new();
    if let Some(sha) = tree_sha {
        flatten_tree_into(source, sha, "", &mut out).await?;
    }
    Ok(out)
}

fn flatten_tree_into<'a>(
    source: &'a dyn MergeObjectSource,
    tree_sha: ObjectHash,
    prefix: &'a str,
    out: &'a mut BTreeMap<String, LeafEntry>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), MergeError>> + Send + 'a>> {
    Box::pin(async move {
        let tree = source
            .get_tree(tree_sha)
            .await?
            .ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(tree_sha.to_string())))?;
        for item in &tree.tree_items {
            let path = if prefix.is_empty() {
                item.name.clone()
            } else {
                format!("{prefix}/{}", item.name)
            };
            if item.mode.is_tree() {
                flatten_tree_into(source, item.id, &path, out).await?;
            } else {
                out.insert(path, (item.mode, item.id));
            }
        }
        Ok(())
    })
}

fn is_directory_file_conflict(path: &str, other_map: &BTreeMap<String, LeafEntry>) -> bool {
    let prefix = format!("{path}/");
    other_map.keys().any(|p| p.starts_with(&prefix))
}

/// A file is binary if it has a NUL in its first 8000 bytes, or matches a
/// known magic number (spec §4.7 step 6).
fn is_binary(data: &[u8]) -> bool {
    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
    const GIF87_MAGIC: &[u8] = b"GIF87a";
    const GIF89_MAGIC: &[u8] = b"GIF89a";

    if data.starts_with(PNG_MAGIC) || data.starts_with(JPEG_MAGIC) || data.starts_with(GIF87_MAGIC) || data.starts_with(GIF89_MAGIC) {
        return true;
    }
    data[..data.len().min(8000)].contains(&0u8)
}

/// Splits on `\r\n` or `\n`, eliding a trailing empty line from a final
/// newline (spec §4.7 step 5).
fn split_lines(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut lines: Vec<String> = normalized.split('\n').map(|s| s.to_string()).collect();
    if lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

#[derive(Debug, Clone)]
struct LineHunk {
    base_start: usize,
    base_count: usize,
    lines: Vec<String>,
}

/// Diffs `base` against `other`, returning only the non-equal regions as
/// hunks anchored to base line numbers (the LCS-derived hunks of spec §4.7
/// step 5, via the same `similar::TextDiff` Myers implementation `diff.rs`
/// uses for unified diffs).
fn hunks_from_lines(base: &[String], other: &[String]) -> Vec<LineHunk> {
    let base_joined = base.join("\n");
    let other_joined = other.join("\n");
    let diff = TextDiff::from_lines(&base_joined, &other_joined);
    let mut hunks = Vec::new();
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete { old_index, old_len, .. } => {
                hunks.push(LineHunk {
                    base_start: old_index,
                    base_count: old_len,
                    lines: vec![],
                });
            }
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => {
                hunks.push(LineHunk {
                    base_start: old_index,
                    base_count: 0,
                    lines: other[new_index..new_index + new_len].to_vec(),
                });
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                hunks.push(LineHunk {
                    base_start: old_index,
                    base_count: old_len,
                    lines: other[new_index..new_index + new_len].to_vec(),
                });
            }
        }
    }
    hunks
}

struct Cluster {
    start: usize,
    end: usize,
    ours: Vec<LineHunk>,
    theirs: Vec<LineHunk>,
}

/// Groups ours/theirs hunks into clusters of overlapping or touching base
/// ranges, so each cluster can be judged disjoint/identical/conflicting as
/// one unit (spec §4.7 step 5, "walk the two hunk streams in base order").
fn cluster_hunks(ours: Vec<LineHunk>, theirs: Vec<LineHunk>) -> Vec<Cluster> {
    enum Side {
        Ours,
        Theirs,
    }
    let mut tagged: Vec<(Side, LineHunk)> = ours
        .into_iter()
        .map(|h| (Side::Ours, h))
        .chain(theirs.into_iter().map(|h| (Side::Theirs, h)))
        .collect();
    tagged.sort_by_key(|(_, h)| h.base_start);

    let mut clusters: Vec<Cluster> = Vec::new();
    for (side, hunk) in tagged {
        let start = hunk.base_start;
        let end = hunk.base_start + hunk.base_count;
        if let Some(last) = clusters.last_mut() {
            if start <= last.end {
                last.end = last.end.max(end);
                match side {
                    Side::Ours => last.ours.push(hunk),
                    Side::Theirs => last.theirs.push(hunk),
                }
                continue;
            }
        }
        let mut cluster = Cluster {
            start,
            end,
            ours: vec![],
            theirs: vec![],
        };
        match side {
            Side::Ours => cluster.ours.push(hunk),
            Side::Theirs => cluster.theirs.push(hunk),
        }
        clusters.push(cluster);
    }
    clusters
}

/// Reconstructs one side's lines for `base[start..end]` by applying that
/// side's hunks within the range and copying unchanged base lines between
/// them.
fn apply_side(base: &[String], start: usize, end: usize, hunks: &[LineHunk]) -> Vec<String> {
    let mut sorted = hunks.to_vec();
    sorted.sort_by_key(|h| h.base_start);
    let mut out = Vec::new();
    let mut cursor = start;
    for h in &sorted {
        if h.base_start > cursor {
            out.extend(base[cursor..h.base_start].iter().cloned());
        }
        out.extend(h.lines.iter().cloned());
        cursor = cursor.max(h.base_start + h.base_count);
    }
    if cursor < end {
        out.extend(base[cursor..end].iter().cloned());
    }
    out
}

/// Three-way line merge. Disjoint hunks apply directly; overlapping hunks
/// that resolve to identical text collapse to one; overlapping hunks that
/// differ emit a `<<<<<<< ours` / `=======` / `>>>>>>> theirs` conflict
/// block and a recorded `ConflictHunk`.
fn merge_lines(base: &[String], ours: &[String], theirs: &[String]) -> (Vec<String>, Vec<ConflictHunk>) {
    let ours_hunks = hunks_from_lines(base, ours);
    let theirs_hunks = hunks_from_lines(base, theirs);
    let clusters = cluster_hunks(ours_hunks, theirs_hunks);

    let mut merged = Vec::new();
    let mut conflicts = Vec::new();
    let mut cursor = 0;

    for cluster in &clusters {
        if cluster.start > cursor {
            merged.extend(base[cursor..cluster.start].iter().cloned());
        }
        let ours_lines = apply_side(base, cluster.start, cluster.end, &cluster.ours);
        let theirs_lines = apply_side(base, cluster.start, cluster.end, &cluster.theirs);

        if cluster.ours.is_empty() {
            merged.extend(theirs_lines);
        } else if cluster.theirs.is_empty() {
            merged.extend(ours_lines);
        } else if ours_lines == theirs_lines {
            merged.extend(ours_lines);
        } else {
            conflicts.push(ConflictHunk {
                start_line: cluster.start,
                end_line: cluster.end,
                base_lines: base[cluster.start.min(base.len())..cluster.end.min(base.len())].to_vec(),
                ours_lines: ours_lines.clone(),
                theirs_lines: theirs_lines.clone(),
            });
            merged.push("<<<<<<< ours".to_string());
            merged.extend(ours_lines);
            merged.push("=======".to_string());
            merged.extend(theirs_lines);
            merged.push(">>>>>>> theirs".to_string());
        }
        cursor = cluster.end;
    }
    if cursor < base.len() {
        merged.extend(base[cursor..].iter().cloned());
    }
    (merged, conflicts)
}

enum PathOutcome {
    Entry(LeafEntry),
    Deleted,
    Conflict(Conflict),
}

async fn content_merge(
    source: &dyn MergeObjectSource,
    path: &str,
    base: LeafEntry,
    ours: LeafEntry,
    theirs: LeafEntry,
) -> Result<PathOutcome, MergeError> {
    if ours.0 != theirs.0 {
        return Ok(PathOutcome::Conflict(Conflict {
            path: path.to_string(),
            kind: ConflictKind::Content,
            base: Some(base.1),
            ours: Some(ours.1),
            theirs: Some(theirs.1),
            hunks: vec![],
        }));
    }

    let base_blob = source.get_blob(base.1).await?.ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(base.1.to_string())))?;
    let ours_blob = source.get_blob(ours.1).await?.ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(ours.1.to_string())))?;
    let theirs_blob = source
        .get_blob(theirs.1)
        .await?
        .ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(theirs.1.to_string())))?;

    if is_binary(&base_blob.data) || is_binary(&ours_blob.data) || is_binary(&theirs_blob.data) {
        return Ok(PathOutcome::Conflict(Conflict {
            path: path.to_string(),
            kind: ConflictKind::Content,
            base: Some(base.1),
            ours: Some(ours.1),
            theirs: Some(theirs.1),
            hunks: vec![],
        }));
    }

    let base_text = String::from_utf8_lossy(&base_blob.data).into_owned();
    let ours_text = String::from_utf8_lossy(&ours_blob.data).into_owned();
    let theirs_text = String::from_utf8_lossy(&theirs_blob.data).into_owned();

    let (merged_lines, hunks) = merge_lines(&split_lines(&base_text), &split_lines(&ours_text), &split_lines(&theirs_text));

    if hunks.is_empty() {
        let merged_text = merged_lines.join("\n") + "\n";
        let sha = source.put_blob(merged_text.into_bytes()).await?;
        Ok(PathOutcome::Entry((ours.0, sha)))
    } else {
        Ok(PathOutcome::Conflict(Conflict {
            path: path.to_string(),
            kind: ConflictKind::Content,
            base: Some(base.1),
            ours: Some(ours.1),
            theirs: Some(theirs.1),
            hunks,
        }))
    }
}

/// Groups a flat path map back into a tree hierarchy and writes it bottom-up
/// (spec §4.7 step 8).
async fn build_tree(source: &dyn MergeObjectSource, entries: &BTreeMap<String, LeafEntry>) -> Result<ObjectHash, MergeError> {
    #[derive(Default)]
    struct Dir {
        files: Vec<(String, LeafEntry)>,
        subdirs: BTreeMap<String, Dir>,
    }

    let mut root = Dir::default();
    for (path, entry) in entries {
        let parts: Vec<&str> = path.split('/').collect();
        let mut cursor = &mut root;
        for part in &parts[..parts.len() - 1] {
            cursor = cursor.subdirs.entry(part.to_string()).or_default();
        }
        cursor.files.push((parts[parts.len() - 1].to_string(), *entry));
    }

    fn write_dir<'a>(source: &'a dyn MergeObjectSource, dir: Dir) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ObjectHash, MergeError>> + Send + 'a>> {
        Box::pin(async move {
            let mut items = Vec::new();
            for (name, (mode, id)) in dir.files {
                items.push(TreeItem::new(mode, id, name));
            }
            for (name, subdir) in dir.subdirs {
                let sha = write_dir(source, subdir).await?;
                items.push(TreeItem::new(TreeItemMode::Tree, sha, name));
            }
            let tree = Tree::from_tree_items(items).map_err(MergeError::Object)?;
            source.put_tree(tree).await
        })
    }

    write_dir(source, root).await
}

/// Runs the three-way merge algorithm of spec §4.7 end to end.
pub async fn merge_commits(source: &dyn MergeObjectSource, ours: ObjectHash, theirs: ObjectHash, options: &MergeOptions) -> Result<MergeResult, MergeError> {
    if ours == theirs {
        return Ok(MergeResult::up_to_date());
    }

    let base_sha = source.merge_base(ours, theirs).await?;

    if base_sha == Some(theirs) {
        return Ok(MergeResult::up_to_date());
    }
    if base_sha == Some(ours) {
        let theirs_commit = source
            .get_commit(theirs)
            .await?
            .ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(theirs.to_string())))?;
        return Ok(MergeResult::fast_forward(theirs_commit.tree_id, theirs));
    }
    if options.fast_forward_only {
        return Err(MergeError::NotFastForwardable {
            ours: ours.to_string(),
            theirs: theirs.to_string(),
        });
    }

    let ours_commit = source
        .get_commit(ours)
        .await?
        .ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(ours.to_string())))?;
    let theirs_commit = source
        .get_commit(theirs)
        .await?
        .ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(theirs.to_string())))?;
    let base_tree_sha = match base_sha {
        Some(b) => Some(
            source
                .get_commit(b)
                .await?
                .ok_or_else(|| MergeError::Object(GitError::ObjectNotFound(b.to_string())))?
                .tree_id,
        ),
        None => None,
    };

    let base_map = flatten_tree(source, base_tree_sha).await?;
    let ours_map = flatten_tree(source, Some(ours_commit.tree_id)).await?;
    let theirs_map = flatten_tree(source, Some(theirs_commit.tree_id)).await?;

    let all_paths: BTreeSet<String> = base_map.keys().chain(ours_map.keys()).chain(theirs_map.keys()).cloned().collect();

    let mut merged_entries: BTreeMap<String, LeafEntry> = BTreeMap::new();
    let mut conflicts: Vec<Conflict> = Vec::new();
    let mut stats = MergeStats::default();

    for path in all_paths {
        let b = base_map.get(&path).copied();
        let o = ours_map.get(&path).copied();
        let t = theirs_map.get(&path).copied();

        if o.is_some() && is_directory_file_conflict(&path, &theirs_map) {
            conflicts.push(Conflict {
                path: path.clone(),
                kind: ConflictKind::DirectoryFile,
                base: b.map(|e| e.1),
                ours: o.map(|e| e.1),
                theirs: None,
                hunks: vec![],
            });
            stats.conflicted += 1;
            continue;
        }
        if t.is_some() && is_directory_file_conflict(&path, &ours_map) {
            conflicts.push(Conflict {
                path: path.clone(),
                kind: ConflictKind::DirectoryFile,
                base: b.map(|e| e.1),
                ours: None,
                theirs: t.map(|e| e.1),
                hunks: vec![],
            });
            stats.conflicted += 1;
            continue;
        }

        match (b, o, t) {
            (_, Some(oe), Some(te)) if oe == te => {
                if b != Some(oe) {
                    stats.modified += 1;
                }
                merged_entries.insert(path, oe);
            }
            (None, Some(oe), None) => {
                stats.added += 1;
                merged_entries.insert(path, oe);
            }
            (None, None, Some(te)) => {
                stats.added += 1;
                merged_entries.insert(path, te);
            }
            (Some(be), Some(oe), None) => {
                if oe == be {
                    stats.deleted += 1;
                } else {
                    conflicts.push(Conflict {
                        path: path.clone(),
                        kind: ConflictKind::ModifyDelete,
                        base: Some(be.1),
                        ours: Some(oe.1),
                        theirs: None,
                        hunks: vec![],
                    });
                    stats.conflicted += 1;
                }
            }
            (Some(be), None, Some(te)) => {
                if te == be {
                    stats.deleted += 1;
                } else {
                    conflicts.push(Conflict {
                        path: path.clone(),
                        kind: ConflictKind::DeleteModify,
                        base: Some(be.1),
                        ours: None,
                        theirs: Some(te.1),
                        hunks: vec![],
                    });
                    stats.conflicted += 1;
                }
            }
            (None, Some(_), Some(_)) => {
                conflicts.push(Conflict {
                    path: path.clone(),
                    kind: ConflictKind::AddAdd,
                    base: None,
                    ours: o.map(|e| e.1),
                    theirs: t.map(|e| e.1),
                    hunks: vec![],
                });
                stats.conflicted += 1;
            }
            (Some(be), Some(oe), Some(te)) => {
                if oe == be {
                    stats.modified += 1;
                    merged_entries.insert(path, te);
                } else if te == be {
                    stats.modified += 1;
                    merged_entries.insert(path, oe);
                } else {
                    match content_merge(source, &path, (be.0, be.1), oe, te).await? {
                        PathOutcome::Entry(entry) => {
                            stats.modified += 1;
                            merged_entries.insert(path, entry);
                        }
                        PathOutcome::Deleted => {
                            stats.deleted += 1;
                        }
                        PathOutcome::Conflict(conflict) => {
                            stats.conflicted += 1;
                            conflicts.push(conflict);
                        }
                    }
                }
            }
            (None, None, None) => {}
        }
    }

    if let Some(strategy) = options.auto_resolve {
        for conflict in conflicts.drain(..).collect::<Vec<_>>() {
            let winner = match strategy {
                AutoResolveStrategy::Ours => conflict.ours,
                AutoResolveStrategy::Theirs => conflict.theirs,
            };
            if let Some(sha) = winner {
                let mode = if let Some(o) = ours_map.get(&conflict.path) {
                    o.0
                } else if let Some(t) = theirs_map.get(&conflict.path) {
                    t.0
                } else {
                    TreeItemMode::Blob
                };
                merged_entries.insert(conflict.path.clone(), (mode, sha));
            } else {
                merged_entries.remove(&conflict.path);
            }
        }
        stats.conflicted = 0;
    }

    if !conflicts.is_empty() {
        debug!(conflicts = conflicts.len(), "merge produced conflicts");
        return Ok(MergeResult {
            status: MergeStatus::Conflicted,
            tree: None,
            commit: None,
            conflicts,
            stats,
        });
    }

    let tree_sha = build_tree(source, &merged_entries).await?;

    if options.no_commit {
        return Ok(MergeResult {
            status: MergeStatus::Merged,
            tree: Some(tree_sha),
            commit: None,
            conflicts: vec![],
            stats,
        });
    }

    let commit = Commit::new(options.author.clone(), options.committer.clone(), tree_sha, vec![ours, theirs], &options.message);
    let commit_sha = source.put_commit(commit).await?;

    Ok(MergeResult {
        status: MergeStatus::Merged,
        tree: Some(tree_sha),
        commit: Some(commit_sha),
        conflicts: vec![],
        stats,
    })
}

/// How a conflict should be settled via the resolution API.
#[derive(Debug, Clone)]
pub enum Resolution {
    Ours,
    Theirs,
    Base,
    Custom { content: Vec<u8>, mode: TreeItemMode },
}

/// Persists and mutates an in-progress merge's state in the `merge_state`
/// table (singleton row, since one merge is in progress per repository at
/// a time).
pub struct MergeStateStore {
    conn: DatabaseConnection,
}

impl MergeStateStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        MergeStateStore { conn }
    }

    fn backend(&self) -> sea_orm::DatabaseBackend {
        self.conn.get_database_backend()
    }

    async fn save(&self, state: &MergeState) -> Result<(), MergeError> {
        let now = Utc::now().timestamp();
        let options_json = serde_json::to_string(&state.options).map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;
        let unresolved_json = serde_json::to_string(&state.unresolved).map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;
        let resolved_json = serde_json::to_string(&state.resolved).map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;

        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "INSERT INTO merge_state (id, merge_head, orig_head, options, unresolved, resolved, created_at)
             VALUES (1, $1, $2, $3, $4, $5, $6)
             ON CONFLICT(id) DO UPDATE SET merge_head = excluded.merge_head, orig_head = excluded.orig_head,
                options = excluded.options, unresolved = excluded.unresolved, resolved = excluded.resolved",
            [
                state.merge_head.to_string().into(),
                state.orig_head.to_string().into(),
                options_json.into(),
                unresolved_json.into(),
                resolved_json.into(),
                now.into(),
            ],
        );
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| MergeError::Store(StoreError::Backend(e.to_string())))?;
        Ok(())
    }

    /// Begins tracking a conflicted merge so `resolve_conflict`/`abort_merge`/
    /// `continue_merge` have something to act on.
    pub async fn begin(&self, merge_head: ObjectHash, orig_head: ObjectHash, options: MergeOptions, unresolved: Vec<Conflict>) -> Result<(), MergeError> {
        self.save(&MergeState {
            merge_head,
            orig_head,
            options,
            unresolved,
            resolved: vec![],
        })
        .await
    }

    async fn load(&self) -> Result<Option<MergeState>, MergeError> {
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            "SELECT merge_head, orig_head, options, unresolved, resolved FROM merge_state WHERE id = 1",
            [],
        );
        let row = self
            .conn
            .query_one(stmt)
            .await
            .map_err(|e: DbErr| MergeError::Store(StoreError::Backend(e.to_string())))?;
        let Some(row) = row else { return Ok(None) };

        let merge_head: String = row.try_get("", "merge_head").map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;
        let orig_head: String = row.try_get("", "orig_head").map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;
        let options_json: String = row.try_get("", "options").map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;
        let unresolved_json: String = row.try_get("", "unresolved").map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;
        let resolved_json: String = row.try_get("", "resolved").map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?;

        Ok(Some(MergeState {
            merge_head: merge_head.parse().map_err(|e: String| MergeError::Store(StoreError::Backend(e)))?,
            orig_head: orig_head.parse().map_err(|e: String| MergeError::Store(StoreError::Backend(e)))?,
            options: serde_json::from_str(&options_json).map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?,
            unresolved: serde_json::from_str(&unresolved_json).map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?,
            resolved: serde_json::from_str(&resolved_json).map_err(|e| MergeError::Store(StoreError::Backend(e.to_string())))?,
        }))
    }

    async fn clear(&self) -> Result<(), MergeError> {
        let stmt = Statement::from_sql_and_values(self.backend(), "DELETE FROM merge_state WHERE id = 1", []);
        self.conn
            .execute(stmt)
            .await
            .map_err(|e: DbErr| MergeError::Store(StoreError::Backend(e.to_string())))?;
        Ok(())
    }

    /// Stages the chosen resolution for `path` at stage 0 and moves it from
    /// the unresolved list to the resolved list.
    pub async fn resolve_conflict(&self, source: &dyn MergeObjectSource, path: &str, resolution: Resolution) -> Result<(), MergeError> {
        let mut state = self.load().await?.ok_or(MergeError::NoMergeInProgress)?;
        let idx = state
            .unresolved
            .iter()
            .position(|c| c.path == path)
            .ok_or_else(|| MergeError::Store(StoreError::NotFound(path.to_string())))?;
        let mut conflict = state.unresolved.remove(idx);

        let resolved_sha = match resolution {
            Resolution::Ours => conflict.ours,
            Resolution::Theirs => conflict.theirs,
            Resolution::Base => conflict.base,
            Resolution::Custom { content, .. } => Some(source.put_blob(content).await?),
        };
        conflict.hunks.clear();
        if let Some(sha) = resolved_sha {
            conflict.ours = Some(sha);
        }
        state.resolved.push(conflict);
        self.save(&state).await
    }

    /// Restores `HEAD` to `orig_head` (caller applies the ref update) and
    /// drops the merge state.
    pub async fn abort_merge(&self) -> Result<ObjectHash, MergeError> {
        let state = self.load().await?.ok_or(MergeError::NoMergeInProgress)?;
        self.clear().await?;
        Ok(state.orig_head)
    }

    /// Requires zero unresolved conflicts, then produces the merge commit
    /// from the resolved entries and the merge's original two parents.
    pub async fn continue_merge(&self, source: &dyn MergeObjectSource, ours: ObjectHash, merged_entries: BTreeMap<String, LeafEntry>, message: Option<String>) -> Result<ObjectHash, MergeError> {
        let state = self.load().await?.ok_or(MergeError::NoMergeInProgress)?;
        if !state.unresolved.is_empty() {
            return Err(MergeError::UnresolvedConflicts(state.unresolved.len()));
        }
        let tree_sha = build_tree(source, &merged_entries).await?;
        let message = message.unwrap_or(state.options.message.clone());
        let commit = Commit::new(state.options.author.clone(), state.options.committer.clone(), tree_sha, vec![ours, state.merge_head], &message);
        let commit_sha = source.put_commit(commit).await?;
        self.clear().await?;
        Ok(commit_sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::signature::SignatureType;
    use crate::internal::object::types::ObjectType;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        commits: Mutex<HashMap<ObjectHash, Commit>>,
        trees: Mutex<HashMap<ObjectHash, Tree>>,
        blobs: Mutex<HashMap<ObjectHash, Blob>>,
    }

    impl FakeSource {
        fn add_blob(&self, content: &str) -> ObjectHash {
            let data = content.as_bytes().to_vec();
            let sha = ObjectHash::from_type_and_data(ObjectType::Blob, &data);
            self.blobs.lock().unwrap().insert(sha, Blob { id: sha, data });
            sha
        }

        fn add_tree(&self, items: Vec<TreeItem>) -> ObjectHash {
            let tree = Tree::from_tree_items(items).unwrap();
            let sha = tree.id;
            self.trees.lock().unwrap().insert(sha, tree);
            sha
        }

        fn add_commit(&self, tree: ObjectHash, parents: Vec<ObjectHash>) -> ObjectHash {
            let sig = Signature::new(SignatureType::Author, "a".into(), "a@example.com".into());
            let committer = Signature::new(SignatureType::Committer, "a".into(), "a@example.com".into());
            let commit = Commit::new(sig, committer, tree, parents, "msg");
            let sha = commit.id;
            self.commits.lock().unwrap().insert(sha, commit);
            sha
        }
    }

    #[async_trait]
    impl MergeObjectSource for FakeSource {
        async fn get_commit(&self, sha: ObjectHash) -> Result<Option<Commit>, MergeError> {
            Ok(self.commits.lock().unwrap().get(&sha).cloned())
        }
        async fn get_tree(&self, sha: ObjectHash) -> Result<Option<Tree>, MergeError> {
            Ok(self.trees.lock().unwrap().get(&sha).cloned())
        }
        async fn get_blob(&self, sha: ObjectHash) -> Result<Option<Blob>, MergeError> {
            Ok(self.blobs.lock().unwrap().get(&sha).cloned())
        }
        async fn put_blob(&self, data: Vec<u8>) -> Result<ObjectHash, MergeError> {
            let sha = ObjectHash::from_type_and_data(ObjectType::Blob, &data);
            self.blobs.lock().unwrap().insert(sha, Blob { id: sha, data });
            Ok(sha)
        }
        async fn put_tree(&self, tree: Tree) -> Result<ObjectHash, MergeError> {
            let sha = tree.id;
            self.trees.lock().unwrap().insert(sha, tree);
            Ok(sha)
        }
        async fn put_commit(&self, commit: Commit) -> Result<ObjectHash, MergeError> {
            let sha = commit.id;
            self.commits.lock().unwrap().insert(sha, commit.clone());
            Ok(sha)
        }
        async fn merge_base(&self, a: ObjectHash, b: ObjectHash) -> Result<Option<ObjectHash>, MergeError> {
            graph::merge_base(self, a, b).await.map_err(MergeError::Object)
        }
    }

    #[async_trait]
    impl graph::CommitGraphSource for FakeSource {
        async fn parents(&self, sha: ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
            Ok(self.commits.lock().unwrap().get(&sha).map(|c| c.parent_commit_ids.clone()).unwrap_or_default())
        }
        async fn committer_timestamp(&self, sha: ObjectHash) -> Result<i64, GitError> {
            Ok(self.commits.lock().unwrap().get(&sha).map(|c| c.committer.timestamp).unwrap_or(0))
        }
    }

    fn opts() -> MergeOptions {
        MergeOptions {
            fast_forward_only: false,
            no_commit: false,
            auto_resolve: None,
            author: Signature::new(SignatureType::Author, "m".into(), "m@example.com".into()),
            committer: Signature::new(SignatureType::Committer, "m".into(), "m@example.com".into()),
            message: "Merge".into(),
        }
    }

    #[tokio::test]
    async fn identical_commits_are_up_to_date() {
        let src = FakeSource::default();
        let blob = src.add_blob("hello\n");
        let tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, blob, "a.txt".into())]);
        let commit = src.add_commit(tree, vec![]);
        let result = merge_commits(&src, commit, commit, &opts()).await.unwrap();
        assert_eq!(result.status, MergeStatus::UpToDate);
    }

    #[tokio::test]
    async fn fast_forward_when_base_equals_ours() {
        let src = FakeSource::default();
        let blob_a = src.add_blob("a\n");
        let blob_b = src.add_blob("b\n");
        let base_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, blob_a, "a.txt".into())]);
        let base = src.add_commit(base_tree, vec![]);
        let next_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, blob_b, "a.txt".into())]);
        let next = src.add_commit(next_tree, vec![base]);

        let result = merge_commits(&src, base, next, &opts()).await.unwrap();
        assert_eq!(result.status, MergeStatus::FastForward);
        assert_eq!(result.commit, Some(next));
    }

    #[tokio::test]
    async fn disjoint_edits_merge_cleanly() {
        let src = FakeSource::default();
        let base_blob = src.add_blob("a.txt content\n");
        let base_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, base_blob, "a.txt".into())]);
        let base = src.add_commit(base_tree, vec![]);

        let ours_blob = src.add_blob("a.txt content\n");
        let ours_tree = src.add_tree(vec![
            TreeItem::new(TreeItemMode::Blob, ours_blob, "a.txt".into()),
            TreeItem::new(TreeItemMode::Blob, src.add_blob("new from us\n"), "b.txt".into()),
        ]);
        let ours = src.add_commit(ours_tree, vec![base]);

        let theirs_blob = src.add_blob("a.txt content\n");
        let theirs_tree = src.add_tree(vec![
            TreeItem::new(TreeItemMode::Blob, theirs_blob, "a.txt".into()),
            TreeItem::new(TreeItemMode::Blob, src.add_blob("new from them\n"), "c.txt".into()),
        ]);
        let theirs = src.add_commit(theirs_tree, vec![base]);

        let result = merge_commits(&src, ours, theirs, &opts()).await.unwrap();
        assert_eq!(result.status, MergeStatus::Merged);
        assert_eq!(result.stats.added, 2);
        assert!(result.conflicts.is_empty());
    }

    #[tokio::test]
    async fn overlapping_edits_conflict() {
        let src = FakeSource::default();
        let base_blob = src.add_blob("line one\nline two\nline three\n");
        let base_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, base_blob, "a.txt".into())]);
        let base = src.add_commit(base_tree, vec![]);

        let ours_blob = src.add_blob("line one\nOURS CHANGE\nline three\n");
        let ours_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, ours_blob, "a.txt".into())]);
        let ours = src.add_commit(ours_tree, vec![base]);

        let theirs_blob = src.add_blob("line one\nTHEIRS CHANGE\nline three\n");
        let theirs_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, theirs_blob, "a.txt".into())]);
        let theirs = src.add_commit(theirs_tree, vec![base]);

        let result = merge_commits(&src, ours, theirs, &opts()).await.unwrap();
        assert_eq!(result.status, MergeStatus::Conflicted);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::Content);
    }

    #[tokio::test]
    async fn auto_resolve_ours_clears_conflicts() {
        let src = FakeSource::default();
        let base_blob = src.add_blob("line one\nline two\n");
        let base_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, base_blob, "a.txt".into())]);
        let base = src.add_commit(base_tree, vec![]);

        let ours_blob = src.add_blob("line one\nOURS\n");
        let ours_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, ours_blob, "a.txt".into())]);
        let ours = src.add_commit(ours_tree, vec![base]);

        let theirs_blob = src.add_blob("line one\nTHEIRS\n");
        let theirs_tree = src.add_tree(vec![TreeItem::new(TreeItemMode::Blob, theirs_blob, "a.txt".into())]);
        let theirs = src.add_commit(theirs_tree, vec![base]);

        let mut options = opts();
        options.auto_resolve = Some(AutoResolveStrategy::Ours);
        let result = merge_commits(&src, ours, theirs, &options).await.unwrap();
        assert_eq!(result.status, MergeStatus::Merged);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn binary_detection_catches_png_magic() {
        let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend([0u8; 10]);
        assert!(is_binary(&data));
        assert!(!is_binary(b"plain text content"));
    }
}
