//! Commit-graph operations (spec §4.8): BFS traversal, merge-base, ancestry,
//! and fork-point, all built over a narrow "give me a commit's parents"
//! capability rather than a full repository interface, mirroring
//! `protocol/pack.rs`'s `collect_all_objects` BFS (`VecDeque` queue plus a
//! `HashSet` visited-set) generalized from object collection to
//! parent-only commit traversal.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;

use crate::errors::GitError;
use crate::hash::ObjectHash;

/// How `walk_commits` should order the SHAs it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    /// No child emitted before any of its parents.
    Topological,
    /// Committer timestamp, descending.
    Date,
    /// BFS discovery order, no further sorting.
    Default,
}

/// The only capability the commit-graph operations need: parent edges and
/// committer timestamps, so callers can plug in an `ObjectStore` or a test
/// double without pulling in the rest of the storage API.
#[async_trait]
pub trait CommitGraphSource: Send + Sync {
    async fn parents(&self, sha: ObjectHash) -> Result<Vec<ObjectHash>, GitError>;
    async fn committer_timestamp(&self, sha: ObjectHash) -> Result<i64, GitError>;
}

#[async_trait]
impl CommitGraphSource for crate::store::ObjectStore {
    async fn parents(&self, sha: ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
        let commit = self
            .get_commit(sha)
            .await
            .map_err(|e| GitError::CustomError(e.to_string()))?
            .ok_or_else(|| GitError::ObjectNotFound(sha.to_string()))?;
        Ok(commit.parent_commit_ids)
    }

    async fn committer_timestamp(&self, sha: ObjectHash) -> Result<i64, GitError> {
        let commit = self
            .get_commit(sha)
            .await
            .map_err(|e| GitError::CustomError(e.to_string()))?
            .ok_or_else(|| GitError::ObjectNotFound(sha.to_string()))?;
        Ok(commit.committer.timestamp)
    }
}

/// A parsed revision range (`A..B`, `A...B`, or a single SHA) reduced to its
/// include/exclude sets.
#[derive(Debug, Clone)]
pub struct RevisionRange {
    pub include: Vec<ObjectHash>,
    pub exclude: Vec<ObjectHash>,
}

/// Parses `A..B` (commits reachable from B but not A), `A...B` (symmetric
/// difference), or a bare SHA (reachable from it, nothing excluded).
pub fn parse_revision_range(spec: &str) -> Result<RevisionRange, GitError> {
    if let Some((a, b)) = spec.split_once("...") {
        let a = parse_sha(a)?;
        let b = parse_sha(b)?;
        return Ok(RevisionRange {
            include: vec![a, b],
            exclude: vec![],
        });
    }
    if let Some((a, b)) = spec.split_once("..") {
        let a = parse_sha(a)?;
        let b = parse_sha(b)?;
        return Ok(RevisionRange {
            include: vec![b],
            exclude: vec![a],
        });
    }
    Ok(RevisionRange {
        include: vec![parse_sha(spec)?],
        exclude: vec![],
    })
}

fn parse_sha(s: &str) -> Result<ObjectHash, GitError> {
    s.trim()
        .parse::<ObjectHash>()
        .map_err(|e| GitError::InvalidHashValue(format!("{s}: {e}")))
}

/// BFS from `roots` following parent edges, emitting each SHA at most once.
pub async fn walk_commits(
    source: &dyn CommitGraphSource,
    roots: &[ObjectHash],
    exclude: &[ObjectHash],
    sort: SortStrategy,
) -> Result<Vec<ObjectHash>, GitError> {
    let excluded: HashSet<ObjectHash> = exclude.iter().copied().collect();
    let mut visited: HashSet<ObjectHash> = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = roots.iter().copied().collect();
    let mut order = Vec::new();
    let mut parents_of: HashMap<ObjectHash, Vec<ObjectHash>> = HashMap::new();

    while let Some(sha) = queue.pop_front() {
        if visited.contains(&sha) || excluded.contains(&sha) {
            continue;
        }
        visited.insert(sha);
        order.push(sha);

        let parents = source.parents(sha).await?;
        for parent in &parents {
            if !visited.contains(parent) && !excluded.contains(parent) {
                queue.push_back(*parent);
            }
        }
        parents_of.insert(sha, parents);
    }

    match sort {
        SortStrategy::Default => Ok(order),
        SortStrategy::Date => sort_by_date(source, order).await,
        SortStrategy::Topological => Ok(topological_sort(order, &parents_of)),
    }
}

async fn sort_by_date(source: &dyn CommitGraphSource, shas: Vec<ObjectHash>) -> Result<Vec<ObjectHash>, GitError> {
    let mut dated = Vec::with_capacity(shas.len());
    for sha in shas {
        let ts = source.committer_timestamp(sha).await?;
        dated.push((ts, sha));
    }
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(dated.into_iter().map(|(_, sha)| sha).collect())
}

/// Kahn's algorithm restricted to the visited set: no child before its
/// parents, ties broken by BFS discovery order.
fn topological_sort(visited_order: Vec<ObjectHash>, parents_of: &HashMap<ObjectHash, Vec<ObjectHash>>) -> Vec<ObjectHash> {
    let visited: HashSet<ObjectHash> = visited_order.iter().copied().collect();
    let mut children_remaining: HashMap<ObjectHash, usize> =
        visited_order.iter().map(|sha| (*sha, 0usize)).collect();
    let mut children_of: HashMap<ObjectHash, Vec<ObjectHash>> = HashMap::new();

    for (&sha, parents) in parents_of {
        for &parent in parents {
            if visited.contains(&parent) {
                *children_remaining.get_mut(&sha).unwrap() += 1;
                children_of.entry(parent).or_default().push(sha);
            }
        }
    }

    let mut ready: VecDeque<ObjectHash> = visited_order
        .iter()
        .copied()
        .filter(|sha| children_remaining[sha] == 0)
        .collect();
    let mut out = Vec::with_capacity(visited_order.len());
    let mut remaining = children_remaining;

    while let Some(sha) = ready.pop_front() {
        out.push(sha);
        if let Some(children) = children_of.get(&sha) {
            for &child in children {
                let count = remaining.get_mut(&child).unwrap();
                *count -= 1;
                if *count == 0 {
                    ready.push_back(child);
                }
            }
        }
    }
    out
}

async fn ancestor_set(source: &dyn CommitGraphSource, start: ObjectHash) -> Result<HashSet<ObjectHash>, GitError> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(sha) = queue.pop_front() {
        if !visited.insert(sha) {
            continue;
        }
        for parent in source.parents(sha).await? {
            if !visited.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(visited)
}

/// The merge base of two commits: BFS each commit's ancestry, the first SHA
/// the second BFS finds already present in the first's ancestor set wins.
pub async fn merge_base(source: &dyn CommitGraphSource, a: ObjectHash, b: ObjectHash) -> Result<Option<ObjectHash>, GitError> {
    let ancestors_of_a = ancestor_set(source, a).await?;
    if ancestors_of_a.contains(&b) {
        return Ok(Some(b));
    }

    let mut visited_b = HashSet::new();
    let mut queue = VecDeque::from([b]);
    while let Some(sha) = queue.pop_front() {
        if !visited_b.insert(sha) {
            continue;
        }
        if ancestors_of_a.contains(&sha) {
            return Ok(Some(sha));
        }
        for parent in source.parents(sha).await? {
            if !visited_b.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(None)
}

/// Every maximal common ancestor of `a` and `b`: candidates that are
/// themselves ancestors of another candidate are dropped.
pub async fn find_all_merge_bases(source: &dyn CommitGraphSource, a: ObjectHash, b: ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
    let ancestors_of_a = ancestor_set(source, a).await?;
    let ancestors_of_b = ancestor_set(source, b).await?;
    let common: Vec<ObjectHash> = ancestors_of_a.intersection(&ancestors_of_b).copied().collect();

    let mut maximal = Vec::new();
    for &candidate in &common {
        let candidate_ancestors = ancestor_set(source, candidate).await?;
        let dominated = common
            .iter()
            .any(|&other| other != candidate && candidate_ancestors.contains(&other));
        if !dominated {
            maximal.push(candidate);
        }
    }
    Ok(maximal)
}

/// Iteratively folds `merge_base` across a list of commits (octopus merge).
pub async fn octopus_merge_base(source: &dyn CommitGraphSource, commits: &[ObjectHash]) -> Result<Option<ObjectHash>, GitError> {
    let mut iter = commits.iter().copied();
    let mut result = match iter.next() {
        Some(first) => first,
        None => return Ok(None),
    };
    for next in iter {
        match merge_base(source, result, next).await? {
            Some(base) => result = base,
            None => return Ok(None),
        }
    }
    Ok(Some(result))
}

/// `is_ancestor(a, b)` holds iff `merge_base(a, b) == a`.
pub async fn is_ancestor(source: &dyn CommitGraphSource, a: ObjectHash, b: ObjectHash) -> Result<bool, GitError> {
    Ok(merge_base(source, a, b).await? == Some(a))
}

/// The fork point of `a` relative to `b`'s history horizon: the first
/// ancestor of `a` that also appears in `b`'s ancestry.
pub async fn fork_point(source: &dyn CommitGraphSource, a: ObjectHash, b_horizon: &[ObjectHash]) -> Result<Option<ObjectHash>, GitError> {
    let mut horizon = HashSet::new();
    for &sha in b_horizon {
        horizon.extend(ancestor_set(source, sha).await?);
    }

    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([a]);
    while let Some(sha) = queue.pop_front() {
        if !visited.insert(sha) {
            continue;
        }
        if horizon.contains(&sha) {
            return Ok(Some(sha));
        }
        for parent in source.parents(sha).await? {
            if !visited.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    /// In-memory parent-edge graph for unit tests.
    #[derive(Default)]
    struct FakeGraph {
        parents: Mutex<StdHashMap<ObjectHash, Vec<ObjectHash>>>,
        timestamps: Mutex<StdHashMap<ObjectHash, i64>>,
    }

    impl FakeGraph {
        fn commit(&self, label: u8, parents: Vec<ObjectHash>, timestamp: i64) -> ObjectHash {
            let sha = ObjectHash::new(&[label]);
            self.parents.lock().unwrap().insert(sha, parents);
            self.timestamps.lock().unwrap().insert(sha, timestamp);
            sha
        }
    }

    #[async_trait]
    impl CommitGraphSource for FakeGraph {
        async fn parents(&self, sha: ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
            Ok(self.parents.lock().unwrap().get(&sha).cloned().unwrap_or_default())
        }

        async fn committer_timestamp(&self, sha: ObjectHash) -> Result<i64, GitError> {
            Ok(*self.timestamps.lock().unwrap().get(&sha).unwrap_or(&0))
        }
    }

    // root -> a -> b -> c (linear)
    fn linear_graph() -> (FakeGraph, Vec<ObjectHash>) {
        let g = FakeGraph::default();
        let root = g.commit(1, vec![], 1);
        let a = g.commit(2, vec![root], 2);
        let b = g.commit(3, vec![a], 3);
        let c = g.commit(4, vec![b], 4);
        (g, vec![root, a, b, c])
    }

    #[tokio::test]
    async fn walk_commits_visits_each_sha_once() {
        let (g, shas) = linear_graph();
        let order = walk_commits(&g, &[shas[3]], &[], SortStrategy::Default).await.unwrap();
        assert_eq!(order.len(), 4);
    }

    #[tokio::test]
    async fn topological_sort_never_emits_child_before_parent() {
        let (g, shas) = linear_graph();
        let order = walk_commits(&g, &[shas[3]], &[], SortStrategy::Topological).await.unwrap();
        let position: StdHashMap<ObjectHash, usize> = order.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        for i in 0..shas.len() - 1 {
            assert!(position[&shas[i]] < position[&shas[i + 1]]);
        }
    }

    #[tokio::test]
    async fn merge_base_finds_common_ancestor_after_branch() {
        let g = FakeGraph::default();
        let root = g.commit(1, vec![], 1);
        let left = g.commit(2, vec![root], 2);
        let right = g.commit(3, vec![root], 3);
        let base = merge_base(&g, left, right).await.unwrap();
        assert_eq!(base, Some(root));
    }

    #[tokio::test]
    async fn is_ancestor_true_for_direct_lineage() {
        let (g, shas) = linear_graph();
        assert!(is_ancestor(&g, shas[0], shas[3]).await.unwrap());
        assert!(!is_ancestor(&g, shas[3], shas[0]).await.unwrap());
    }

    #[tokio::test]
    async fn octopus_merge_base_folds_across_three_commits() {
        let g = FakeGraph::default();
        let root = g.commit(1, vec![], 1);
        let a = g.commit(2, vec![root], 2);
        let b = g.commit(3, vec![root], 3);
        let c = g.commit(4, vec![root], 4);
        let base = octopus_merge_base(&g, &[a, b, c]).await.unwrap();
        assert_eq!(base, Some(root));
    }

    #[tokio::test]
    async fn parse_revision_range_handles_all_three_forms() {
        let a = format!("{:040x}", 1);
        let b = format!("{:040x}", 2);
        let dotdot = parse_revision_range(&format!("{a}..{b}")).unwrap();
        assert_eq!(dotdot.exclude.len(), 1);
        assert_eq!(dotdot.include.len(), 1);

        let dotdotdot = parse_revision_range(&format!("{a}...{b}")).unwrap();
        assert_eq!(dotdotdot.include.len(), 2);
        assert!(dotdotdot.exclude.is_empty());

        let single = parse_revision_range(&a).unwrap();
        assert_eq!(single.include.len(), 1);
        assert!(single.exclude.is_empty());
    }
}
