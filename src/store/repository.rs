//! Adapts [`ObjectStore`] and [`crate::refs::RefStore`] to
//! `protocol::core::RepositoryAccess`, so the wire protocol in
//! `protocol/*` (kept from the teacher nearly verbatim) is backed by this
//! crate's own storage engine instead of an external implementer only.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::hash::ObjectHash;
use crate::internal::object::commit::Commit;
use crate::internal::object::tree::{Tree, TreeItemMode};
use crate::internal::object::types::ObjectType;
use crate::internal::object::ObjectTrait;
use crate::protocol::core::RepositoryAccess;
use crate::protocol::types::ProtocolError;
use crate::refs::{RefKind, RefStore};

use super::ObjectStore;

fn to_protocol_err<E: std::fmt::Display>(e: E) -> ProtocolError {
    ProtocolError::repository_error(e.to_string())
}

fn parse_sha(s: &str) -> Result<ObjectHash, ProtocolError> {
    ObjectHash::from_str(s).map_err(|e| ProtocolError::repository_error(format!("invalid hash {s}: {e}")))
}

/// One repository's storage seam, as `protocol::*` expects it. Cheap to
/// clone: both fields are `Arc`-backed handles onto the same connection.
#[derive(Clone)]
pub struct RepositoryHandle {
    store: Arc<ObjectStore>,
    refs: Arc<RefStore>,
}

impl RepositoryHandle {
    pub fn new(store: Arc<ObjectStore>, refs: Arc<RefStore>) -> Self {
        RepositoryHandle { store, refs }
    }

    /// Collects every tree/blob SHA reachable from `tree_sha`, for pack
    /// generation (mirrors `merge::flatten_tree`'s walk, but gathers every
    /// SHA touched rather than just leaf paths).
    async fn collect_tree_closure(&self, tree_sha: ObjectHash, out: &mut Vec<String>) -> Result<(), ProtocolError> {
        out.push(tree_sha.to_string());
        let tree: Tree = self
            .store
            .get_tree(tree_sha)
            .await
            .map_err(to_protocol_err)?
            .ok_or_else(|| ProtocolError::ObjectNotFound(tree_sha.to_string()))?;
        for item in &tree.tree_items {
            if item.mode.is_tree() {
                Box::pin(self.collect_tree_closure(item.id, out)).await?;
            } else if item.mode != TreeItemMode::Commit {
                out.push(item.id.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryAccess for RepositoryHandle {
    async fn get_repository_refs(&self) -> Result<Vec<(String, String)>, ProtocolError> {
        let mut out = Vec::new();
        for prefix in ["refs/heads/", "refs/tags/"] {
            let refs = self.refs.list(prefix).await.map_err(to_protocol_err)?;
            for r in refs {
                if let Ok(Some(sha)) = r.target_sha() {
                    out.push((r.name, sha.to_string()));
                }
            }
        }
        Ok(out)
    }

    async fn has_object(&self, object_hash: &str) -> Result<bool, ProtocolError> {
        let sha = parse_sha(object_hash)?;
        self.store.has(sha).await.map_err(to_protocol_err)
    }

    async fn get_object(&self, object_hash: &str) -> Result<Vec<u8>, ProtocolError> {
        let sha = parse_sha(object_hash)?;
        self.store
            .get(sha)
            .await
            .map_err(to_protocol_err)?
            .ok_or_else(|| ProtocolError::ObjectNotFound(object_hash.to_string()))
    }

    async fn store_pack_data(&self, pack_data: &[u8]) -> Result<(), ProtocolError> {
        // Reached only for objects outside `handle_pack_objects`'s typed
        // override below; this crate's object type tag isn't recoverable
        // from raw content bytes alone, so anything landing here is
        // stored as a blob.
        self.store
            .put(ObjectType::Blob, pack_data.to_vec())
            .await
            .map_err(to_protocol_err)?;
        Ok(())
    }

    async fn update_reference(&self, ref_name: &str, old_hash: Option<&str>, new_hash: &str) -> Result<(), ProtocolError> {
        if let Some(expected_old) = old_hash {
            if let Some(current) = self.refs.resolve(ref_name).await.map_err(to_protocol_err)? {
                if current.to_string() != expected_old && !ObjectHash::zero_str().eq(expected_old) {
                    return Err(ProtocolError::repository_error(format!(
                        "ref {ref_name} changed concurrently: expected {expected_old}, found {current}"
                    )));
                }
            }
        }
        let now = Utc::now().timestamp();
        self.refs.set(ref_name, new_hash, RefKind::Sha, now).await.map_err(to_protocol_err)
    }

    async fn get_objects_for_pack(&self, wants: &[String], haves: &[String]) -> Result<Vec<String>, ProtocolError> {
        let want_shas: Vec<ObjectHash> = wants.iter().map(|s| parse_sha(s)).collect::<Result<_, _>>()?;
        let have_shas: Vec<ObjectHash> = haves.iter().map(|s| parse_sha(s)).collect::<Result<_, _>>()?;

        let commits = crate::graph::walk_commits(self.store.as_ref(), &want_shas, &have_shas, crate::graph::SortStrategy::Default)
            .await
            .map_err(to_protocol_err)?;

        let mut out = Vec::new();
        for commit_sha in &commits {
            out.push(commit_sha.to_string());
            let commit: Commit = self
                .store
                .get_commit(*commit_sha)
                .await
                .map_err(to_protocol_err)?
                .ok_or_else(|| ProtocolError::ObjectNotFound(commit_sha.to_string()))?;
            self.collect_tree_closure(commit.tree_id, &mut out).await?;
        }
        Ok(out)
    }

    async fn has_default_branch(&self) -> Result<bool, ProtocolError> {
        Ok(self.refs.get("HEAD").await.map_err(to_protocol_err)?.is_some())
    }

    async fn post_receive_hook(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn handle_pack_objects(
        &self,
        commits: Vec<crate::internal::object::commit::Commit>,
        trees: Vec<crate::internal::object::tree::Tree>,
        blobs: Vec<crate::internal::object::blob::Blob>,
    ) -> Result<(), ProtocolError> {
        for blob in blobs {
            self.store.put(ObjectType::Blob, blob.data).await.map_err(to_protocol_err)?;
        }
        for tree in trees {
            let data = tree.to_data().map_err(to_protocol_err)?;
            self.store.put(ObjectType::Tree, data).await.map_err(to_protocol_err)?;
        }
        for commit in commits {
            let data = commit.to_data().map_err(to_protocol_err)?;
            self.store.put(ObjectType::Commit, data).await.map_err(to_protocol_err)?;
        }
        Ok(())
    }
}
