//! Storage tiers and the narrow "get/put tier blob" capability seam the
//! migration controller dispatches through, rather than a god-interface
//! (spec §9 design note on dynamic-dispatch storage seams).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::hash::ObjectHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(Tier::Hot),
            "warm" => Some(Tier::Warm),
            "cold" => Some(Tier::Cold),
            _ => None,
        }
    }
}

/// A remote blob backend for a non-hot tier. The hot tier lives directly in
/// the SQL `hot_objects` table and never goes through this trait.
#[async_trait]
pub trait TierBlobStore: Send + Sync {
    async fn put(&self, tier: Tier, sha: ObjectHash, data: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, tier: Tier, sha: ObjectHash) -> Result<Option<Vec<u8>>, StoreError>;
    async fn delete(&self, tier: Tier, sha: ObjectHash) -> Result<(), StoreError>;
}

/// In-process stand-in for a real remote object store; keyed by (tier, sha)
/// so the same sha can independently exist across tiers during a migration.
#[derive(Default)]
pub struct InMemoryTierBlobStore {
    blobs: Mutex<HashMap<(Tier, ObjectHash), Vec<u8>>>,
}

impl InMemoryTierBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TierBlobStore for InMemoryTierBlobStore {
    async fn put(&self, tier: Tier, sha: ObjectHash, data: Vec<u8>) -> Result<(), StoreError> {
        self.blobs.lock().unwrap().insert((tier, sha), data);
        Ok(())
    }

    async fn get(&self, tier: Tier, sha: ObjectHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().unwrap().get(&(tier, sha)).cloned())
    }

    async fn delete(&self, tier: Tier, sha: ObjectHash) -> Result<(), StoreError> {
        self.blobs.lock().unwrap().remove(&(tier, sha));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_across_tiers_independently() {
        let store = InMemoryTierBlobStore::new();
        let sha = ObjectHash::new(b"x");
        store.put(Tier::Warm, sha, vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get(Tier::Warm, sha).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.get(Tier::Cold, sha).await.unwrap(), None);
    }
}
