//! Decode-time cache of resolved pack objects, keyed by pack offset, used
//! while chasing OFS_DELTA/REF_DELTA chains.
//!
//! Mirrors only the in-memory half of a full disk-spilling cache: this
//! crate's decoder buffers a whole pack before resolving deltas (see
//! `decode.rs`), so the temp-dir plumbing here exists for API parity with
//! callers that configure it, not because decode currently spills to disk.

use std::path::PathBuf;

use dashmap::DashMap;

use crate::internal::pack::cache_object::CacheObject;

/// Object cache used during pack decode.
#[derive(Debug)]
pub struct Caches {
    by_offset: DashMap<usize, CacheObject>,
    mem_limit: Option<usize>,
    tmp_path: PathBuf,
    clean_tmp: bool,
}

impl Caches {
    pub fn new(mem_limit: Option<usize>, tmp_path: PathBuf, clean_tmp: bool) -> Self {
        Caches {
            by_offset: DashMap::new(),
            mem_limit,
            tmp_path,
            clean_tmp,
        }
    }

    pub fn insert(&self, offset: usize, obj: CacheObject) {
        self.by_offset.insert(offset, obj);
    }

    pub fn get(&self, offset: usize) -> Option<CacheObject> {
        self.by_offset.get(&offset).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.by_offset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_offset.is_empty()
    }

    pub fn mem_limit(&self) -> Option<usize> {
        self.mem_limit
    }

    pub fn tmp_path(&self) -> &PathBuf {
        &self.tmp_path
    }
}

impl Drop for Caches {
    fn drop(&mut self) {
        if self.clean_tmp && self.tmp_path.exists() {
            let _ = std::fs::remove_dir_all(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ObjectHash;
    use crate::internal::object::types::ObjectType;
    use crate::internal::pack::cache_object::CacheObjectInfo;

    fn test_obj(offset: usize) -> CacheObject {
        CacheObject::new(
            CacheObjectInfo::BaseObject(ObjectType::Blob, ObjectHash::default()),
            offset,
            0,
            vec![1, 2, 3],
            None,
            false,
        )
    }

    #[test]
    fn insert_and_get_round_trip() {
        let caches = Caches::new(None, PathBuf::from("./.cache_temp_test"), false);
        caches.insert(42, test_obj(42));
        let fetched = caches.get(42).unwrap();
        assert_eq!(fetched.offset, 42);
        assert!(caches.get(1).is_none());
        assert_eq!(caches.len(), 1);
    }
}
