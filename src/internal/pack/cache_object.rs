//! In-memory representation of a pack object mid-decode: either a resolved
//! base object or a still-unresolved delta waiting on its base.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;
use crate::internal::pack::entry::Entry;

/// What kind of pack entry this cache slot represents.
#[derive(Debug, Clone)]
pub enum CacheObjectInfo {
    /// A non-delta object: its declared type and (once computed) hash.
    BaseObject(ObjectType, ObjectHash),
    /// OFS_DELTA: base lives `distance` bytes before this entry's offset.
    OffsetDelta(u64),
    /// REF_DELTA: base is identified by hash, possibly outside this pack.
    RefDelta(ObjectHash),
}

/// A pack object mid-decode: decompressed bytes plus enough metadata to
/// resolve delta chains and, once resolved, produce an `Entry`.
#[derive(Debug, Clone)]
pub struct CacheObject {
    pub info: CacheObjectInfo,
    /// Offset of this entry's header within the pack.
    pub offset: usize,
    pub crc32: u32,
    pub data_decompressed: Vec<u8>,
    /// Optional shared byte-budget tracker for memory-bounded decode.
    pub mem_recorder: Option<Arc<AtomicUsize>>,
    pub is_delta_in_pack: bool,
}

impl CacheObject {
    pub fn new(
        info: CacheObjectInfo,
        offset: usize,
        crc32: u32,
        data_decompressed: Vec<u8>,
        mem_recorder: Option<Arc<AtomicUsize>>,
        is_delta_in_pack: bool,
    ) -> Self {
        CacheObject {
            info,
            offset,
            crc32,
            data_decompressed,
            mem_recorder,
            is_delta_in_pack,
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(
            self.info,
            CacheObjectInfo::OffsetDelta(_) | CacheObjectInfo::RefDelta(_)
        )
    }

    pub fn mem_size(&self) -> usize {
        self.data_decompressed.len()
    }

    /// Converts a resolved base object into a pack `Entry`.
    ///
    /// # Panics
    /// Panics if this object is still an unresolved delta; callers must
    /// resolve the delta chain first.
    pub fn into_entry(self, chain_len: usize) -> Entry {
        let (obj_type, hash) = match self.info {
            CacheObjectInfo::BaseObject(t, h) => (t, h),
            _ => panic!("CacheObject::into_entry called on an unresolved delta"),
        };
        Entry {
            obj_type,
            data: self.data_decompressed,
            hash,
            chain_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_delta_distinguishes_base_from_delta() {
        let base = CacheObject::new(
            CacheObjectInfo::BaseObject(ObjectType::Blob, ObjectHash::zero()),
            0,
            0,
            vec![1, 2, 3],
            None,
            false,
        );
        assert!(!base.is_delta());

        let delta = CacheObject::new(CacheObjectInfo::OffsetDelta(10), 50, 0, vec![], None, true);
        assert!(delta.is_delta());
    }

    #[test]
    fn into_entry_converts_resolved_base() {
        let hash = ObjectHash::new(b"hello");
        let obj = CacheObject::new(
            CacheObjectInfo::BaseObject(ObjectType::Blob, hash),
            0,
            0,
            b"hello".to_vec(),
            None,
            false,
        );
        let entry = obj.into_entry(0);
        assert_eq!(entry.hash, hash);
        assert_eq!(entry.data, b"hello".to_vec());
    }
}
