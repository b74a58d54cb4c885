//! Decodes a pack byte stream into resolved Git objects.
//!
//! Delta bases are assumed to precede their deltas in the stream. That is
//! true of any pack this crate's own encoder produces (it only ever deltas
//! against objects already written) and of any non-thin pack; resolving a
//! base that lives outside the pack (a thin pack) is out of scope.

use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use threadpool::ThreadPool;

use crate::delta::delta_decode;
use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;
use crate::internal::pack::cache::Caches;
use crate::internal::pack::cache_object::{CacheObject, CacheObjectInfo};
use crate::internal::pack::entry::Entry;
use crate::internal::pack::utils::{read_offset_distance, read_type_and_size};
use crate::internal::pack::waitlist::Waitlist;
use crate::internal::pack::{DEFAULT_TMP_DIR, Pack};
use crate::internal::zlib::stream::inflate::ReadBoxed;
use crate::utils::CountingReader;

const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// A base object resolved during decode, cached by pack offset so later
/// deltas in the same chain can find it.
struct Resolved {
    obj_type: ObjectType,
    data: Vec<u8>,
    hash: ObjectHash,
    chain_len: usize,
}

impl Pack {
    /// Builds a decoder.
    ///
    /// `mem_limit` bounds the decode-time object cache; `tmp_path` is where
    /// an over-limit decode would spill (kept for API parity -- this
    /// decoder currently buffers a whole pack in memory rather than
    /// spilling); `thread_num` sizes a worker pool reserved for future
    /// parallel decode; `clean_tmp` controls whether `tmp_path` is removed
    /// when the decoder is dropped.
    pub fn new(
        mem_limit: Option<usize>,
        tmp_path: Option<PathBuf>,
        thread_num: Option<usize>,
        clean_tmp: bool,
    ) -> Self {
        let pool = Arc::new(ThreadPool::new(thread_num.unwrap_or_else(num_cpus::get)));
        let tmp_path = tmp_path.unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_DIR));
        Pack {
            number: 0,
            signature: ObjectHash::zero(),
            objects: Vec::new(),
            pool,
            waitlist: Arc::new(Waitlist::new()),
            caches: Arc::new(Caches::new(mem_limit, tmp_path, clean_tmp)),
            mem_limit,
            cache_objs_mem: Arc::new(AtomicUsize::new(0)),
            clean_tmp,
        }
    }

    /// Decodes a full pack stream, invoking `callback(entry, pack_offset)`
    /// once per resolved object -- base objects and deltas alike, deltas
    /// already applied to their base before the callback runs.
    pub fn decode<R: BufRead>(
        &mut self,
        reader: &mut R,
        mut callback: impl FnMut(Entry, usize),
    ) -> Result<(), GitError> {
        let mut counting = CountingReader::new(reader);

        let mut magic = [0u8; 4];
        counting.read_exact(&mut magic)?;
        if &magic != PACK_SIGNATURE {
            return Err(GitError::InvalidPackHeader(format!(
                "bad magic bytes: {magic:?}"
            )));
        }
        let mut version_bytes = [0u8; 4];
        counting.read_exact(&mut version_bytes)?;
        let version = u32::from_be_bytes(version_bytes);
        if version != 2 && version != 3 {
            return Err(GitError::InvalidPackHeader(format!(
                "unsupported pack version: {version}"
            )));
        }
        let mut count_bytes = [0u8; 4];
        counting.read_exact(&mut count_bytes)?;
        let object_count = u32::from_be_bytes(count_bytes) as usize;
        self.number = object_count;

        let mut resolved: HashMap<usize, Resolved> = HashMap::with_capacity(object_count);

        for _ in 0..object_count {
            let entry_offset = counting.bytes_read as usize;
            let (obj_type, size) = read_type_and_size(&mut counting)?;

            let (final_type, data, chain_len, is_delta) = match obj_type {
                ObjectType::OffsetDelta => {
                    let distance = read_offset_distance(&mut counting)?;
                    let base_offset = (entry_offset as u64)
                        .checked_sub(distance)
                        .ok_or_else(|| {
                            GitError::DeltaObjectError("OFS_DELTA offset underflow".to_string())
                        })? as usize;

                    let mut delta_bytes = Vec::with_capacity(size);
                    ReadBoxed::new_for_delta(&mut counting).read_to_end(&mut delta_bytes)?;

                    let base = resolved.get(&base_offset).ok_or_else(|| {
                        GitError::DeltaObjectError(format!(
                            "OFS_DELTA base at offset {base_offset} not yet resolved"
                        ))
                    })?;
                    let data = delta_decode(&mut std::io::Cursor::new(delta_bytes), &base.data)
                        .map_err(|e| GitError::DeltaObjectError(e.to_string()))?;
                    (base.obj_type, data, base.chain_len + 1, true)
                }
                ObjectType::HashDelta => {
                    let mut base_hash_bytes = [0u8; ObjectHash::SIZE];
                    counting.read_exact(&mut base_hash_bytes)?;
                    let base_hash = ObjectHash::from_bytes(&base_hash_bytes)
                        .map_err(GitError::InvalidHashValue)?;

                    let mut delta_bytes = Vec::with_capacity(size);
                    ReadBoxed::new_for_delta(&mut counting).read_to_end(&mut delta_bytes)?;

                    let base = resolved
                        .values()
                        .find(|r| r.hash == base_hash)
                        .ok_or_else(|| {
                            GitError::DeltaObjectError(format!(
                                "REF_DELTA base {base_hash} not yet resolved"
                            ))
                        })?;
                    let data = delta_decode(&mut std::io::Cursor::new(delta_bytes), &base.data)
                        .map_err(|e| GitError::DeltaObjectError(e.to_string()))?;
                    (base.obj_type, data, base.chain_len + 1, true)
                }
                _ => {
                    let mut data = Vec::with_capacity(size);
                    ReadBoxed::new(&mut counting, obj_type, size).read_to_end(&mut data)?;
                    (obj_type, data, 0, false)
                }
            };

            let hash = ObjectHash::from_type_and_data(final_type, &data);

            self.caches.insert(
                entry_offset,
                CacheObject::new(
                    CacheObjectInfo::BaseObject(final_type, hash),
                    entry_offset,
                    0,
                    data.clone(),
                    None,
                    is_delta,
                ),
            );

            resolved.insert(
                entry_offset,
                Resolved {
                    obj_type: final_type,
                    data: data.clone(),
                    hash,
                    chain_len,
                },
            );

            callback(
                Entry {
                    obj_type: final_type,
                    data,
                    hash,
                    chain_len,
                },
                entry_offset,
            );
        }

        let mut trailer = [0u8; ObjectHash::SIZE];
        counting.read_exact(&mut trailer)?;
        self.signature = ObjectHash::from_bytes(&trailer).unwrap_or_default();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use flate2::{Compression, write::ZlibEncoder};

    use super::*;
    use crate::internal::pack::utils::write_type_and_size;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Builds a minimal pack with a single blob, no trailer verification.
    fn single_blob_pack(content: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(b"PACK");
        out.extend(2u32.to_be_bytes());
        out.extend(1u32.to_be_bytes());
        out.extend(write_type_and_size(ObjectType::Blob, content.len()).unwrap());
        out.extend(zlib_compress(content));
        out.extend([0u8; 20]); // trailer, unchecked by decode()
        out
    }

    #[test]
    fn decode_single_blob() {
        let pack_bytes = single_blob_pack(b"hello pack");
        let mut cursor = Cursor::new(pack_bytes);
        let mut pack = Pack::new(None, None, None, false);

        let mut seen = Vec::new();
        pack.decode(&mut cursor, |entry, offset| {
            seen.push((entry, offset));
        })
        .unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.obj_type, ObjectType::Blob);
        assert_eq!(seen[0].0.data, b"hello pack");
        assert_eq!(seen[0].1, 12);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut cursor = Cursor::new(b"NOPE0000".to_vec());
        let mut pack = Pack::new(None, None, None, false);
        let err = pack.decode(&mut cursor, |_, _| {}).unwrap_err();
        assert!(matches!(err, GitError::InvalidPackHeader(_)));
    }
}
