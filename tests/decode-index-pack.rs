//! Integration test that builds a pack in memory, decodes it back, rebuilds
//! its `.idx` file, and asserts the offsets recorded in the index match the
//! offsets the decoder actually saw.

use std::{
    collections::HashMap,
    convert::TryInto,
    sync::{Arc, Mutex},
};

use git_internal::{
    errors::GitError,
    hash::ObjectHash,
    internal::{
        metadata::{EntryMeta, MetaAttached},
        object::types::ObjectType,
        pack::{
            Pack,
            encode::PackEncoder,
            entry::Entry,
            pack_index::{IdxBuilder, IndexEntry},
        },
    },
};
use tokio::sync::mpsc;

/// Builds a small pack containing a handful of distinct blobs, encoded
/// through the crate's own `PackEncoder`.
async fn build_sample_pack() -> Vec<u8> {
    let entries: Vec<Entry> = [
        b"alpha payload".to_vec(),
        b"bravo payload, a little longer this time".to_vec(),
        b"charlie".to_vec(),
    ]
    .into_iter()
    .map(|data| Entry {
        hash: ObjectHash::from_type_and_data(ObjectType::Blob, &data),
        obj_type: ObjectType::Blob,
        data,
        chain_len: 0,
    })
    .collect();

    let (pack_tx, mut pack_rx) = mpsc::channel::<Vec<u8>>(64);
    let (entry_tx, entry_rx) = mpsc::channel::<Entry>(64);
    let mut encoder = PackEncoder::new(entries.len(), 10, pack_tx);

    let encode_task = tokio::spawn(async move { encoder.encode(entry_rx).await });
    for e in entries {
        entry_tx.send(e).await.unwrap();
    }
    drop(entry_tx);

    let mut pack_bytes = Vec::new();
    while let Some(chunk) = pack_rx.recv().await {
        pack_bytes.extend(chunk);
    }
    encode_task.await.unwrap().unwrap();
    pack_bytes
}

fn decode_pack(
    pack_bytes: &[u8],
) -> Result<(Vec<MetaAttached<Entry, EntryMeta>>, ObjectHash, usize), GitError> {
    let mut reader = std::io::Cursor::new(pack_bytes.to_vec());
    let mut pack = Pack::new(Some(64 * 1024 * 1024), None, None, true);

    let metas = Arc::new(Mutex::new(Vec::new()));
    let metas_cb = metas.clone();
    pack.decode(&mut reader, move |entry: Entry, offset: usize| {
        let mut meta = EntryMeta::new();
        meta.pack_offset = Some(offset);
        metas_cb
            .lock()
            .unwrap()
            .push(MetaAttached { inner: entry, meta });
    })?;

    let pack_hash = pack.signature;
    let count = pack.number;
    let metas = Arc::try_unwrap(metas).unwrap().into_inner().unwrap();
    Ok((metas, pack_hash, count))
}

fn parse_idx_offsets(idx_bytes: &[u8]) -> HashMap<Vec<u8>, u64> {
    assert!(idx_bytes.len() >= 8, "idx too short");
    assert_eq!(&idx_bytes[0..4], &[0xFF, 0x74, 0x4F, 0x63], "idx magic");
    let version = u32::from_be_bytes(idx_bytes[4..8].try_into().unwrap());
    assert_eq!(version, 2, "idx version must be 2 per pack-format spec");
    let mut cursor = 8usize;

    let mut fanout = [0u32; 256];
    for (i, slot) in fanout.iter_mut().enumerate() {
        *slot = u32::from_be_bytes(
            idx_bytes[cursor + i * 4..cursor + i * 4 + 4]
                .try_into()
                .unwrap(),
        );
    }
    cursor += 256 * 4;

    let object_count = fanout[255] as usize;
    let hash_len = ObjectHash::SIZE;
    let names_end = cursor + object_count * hash_len;
    let names = &idx_bytes[cursor..names_end];
    cursor = names_end;

    cursor += object_count * 4; // skip CRCs

    let offsets_end = cursor + object_count * 4;
    let offsets_bytes = &idx_bytes[cursor..offsets_end];
    cursor = offsets_end;

    let large_count = offsets_bytes
        .chunks_exact(4)
        .filter(|raw| u32::from_be_bytes((*raw).try_into().unwrap()) & 0x8000_0000 != 0)
        .count();

    let mut large_offsets = Vec::with_capacity(large_count);
    for _ in 0..large_count {
        let v = u64::from_be_bytes(idx_bytes[cursor..cursor + 8].try_into().unwrap());
        large_offsets.push(v);
        cursor += 8;
    }

    let mut map = HashMap::new();
    for (i, raw) in offsets_bytes.chunks_exact(4).enumerate() {
        let raw = u32::from_be_bytes(raw.try_into().unwrap());
        let offset = if raw & 0x8000_0000 == 0 {
            raw as u64
        } else {
            let idx = (raw & 0x7FFF_FFFF) as usize;
            large_offsets[idx]
        };
        let hash = names[i * hash_len..(i + 1) * hash_len].to_vec();
        map.insert(hash, offset);
    }
    map
}

#[tokio::test]
async fn idx_offsets_match_decoded_pack() -> Result<(), GitError> {
    let pack_bytes = build_sample_pack().await;
    let (metas, pack_hash, count) = decode_pack(&pack_bytes)?;
    assert_eq!(metas.len(), count, "decoded entries count mismatch");

    let mut idx_entries = Vec::with_capacity(metas.len());
    for m in &metas {
        idx_entries.push(IndexEntry::try_from(m)?);
    }

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1024);
    let mut builder = IdxBuilder::new(idx_entries.len(), tx, pack_hash);
    builder.write_idx(idx_entries).await?;

    let mut idx_bytes = Vec::new();
    while let Some(chunk) = rx.recv().await {
        idx_bytes.extend_from_slice(&chunk);
    }

    let offsets_map = parse_idx_offsets(&idx_bytes);
    for meta in metas {
        let hash = meta.inner.hash.to_data();
        let expected = meta.meta.pack_offset.expect("missing pack offset") as u64;
        let actual = *offsets_map
            .get(&hash)
            .unwrap_or_else(|| panic!("hash missing in idx: {}", meta.inner.hash));
        assert_eq!(actual, expected, "offset mismatch for {}", meta.inner.hash);
    }
    Ok(())
}
