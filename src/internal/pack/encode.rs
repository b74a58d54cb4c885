//! Encodes a stream of `Entry` values into pack bytes, OFS_DELTA-compressing
//! against a sliding window of recently written objects of the same type.

use std::collections::VecDeque;
use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};
use tokio::sync::mpsc;

use crate::delta::DeltaDiff;
use crate::errors::GitError;
use crate::internal::pack::entry::Entry;
use crate::internal::pack::utils::{write_offset_distance, write_type_and_size};
use crate::internal::object::types::ObjectType;
use crate::utils::HashAlgorithm;

fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("in-memory writer never fails");
    enc.finish().expect("in-memory writer never fails")
}

/// Streams pack bytes for a fixed-size set of entries out over a channel.
pub struct PackEncoder {
    object_number: usize,
    window_size: usize,
    pack_tx: mpsc::Sender<Vec<u8>>,
}

impl PackEncoder {
    pub fn new(object_number: usize, window_size: usize, pack_tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            object_number,
            window_size,
            pack_tx,
        }
    }

    /// Drains `entry_rx`, writing the pack header, each (possibly
    /// delta-compressed) object, and the trailing SHA-1 of everything
    /// written. Sends incrementally over `pack_tx` so callers can stream to
    /// disk or the network without buffering the whole pack.
    pub async fn encode(&mut self, mut entry_rx: mpsc::Receiver<Entry>) -> Result<(), GitError> {
        let mut hash = HashAlgorithm::new();

        let mut header = Vec::with_capacity(12);
        header.extend(b"PACK");
        header.extend(2u32.to_be_bytes());
        header.extend((self.object_number as u32).to_be_bytes());
        hash.update(&header);
        let mut written = header.len();
        self.send(header).await?;

        let mut window: VecDeque<(usize, Entry)> = VecDeque::with_capacity(self.window_size);
        let mut emitted = 0usize;

        while let Some(entry) = entry_rx.recv().await {
            emitted += 1;
            let entry_offset = written;

            let best_delta = window
                .iter()
                .filter(|(_, base)| base.obj_type == entry.obj_type)
                .filter_map(|(base_offset, base)| {
                    let delta = DeltaDiff::new(&base.data, &entry.data).encode();
                    if delta.len() < entry.data.len() {
                        Some((entry_offset - base_offset, delta))
                    } else {
                        None
                    }
                })
                .min_by_key(|(_, delta)| delta.len());

            let mut buf = Vec::new();
            if let Some((distance, delta_bytes)) = best_delta {
                buf.extend(write_type_and_size(ObjectType::OffsetDelta, delta_bytes.len())?);
                buf.extend(write_offset_distance(distance as u64));
                buf.extend(zlib_compress(&delta_bytes));
            } else {
                buf.extend(write_type_and_size(entry.obj_type, entry.data.len())?);
                buf.extend(zlib_compress(&entry.data));
            }

            hash.update(&buf);
            written += buf.len();
            self.send(buf).await?;

            window.push_back((entry_offset, entry));
            if window.len() > self.window_size {
                window.pop_front();
            }
        }

        if emitted != self.object_number {
            tracing::warn!(
                "pack encoder declared {} objects but received {}",
                self.object_number,
                emitted
            );
        }

        self.send(hash.finalize()).await?;
        Ok(())
    }

    async fn send(&self, chunk: Vec<u8>) -> Result<(), GitError> {
        self.pack_tx
            .send(chunk)
            .await
            .map_err(|e| GitError::PackEncodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ObjectHash;

    fn blob_entry(content: &[u8]) -> Entry {
        Entry {
            obj_type: ObjectType::Blob,
            data: content.to_vec(),
            hash: ObjectHash::from_type_and_data(ObjectType::Blob, content),
            chain_len: 0,
        }
    }

    #[tokio::test]
    async fn encodes_header_and_trailer() {
        let entries = vec![blob_entry(b"one"), blob_entry(b"two")];
        let (pack_tx, mut pack_rx) = mpsc::channel(16);
        let (entry_tx, entry_rx) = mpsc::channel(16);

        let mut encoder = PackEncoder::new(entries.len(), 10, pack_tx);
        let encode_task = tokio::spawn(async move { encoder.encode(entry_rx).await });

        for e in entries {
            entry_tx.send(e).await.unwrap();
        }
        drop(entry_tx);

        let mut out = Vec::new();
        while let Some(chunk) = pack_rx.recv().await {
            out.extend(chunk);
        }
        encode_task.await.unwrap().unwrap();

        assert_eq!(&out[0..4], b"PACK");
        assert_eq!(u32::from_be_bytes(out[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 2);
        assert!(out.len() >= 12 + 20);
    }

    #[tokio::test]
    async fn deltas_similar_consecutive_blobs() {
        let base = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let mut similar = base.clone();
        similar.extend_from_slice(b"!");

        let entries = vec![blob_entry(&base), blob_entry(&similar)];
        let (pack_tx, mut pack_rx) = mpsc::channel(16);
        let (entry_tx, entry_rx) = mpsc::channel(16);

        let mut encoder = PackEncoder::new(entries.len(), 10, pack_tx);
        let encode_task = tokio::spawn(async move { encoder.encode(entry_rx).await });
        for e in entries {
            entry_tx.send(e).await.unwrap();
        }
        drop(entry_tx);

        let mut out = Vec::new();
        while let Some(chunk) = pack_rx.recv().await {
            out.extend(chunk);
        }
        encode_task.await.unwrap().unwrap();

        // Much smaller than writing both blobs raw, since the second deltas
        // against the first.
        assert!(out.len() < base.len() + similar.len());
    }
}
