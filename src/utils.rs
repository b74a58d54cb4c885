//! Shared I/O utilities for Git-internal including buffered readers, SHA abstractions, and helpers
//! for reading pack/file bytes while tracking stream progress.

use std::{
    io,
    io::{BufRead, Read},
};

use sha1::{Digest, Sha1};

use crate::hash::ObjectHash;
pub fn read_bytes(file: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_sha(file: &mut impl Read) -> io::Result<ObjectHash> {
    ObjectHash::from_stream(file)
}

/// A lightweight wrapper that counts bytes read from the underlying reader.
/// replace deflate.intotal() in decompress_data
pub struct CountingReader<R> {
    pub inner: R,
    pub bytes_read: u64,
}

impl<R> CountingReader<R> {
    /// Creates a new `CountingReader` wrapping the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_read += amt as u64;
        self.inner.consume(amt);
    }
}
/// SHA-1 hash accumulator exposed as `std::io::Write`, so stream readers
/// can feed bytes through it as they're consumed (see
/// `internal::zlib::stream::inflate::ReadBoxed`).
#[derive(Clone)]
pub struct HashAlgorithm(Sha1);

impl HashAlgorithm {
    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data)
    }

    pub fn finalize(self) -> Vec<u8> {
        self.0.finalize().to_vec()
    }

    pub fn new() -> Self {
        HashAlgorithm(Sha1::new())
    }
}

impl std::io::Write for HashAlgorithm {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}
