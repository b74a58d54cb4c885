//! Reader wrapper that tracks how many bytes of a pack have been consumed while keeping a running
//! SHA-1 hash for trailer verification.

use std::io::{self, BufRead, Read};

use crate::{hash::ObjectHash, utils::HashAlgorithm};

/// [`Wrapper`] is a wrapper around a reader that also computes the SHA-1 hash of the data read.
///
/// It is designed to work with any reader that implements `BufRead`.
pub struct Wrapper<R> {
    inner: R,
    hash: HashAlgorithm,
    bytes_read: usize,
}

impl<R> Wrapper<R>
where
    R: BufRead,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hash: HashAlgorithm::new(),
            bytes_read: 0,
        }
    }

    /// Returns the number of bytes read so far.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Returns the final SHA-1 hash of the data read so far.
    pub fn final_hash(&self) -> ObjectHash {
        let digest = self.hash.clone().finalize();
        ObjectHash::from_bytes(&digest).unwrap()
    }
}

impl<R> BufRead for Wrapper<R>
where
    R: BufRead,
{
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let buffer = self.inner.fill_buf().expect("Failed to fill buffer");
        self.hash.update(&buffer[..amt]);
        self.inner.consume(amt);
        self.bytes_read += amt;
    }
}

impl<R> Read for Wrapper<R>
where
    R: BufRead,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let o = self.inner.read(buf)?;
        self.hash.update(&buf[..o]);
        self.bytes_read += o;
        Ok(o)
    }
}
