//! Zlib/DEFLATE plumbing for reading Git's compressed object and pack
//! entry bodies.

pub mod stream;
