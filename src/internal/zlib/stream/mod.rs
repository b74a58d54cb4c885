//! Streaming decompress readers.

pub mod inflate;
