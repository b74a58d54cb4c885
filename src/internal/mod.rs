//! Internal building blocks (metadata, object model, pack/zlib) that power the public APIs.
//! Object-location indexing lives in `crate::store`, not here.

pub mod metadata;
pub mod object;
pub mod pack;
pub mod zlib;
