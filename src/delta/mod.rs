//! Git-style delta encoding/decoding: copy/insert instruction streams used by
//! OFS_DELTA and REF_DELTA pack entries.

pub mod decode;
pub mod encode;
pub mod errors;
pub mod utils;

pub use decode::delta_decode;
pub use encode::DeltaDiff;
