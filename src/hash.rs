//! SHA-1 object hash primitives. This engine hashes with SHA-1 throughout;
//! the Git SHA-256 object format is an explicit non-goal.

use std::{fmt::Display, io, str::FromStr};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use sha1::Digest as _;
use sha2::Digest as _;

use crate::internal::object::types::ObjectType;

/// A 20-byte SHA-1 object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ObjectHash([u8; 20]);

impl Default for ObjectHash {
    fn default() -> Self {
        ObjectHash([0u8; 20])
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Parse a 40-character lowercase hex SHA-1 into an `ObjectHash`.
impl FromStr for ObjectHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_valid_sha(s) {
            return Err(format!("not a valid sha1: {s}"));
        }
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        let mut h = [0u8; 20];
        h.copy_from_slice(&bytes);
        Ok(ObjectHash(h))
    }
}

impl ObjectHash {
    pub const SIZE: usize = 20;
    pub const HEX_LEN: usize = 40;

    /// All-zero hash, used on the wire for "no object" (e.g. push create/delete).
    pub fn zero() -> Self {
        ObjectHash([0u8; 20])
    }

    pub fn zero_str() -> &'static str {
        "0000000000000000000000000000000000000000"
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Compute the SHA-1 of raw bytes, with no Git framing applied.
    pub fn new(data: &[u8]) -> ObjectHash {
        let digest = sha1::Sha1::digest(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(digest.as_ref());
        ObjectHash(bytes)
    }

    /// Compute `hash_object(type, data)`: SHA-1 of `"<type> <size>\0<data>"`.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut framed: Vec<u8> = Vec::with_capacity(data.len() + 32);
        framed.extend(object_type.to_data().unwrap());
        framed.push(b' ');
        framed.extend(data.len().to_string().as_bytes());
        framed.push(b'\0');
        framed.extend(data);
        ObjectHash::new(&framed)
    }

    /// Build an `ObjectHash` from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectHash, String> {
        if bytes.len() != 20 {
            return Err(format!(
                "invalid byte length: got {}, expected 20",
                bytes.len()
            ));
        }
        let mut h = [0u8; 20];
        h.copy_from_slice(bytes);
        Ok(ObjectHash(h))
    }

    /// Read exactly 20 raw bytes from a stream as an `ObjectHash`.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectHash> {
        let mut h = [0u8; 20];
        data.read_exact(&mut h)?;
        Ok(ObjectHash(h))
    }

    /// Format hash as a colored string (for terminal display).
    pub fn to_color_str(self) -> String {
        self.to_string().red().bold().to_string()
    }

    /// Return raw bytes of the hash.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Faster string conversion than `Display`.
    pub fn _to_string(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// SHA-256 of raw bytes, as 64 lowercase hex characters. Unrelated to object
/// addressing (this engine stays SHA-1 throughout); exposed as a standalone
/// primitive for callers that need a content digest without Git framing,
/// e.g. pack checksums shared over non-Git channels.
pub fn sha256(data: &[u8]) -> String {
    hex::encode(sha2::Sha256::digest(data))
}

/// Strict SHA-1 validator: exactly 40 lowercase hex characters.
///
/// The source this crate was distilled from accepted any `[a-z0-9]{40}`
/// string (so `g`-`z` slipped past validation); real Git SHAs are
/// `[0-9a-f]{40}` and this is tightened accordingly.
pub fn is_valid_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::hash::{ObjectHash, is_valid_sha, sha256};

    #[test]
    fn hashes_hello_world() {
        let data = "Hello, world!".as_bytes();
        let sha1 = ObjectHash::new(data);
        assert_eq!(sha1.to_string(), "943a702d06f34599aee1f8da8ef9f7296031d699");
    }

    #[test]
    fn hashes_blob_object_framing() {
        // hash_object("blob", "hello") per spec scenario 1.
        let hash = ObjectHash::from_type_and_data(
            crate::internal::object::types::ObjectType::Blob,
            b"hello",
        );
        assert_eq!(hash.to_string(), "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0");
    }

    #[test]
    fn from_bytes_round_trips() {
        let sha1 = ObjectHash::from_bytes(&[
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ])
        .unwrap();
        assert_eq!(sha1.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
        assert_eq!(sha1.to_data().len(), 20);
    }

    #[test]
    fn from_stream_reads_twenty_bytes() {
        let source = [
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ];
        let mut reader = std::io::Cursor::new(source);
        let sha1 = ObjectHash::from_stream(&mut reader).unwrap();
        assert_eq!(sha1.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    #[test]
    fn from_str_rejects_non_hex() {
        assert!(ObjectHash::from_str(&"g".repeat(40)).is_err());
        assert!(ObjectHash::from_str(&"a".repeat(39)).is_err());
        assert!(ObjectHash::from_str(&"A".repeat(40)).is_err());
    }

    #[test]
    fn sha256_hashes_hello_world() {
        let digest = sha256("Hello, world!".as_bytes());
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd"
        );
    }

    #[test]
    fn is_valid_sha_rejects_uppercase_and_out_of_range_letters() {
        assert!(is_valid_sha(&"a".repeat(40)));
        assert!(!is_valid_sha(&"A".repeat(40)));
        assert!(!is_valid_sha(&"g".repeat(40)));
        assert!(!is_valid_sha(&"a".repeat(39)));
    }
}
