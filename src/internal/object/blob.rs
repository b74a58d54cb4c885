//! The Blob object stores raw file content, with no metadata about name, mode, or history.
//! Git considers content identical across renames/copies as the same blob.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;
use crate::internal::object::ObjectTrait;

#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl Blob {
    /// Builds a blob from raw bytes, computing its id.
    pub fn from_bytes_owned(data: Vec<u8>) -> Blob {
        let id = ObjectHash::from_type_and_data(ObjectType::Blob, &data);
        Blob { id, data }
    }

    pub fn from_content(content: &str) -> Blob {
        Blob::from_bytes_owned(content.as_bytes().to_vec())
    }

    /// True when `data` is not valid UTF-8 or contains a NUL byte, the same
    /// heuristic Git itself uses to decide whether to diff a file as text.
    pub fn is_binary(&self) -> bool {
        self.data.contains(&0) || std::str::from_utf8(&self.data).is_err()
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_content_computes_id() {
        let blob = Blob::from_content("hello\n");
        let expected = ObjectHash::from_type_and_data(ObjectType::Blob, b"hello\n");
        assert_eq!(blob.id, expected);
    }

    #[test]
    fn from_bytes_round_trips() {
        let hash = ObjectHash::new(b"irrelevant for this test");
        let blob = Blob::from_bytes(b"content", hash).unwrap();
        assert_eq!(blob.to_data().unwrap(), b"content".to_vec());
    }

    #[test]
    fn detects_binary_via_nul_byte() {
        let blob = Blob::from_bytes_owned(vec![0x00, 0x01, 0x02]);
        assert!(blob.is_binary());
        let text = Blob::from_content("plain text");
        assert!(!text.is_binary());
    }
}
