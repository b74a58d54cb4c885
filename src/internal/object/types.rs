//! Object type enumeration shared by the object model and pack layers.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Git object types, with the delta types needed to decode pack streams.
///
/// * `Blob` (3): the content of a file.
/// * `Tree` (2): a directory listing.
/// * `Commit` (1): a point in history with author/committer/message/tree/parents.
/// * `Tag` (4): an annotated tag pointing at another object.
/// * `OffsetDelta` (6) / `HashDelta` (7): pack-only delta representations,
///   never a base object's stored type.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
    OffsetDelta = 6,
    HashDelta = 7,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "OffsetDelta"),
            ObjectType::HashDelta => write!(f, "HashDelta"),
        }
    }
}

impl ObjectType {
    /// Convert object type to the 3-bit pack header type id.
    pub fn to_pack_type_u8(&self) -> Result<u8, GitError> {
        Ok(self.to_u8())
    }

    /// Decode a 3-bit pack header type id to an object type.
    pub fn from_pack_type_u8(number: u8) -> Result<ObjectType, GitError> {
        Self::from_u8(number)
    }

    /// Parse a string representation of a Git object type.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(GitError::InvalidObjectType(s.to_string())),
        }
    }

    /// Return the lowercase byte-string type name used in pack headers and object framing.
    pub fn to_bytes(&self) -> Result<&'static [u8], GitError> {
        match self {
            ObjectType::Commit => Ok(COMMIT_OBJECT_TYPE),
            ObjectType::Tree => Ok(TREE_OBJECT_TYPE),
            ObjectType::Blob => Ok(BLOB_OBJECT_TYPE),
            ObjectType::Tag => Ok(TAG_OBJECT_TYPE),
            _ => Err(GitError::InvalidObjectType(self.to_string())),
        }
    }

    /// Convert an object type to a byte vector (same content as `to_bytes`, owned).
    pub fn to_data(self) -> Result<Vec<u8>, GitError> {
        self.to_bytes().map(|b| b.to_vec())
    }

    /// Convert an object type to its numeric pack-header id.
    pub fn to_u8(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
            ObjectType::OffsetDelta => 6,
            ObjectType::HashDelta => 7,
        }
    }

    /// Convert a numeric pack-header id to an object type.
    pub fn from_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::HashDelta),
            _ => Err(GitError::InvalidObjectType(format!(
                "invalid pack object type number: {number}"
            ))),
        }
    }

    /// True for the four base object kinds (not a delta representation).
    pub fn is_base(&self) -> bool {
        matches!(
            self,
            ObjectType::Commit | ObjectType::Tree | ObjectType::Blob | ObjectType::Tag
        )
    }
}
