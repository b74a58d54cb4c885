//! The Tag object represents an annotated tag: a named, signed pointer at
//! another object (usually a commit).

use std::fmt::Display;

use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;
use crate::internal::object::ObjectTrait;

#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_hash: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Option<String>,
    /// Preserved headers beyond `object`/`type`/`tag`/`tagger` (e.g.
    /// `encoding`), kept in arrival order so an empty tag still round-trips
    /// a (possibly empty) header set rather than silently dropping the
    /// distinction between "no extra headers" and "unparsed extra headers".
    pub extra_headers: Vec<(String, String)>,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_hash)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        if let Some(tagger) = &self.tagger {
            writeln!(f, "tagger {tagger}")?;
        }
        write!(f, "{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_hash: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Option<String>,
        message: String,
    ) -> Tag {
        let mut tag = Tag {
            id: ObjectHash::default(),
            object_hash,
            object_type,
            tag_name,
            tagger,
            extra_headers: Vec::new(),
            message,
        };
        let data = tag.to_data().unwrap();
        tag.id = ObjectHash::from_type_and_data(ObjectType::Tag, &data);
        tag
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let text = data
            .to_str()
            .map_err(|e| GitError::InvalidTagObject(e.to_string()))?;

        let header_end = text
            .find("\n\n")
            .ok_or_else(|| GitError::InvalidTagObject("missing header/message separator".into()))?;
        let (header_block, rest) = text.split_at(header_end);
        let message = rest.trim_start_matches("\n\n").to_string();

        let mut object_hash = None;
        let mut object_type = None;
        let mut tag_name = None;
        let mut tagger = None;
        let mut extra_headers = Vec::new();

        for line in header_block.lines() {
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| GitError::InvalidTagObject(format!("malformed header: {line}")))?;
            match key {
                "object" => {
                    object_hash = Some(
                        ObjectHash::from_str(value).map_err(GitError::InvalidHashValue)?,
                    )
                }
                "type" => object_type = Some(ObjectType::from_string(value)?),
                "tag" => tag_name = Some(value.to_string()),
                "tagger" => tagger = Some(value.to_string()),
                other => {
                    extra_headers.push((other.to_string(), value.to_string()));
                }
            }
        }

        Ok(Tag {
            id: hash,
            object_hash: object_hash
                .ok_or_else(|| GitError::InvalidTagObject("missing object header".into()))?,
            object_type: object_type
                .ok_or_else(|| GitError::InvalidTagObject("missing type header".into()))?,
            tag_name: tag_name
                .ok_or_else(|| GitError::InvalidTagObject("missing tag header".into()))?,
            tagger,
            extra_headers,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        self.to_data().map(|d| d.len()).unwrap_or(0)
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(format!("object {}\n", self.object_hash).into_bytes());
        data.extend(format!("type {}\n", self.object_type).into_bytes());
        data.extend(format!("tag {}\n", self.tag_name).into_bytes());
        if let Some(tagger) = &self.tagger {
            data.extend(format!("tagger {tagger}\n").into_bytes());
        }
        // Extra headers always round-trip, even when the map is empty: an
        // empty map simply emits nothing here, preserving "no extra
        // headers" as a distinct, stable state rather than reconstructing
        // it implicitly.
        for (key, value) in &self.extra_headers {
            data.extend(format!("{key} {value}\n").into_bytes());
        }
        data.push(b'\n');
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_through_bytes() {
        let tag = Tag::new(
            ObjectHash::from_str("341e54913a3a43069f2927cc0f703e5a9f730df1").unwrap(),
            ObjectType::Commit,
            "v1.0.0".to_string(),
            Some("Jane Doe <jane@example.com> 1700000000 +0000".to_string()),
            "release notes\n".to_string(),
        );
        let data = tag.to_data().unwrap();
        let parsed = Tag::from_bytes(&data, tag.id).unwrap();
        assert_eq!(parsed.tag_name, "v1.0.0");
        assert_eq!(parsed.object_type, ObjectType::Commit);
        assert!(parsed.extra_headers.is_empty());
        assert_eq!(parsed.message, "release notes\n");
    }

    #[test]
    fn preserves_unknown_headers() {
        let raw = b"object 341e54913a3a43069f2927cc0f703e5a9f730df1\ntype commit\ntag v1\nencoding UTF-8\n\nmsg\n";
        let tag = Tag::from_bytes(raw, ObjectHash::zero()).unwrap();
        assert_eq!(
            tag.extra_headers
                .iter()
                .find(|(k, _)| k == "encoding")
                .map(|(_, v)| v.as_str()),
            Some("UTF-8")
        );
        let reencoded = tag.to_data().unwrap();
        assert!(reencoded.to_str().unwrap().contains("encoding UTF-8"));
    }
}
