//! The Tree object represents a directory: an ordered list of entries, each
//! pointing at a blob (file) or another tree (subdirectory).

use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;
use crate::internal::object::utils::validate_tree_entry_name;
use crate::internal::object::ObjectTrait;

/// Git tree entry modes. `Tree`, `Blob`, `BlobExecutable` cover the common
/// cases; `Link` is a symlink; `Commit` is a submodule gitlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeItemMode {
    Tree,
    Blob,
    BlobExecutable,
    Link,
    Commit,
}

impl TreeItemMode {
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Commit => b"160000",
        }
    }

    pub fn from_bytes(mode: &[u8]) -> Result<Self, GitError> {
        match mode {
            b"40000" | b"040000" => Ok(TreeItemMode::Tree),
            b"100644" => Ok(TreeItemMode::Blob),
            b"100755" => Ok(TreeItemMode::BlobExecutable),
            b"120000" => Ok(TreeItemMode::Link),
            b"160000" => Ok(TreeItemMode::Commit),
            _ => Err(GitError::InvalidTreeItem(format!(
                "unrecognized mode: {}",
                String::from_utf8_lossy(mode)
            ))),
        }
    }

    pub fn is_tree(self) -> bool {
        matches!(self, TreeItemMode::Tree)
    }
}

/// A single tree entry: mode, name, and the SHA of the object it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> Self {
        TreeItem { mode, id, name }
    }

    fn validate(&self) -> Result<(), GitError> {
        validate_tree_entry_name(&self.name)
    }

    /// Sort key: directory names get a trailing `/`, so `"foo"` (a file)
    /// sorts before `"foo/"` (a directory also named `foo`) even though
    /// plain byte comparison of `"foo"` vs `"foo.txt"` would disagree.
    fn sort_key(&self) -> String {
        if self.mode.is_tree() {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for item in &self.tree_items {
            writeln!(
                f,
                "{:o} {} {}\t{}",
                match item.mode {
                    TreeItemMode::Tree => 0o040000,
                    TreeItemMode::Blob => 0o100644,
                    TreeItemMode::BlobExecutable => 0o100755,
                    TreeItemMode::Link => 0o120000,
                    TreeItemMode::Commit => 0o160000,
                },
                if item.mode.is_tree() { "tree" } else { "blob" },
                item.id,
                item.name
            )?;
        }
        Ok(())
    }
}

impl Tree {
    /// Builds a tree from entries, sorting them canonically (directories
    /// sort as if their name had a trailing `/`) and computing the id.
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, GitError> {
        if tree_items.is_empty() {
            return Err(GitError::EmptyTreeItems(
                "tree must have at least one entry".to_string(),
            ));
        }
        for item in &tree_items {
            item.validate()?;
        }
        tree_items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items,
        };
        let data = tree.to_data()?;
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &data);
        Ok(tree)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut tree_items = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let space = rest
                .find_byte(b' ')
                .ok_or(GitError::InvalidTreeObject)?;
            let mode_bytes = &rest[..space];
            let mode = TreeItemMode::from_bytes(mode_bytes)?;

            let nul = rest
                .find_byte(0x00)
                .ok_or(GitError::InvalidTreeObject)?;
            let name = String::from_utf8(rest[space + 1..nul].to_vec())
                .map_err(|e| GitError::ConversionError(e.to_string()))?;

            let sha_start = nul + 1;
            let sha_end = sha_start + ObjectHash::SIZE;
            if rest.len() < sha_end {
                return Err(GitError::InvalidTreeObject);
            }
            let id = ObjectHash::from_bytes(&rest[sha_start..sha_end])
                .map_err(GitError::InvalidHashValue)?;

            tree_items.push(TreeItem { mode, id, name });
            rest = &rest[sha_end..];
        }

        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.to_data().map(|d| d.len()).unwrap_or(0)
    }

    /// `"<mode> <name>\0" + 20-byte raw SHA`, one entry after another.
    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.mode.to_bytes());
            data.push(b' ');
            data.extend(item.name.as_bytes());
            data.push(0x00);
            data.extend(item.id.to_data());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(name: &str, mode: TreeItemMode) -> TreeItem {
        TreeItem::new(mode, ObjectHash::new(name.as_bytes()), name.to_string())
    }

    #[test]
    fn sorts_directories_with_trailing_slash() {
        let items = vec![
            sample_item("foo.txt", TreeItemMode::Blob),
            sample_item("foo", TreeItemMode::Tree),
        ];
        let tree = Tree::from_tree_items(items).unwrap();
        assert_eq!(tree.tree_items[0].name, "foo.txt");
        assert_eq!(tree.tree_items[1].name, "foo");
    }

    #[test]
    fn round_trips_through_bytes() {
        let items = vec![
            sample_item("a.txt", TreeItemMode::Blob),
            sample_item("bin", TreeItemMode::BlobExecutable),
        ];
        let tree = Tree::from_tree_items(items).unwrap();
        let data = tree.to_data().unwrap();
        let parsed = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(parsed.tree_items.len(), 2);
        assert_eq!(parsed.tree_items[0].mode, TreeItemMode::Blob);
    }

    #[test]
    fn rejects_empty_tree() {
        assert!(Tree::from_tree_items(vec![]).is_err());
    }

    #[test]
    fn rejects_name_with_slash() {
        let item = sample_item("a/b", TreeItemMode::Blob);
        assert!(Tree::from_tree_items(vec![item]).is_err());
    }
}
