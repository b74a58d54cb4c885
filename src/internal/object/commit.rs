//! The Commit object is a data structure used to represent a specific version of a project's
//! files at a particular point in time. In Git, the commit object is a fundamental data structure
//! that is used to track changes to a repository's files over time. Whenever a developer makes
//! changes to the files in a repository, they create a new commit object that records those changes.
//!
//! Each commit object in Git contains the following information:
//!
//! - A unique SHA-1 hash that identifies the commit.
//! - The author and committer of the commit (which may be different people).
//! - The date and time the commit was made.
//! - A commit message that describes the changes made in the commit.
//! - A reference to the parent commit or commits (in the case of a merge commit) that the new commit is based on.
//! - The contents of the files in the repository at the time the commit was made.
use std::fmt::Display;
use std::str::FromStr;

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::ObjectType;
use crate::internal::object::signature::Signature;
use bstr::ByteSlice;
use serde::Deserialize;
use serde::Serialize;

/// Commit message cleanup modes, per the spec's message-formatting rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    /// Leave the message untouched.
    Verbatim,
    /// Strip leading/trailing whitespace only.
    WhitespaceStrip,
    /// Remove comment lines (`#`-prefixed), then whitespace-strip.
    Strip,
    /// Truncate at a `<comment-char> ---- >8 ----` scissors line, then strip.
    Scissors,
    /// Whitespace-strip and collapse consecutive blank lines (the default).
    Default,
}

/// The `Commit` struct is used to represent a commit object.
///
/// - The tree object SHA points to the top level tree for this commit, which reflects the complete
///   state of the repository at the time of the commit. The tree object in turn points to blobs and
///   subtrees which represent the files in the repository.
/// - The parent commit SHAs allow Git to construct a linked list of commits and build the full
///   commit history. By chaining together commits in this fashion, Git is able to represent the entire
///   history of a repository with a single commit object at its root.
/// - The author and committer fields contain the name, email address, timestamp and timezone.
/// - The message field contains the commit message, which maybe include signed or DCO.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}
impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Commit {
        let mut commit = Commit {
            id: ObjectHash::default(),
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message: message.to_string(),
        };
        // The id is always the real SHA-1 over the commit's canonical bytes,
        // never a placeholder.
        let hash = ObjectHash::from_type_and_data(ObjectType::Commit, &commit.to_data().unwrap());
        commit.id = hash;
        commit
    }

    /// Creates a new commit object from a tree ID and a list of parent commit IDs, using the
    /// current time for both author and committer signatures.
    pub fn from_tree_id(
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Commit {
        let author = Signature::from_data(
            format!(
                "author git-internal <git-internal@localhost> {} +0000",
                chrono::Utc::now().timestamp()
            )
            .into_bytes(),
        )
        .unwrap();
        let committer = Signature::from_data(
            format!(
                "committer git-internal <git-internal@localhost> {} +0000",
                chrono::Utc::now().timestamp()
            )
            .into_bytes(),
        )
        .unwrap();
        Commit::new(author, committer, tree_id, parent_commit_ids, message)
    }

    /// Splits the message into `(subject, body)`: the first line, and everything after the
    /// first blank line.
    pub fn subject_and_body(&self) -> (&str, &str) {
        let subject = self.message.lines().next().unwrap_or("");
        match self.message.find("\n\n") {
            Some(pos) => (subject, self.message[pos + 2..].trim_start_matches('\n')),
            None => (subject, ""),
        }
    }

    /// Non-fatal warnings about the commit message shape (spec §4.2): subject too long,
    /// subject ends in a period, or missing blank line before the body.
    pub fn message_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let (subject, _) = self.subject_and_body();
        if subject.chars().count() > 72 {
            warnings.push("subject line exceeds 72 characters".to_string());
        }
        if subject.ends_with('.') {
            warnings.push("subject line ends in a period".to_string());
        }
        let mut lines = self.message.lines();
        let _ = lines.next();
        if let Some(second) = lines.next() {
            if !second.is_empty() {
                warnings.push("missing blank line between subject and body".to_string());
            }
        }
        warnings
    }

    /// Applies a cleanup mode to a raw message, as would be done before constructing a commit.
    pub fn clean_message(raw: &str, mode: CleanupMode) -> String {
        match mode {
            CleanupMode::Verbatim => raw.to_string(),
            CleanupMode::WhitespaceStrip => raw.trim().to_string(),
            CleanupMode::Strip => {
                let stripped: String = raw
                    .lines()
                    .filter(|line| !line.trim_start().starts_with('#'))
                    .collect::<Vec<_>>()
                    .join("\n");
                stripped.trim().to_string()
            }
            CleanupMode::Scissors => {
                let marker = "------------------------ >8 ------------------------";
                let truncated = match raw.find(marker) {
                    Some(pos) => &raw[..pos],
                    None => raw,
                };
                truncated.trim().to_string()
            }
            CleanupMode::Default => {
                let mut out = String::new();
                let mut prev_blank = false;
                for line in raw.trim().lines() {
                    let trimmed = line.trim_end();
                    let blank = trimmed.is_empty();
                    if blank && prev_blank {
                        continue;
                    }
                    out.push_str(trimmed);
                    out.push('\n');
                    prev_blank = blank;
                }
                out.trim_end_matches('\n').to_string()
            }
        }
    }

    /// Formats the commit message by extracting the first meaningful line.
    ///
    /// If the message contains a PGP signature, it returns the first non-empty line
    /// after the signature block. Otherwise, it returns the first non-empty line
    /// in the message. If no such line exists, it returns the original message.
    pub fn format_message(&self) -> String {
        let mut lines = self.message.lines();

        // If a PGP signature is present, skip lines until after the signature ends
        if let Some(pos) = self
            .message
            .lines()
            .position(|line| line.contains("-----END PGP SIGNATURE-----"))
        {
            return self
                .message
                .lines()
                .skip(pos + 1)
                .find(|line| !line.trim().is_empty())
                .map(|line| line.to_owned())
                .unwrap_or_else(|| self.message.clone());
        }

        // Return the first non-empty line from the start
        lines
            .find(|line| !line.trim().is_empty())
            .map(|line| line.to_owned())
            .unwrap_or_else(|| self.message.clone())
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut commit = data;
        // Find the tree id and remove it from the data
        let tree_end = commit
            .find_byte(0x0a)
            .ok_or(GitError::InvalidCommitObject)?;
        let tree_id: ObjectHash = ObjectHash::from_str(
            String::from_utf8(commit[5..tree_end].to_owned()) // 5 is the length of "tree "
                .map_err(|e| GitError::ConversionError(e.to_string()))?
                .as_str(),
        )
        .map_err(GitError::InvalidHashValue)?;
        let binding = commit[tree_end + 1..].to_vec(); // Move past the tree id
        commit = &binding;

        // Find the parent commit ids and remove them from the data
        let author_begin = commit
            .find("author")
            .ok_or(GitError::InvalidCommitObject)?;
        let parent_commit_ids: Vec<ObjectHash> = commit[..author_begin]
            .find_iter("parent")
            .map(|parent| {
                let parent_end = commit[parent..].find_byte(0x0a).unwrap();
                ObjectHash::from_str(
                    // 7 is the length of "parent "
                    String::from_utf8(commit[parent + 7..parent + parent_end].to_owned())
                        .unwrap()
                        .as_str(),
                )
                .unwrap()
            })
            .collect();
        let binding = commit[author_begin..].to_vec();
        commit = &binding;

        // Find the author and committer and remove them from the data
        // 0x0a is the newline character
        let author =
            Signature::from_data(commit[..commit.find_byte(0x0a).unwrap()].to_vec()).unwrap();

        let binding = commit[commit.find_byte(0x0a).unwrap() + 1..].to_vec();
        commit = &binding;
        let committer =
            Signature::from_data(commit[..commit.find_byte(0x0a).unwrap()].to_vec()).unwrap();

        // The rest is the message
        let message = unsafe {
            String::from_utf8_unchecked(commit[commit.find_byte(0x0a).unwrap() + 1..].to_vec())
        };
        Ok(Commit {
            id: hash,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn get_size(&self) -> usize {
        self.to_data().map(|d| d.len()).unwrap_or(0)
    }

    /// [Git-Internals-Git-Objects](https://git-scm.com/book/en/v2/Git-Internals-Git-Objects)
    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.extend(&[0x0a]);

        for parent_tree_id in &self.parent_commit_ids {
            data.extend(b"parent ");
            data.extend(parent_tree_id.to_string().as_bytes());
            data.extend(&[0x0a]);
        }

        data.extend(self.author.to_data()?);
        data.extend(&[0x0a]);
        data.extend(self.committer.to_data()?);
        data.extend(&[0x0a]);
        // Important! or Git Server can't parse & reply: unpack-objects abnormal exit
        // We can move [0x0a] to message instead here.
        // data.extend(&[0x0a]);
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn basic_commit() -> Commit {
        let raw_commit = br#"tree 341e54913a3a43069f2927cc0f703e5a9f730df1
author benjamin.747 <benjamin.747@outlook.com> 1757467768 +0800
committer benjamin.747 <benjamin.747@outlook.com> 1757491219 +0800
gpgsig -----BEGIN PGP SIGNATURE-----

 iQJNBAABCAA3FiEEs4MaYUV7JcjxsVMPyqxGczTZ6K4FAmjBMC4ZHGJlbmphbWlu
 Ljc0N0BvdXRsb29rLmNvbQAKCRDKrEZzNNnorj73EADNpsyLAHsB3NgoeH+uy9Vq
 G2+LRtlvqv3QMK7vbQUadXHlQYWk25SIk+WJ1kG1AnUy5fqOrLSDTA1ny+qwpH8O
 +2sKCF/S1wlzqGWjCcRH5/ir9srsGIn9HbNqBjmU22NJ6Dt2jnqoUvtWfPwyqwWg
 VpjYlj390cFdXTpH5hMvtlmUQB+zCSKtWQW2Ur64h/UsGtllARlACi+KHQQmA2/p
 FLWNddvfJQpPM597DkGohQTD68g0PqOBhUkOHduHq7VHy68DVW+07bPNXK8JhJ8S
 4dyV1sZwcVcov0GcKl0wUbEqzy4gf+zV7DQhkfrSRQMBdo5vCWahYj1AbgaTiu8a
 hscshYDuWWqpxBU/+nCxOPskV29uUG1sRyXp3DqmKJZpnO9CVdw3QaVrqnMEeh2S
 t/wYRI9aI1A+Mi/DETom5ifTVygMkK+3m1h7pAMOlblFEdZx2sDXPRG2IEUcatr4
 Jb2+7PUJQXxUQnwHC7xHHxRh6a2h8TfEJfSoEyrgzxZ0CRxJ6XMJaJu0UwZ2xMsx
 Lgmeu6miB/imwxz5R5RL2yVHbgllSlO5l12AIeBaPoarKXYPSALigQnKCXu5OM3x
 Jq5qsSGtxdr6S1VgLyYHR4o69bQjzBp9K47J3IXqvrpo/ZiO/6Mspk2ZRWhGj82q
 e3qERPp5b7+hA+M7jKPyJg==
 =UeLf
 -----END PGP SIGNATURE-----

test parse commit from bytes
"#;

        let hash = ObjectHash::from_str("57d7685c60213a9da465cf900f31933be3a7ee39").unwrap();
        Commit::from_bytes(raw_commit, hash).unwrap()
    }

    #[test]
    fn from_bytes_parses_gpgsig_and_fields() {
        let commit = basic_commit();

        assert_eq!(
            commit.id,
            ObjectHash::from_str("57d7685c60213a9da465cf900f31933be3a7ee39").unwrap()
        );
        assert_eq!(
            commit.tree_id,
            ObjectHash::from_str("341e54913a3a43069f2927cc0f703e5a9f730df1").unwrap()
        );
        assert_eq!(commit.author.name, "benjamin.747");
        assert_eq!(commit.author.email, "benjamin.747@outlook.com");
        assert_eq!(commit.committer.name, "benjamin.747");
        assert!(commit.message.contains("-----BEGIN PGP SIGNATURE-----"));
        assert!(commit.message.contains("-----END PGP SIGNATURE-----"));
        assert!(commit.message.contains("test parse commit from bytes"));
    }

    #[test]
    fn format_message_skips_past_signature() {
        let commit = basic_commit();
        assert_eq!(commit.format_message(), "test parse commit from bytes");
    }

    #[test]
    fn new_computes_real_sha1_id() {
        let author =
            Signature::from_data(b"author a <a@b.com> 1700000000 +0000".to_vec()).unwrap();
        let committer =
            Signature::from_data(b"committer a <a@b.com> 1700000000 +0000".to_vec()).unwrap();
        let commit = Commit::new(author, committer, ObjectHash::zero(), vec![], "init");
        let recomputed = ObjectHash::from_type_and_data(ObjectType::Commit, &commit.to_data().unwrap());
        assert_eq!(commit.id, recomputed);
    }

    #[test]
    fn message_warnings_flag_long_subject_and_trailing_period() {
        let author =
            Signature::from_data(b"author a <a@b.com> 1700000000 +0000".to_vec()).unwrap();
        let committer =
            Signature::from_data(b"committer a <a@b.com> 1700000000 +0000".to_vec()).unwrap();
        let long_subject = "x".repeat(80) + ".";
        let commit = Commit::new(author, committer, ObjectHash::zero(), vec![], &long_subject);
        let warnings = commit.message_warnings();
        assert!(warnings.iter().any(|w| w.contains("72 characters")));
        assert!(warnings.iter().any(|w| w.contains("period")));
    }

    #[test]
    fn clean_message_strip_removes_comment_lines() {
        let raw = "subject\n\n# a comment\nbody line\n";
        let cleaned = Commit::clean_message(raw, CleanupMode::Strip);
        assert!(!cleaned.contains('#'));
        assert!(cleaned.contains("body line"));
    }

    #[test]
    fn clean_message_default_collapses_blank_lines() {
        let raw = "subject\n\n\n\nbody\n";
        let cleaned = Commit::clean_message(raw, CleanupMode::Default);
        assert!(!cleaned.contains("\n\n\n"));
    }
}
