//! Validation helpers shared across the object model: the invariants from
//! the data model (non-empty tree names, author identity shape, timezone
//! format) that don't belong to any single object type's parser.

use crate::errors::GitError;

/// A commit/tag identity name may not contain `<`, `>`, or a newline —
/// those characters would make the `name <email>` framing ambiguous.
pub fn validate_identity_name(name: &str) -> Result<(), GitError> {
    if name.contains('<') || name.contains('>') || name.contains('\n') {
        return Err(GitError::InvalidSignatureType(name.to_string()));
    }
    Ok(())
}

/// Git timezone offsets are `[+-]HHMM`, e.g. `+0000`, `-0700`.
pub fn validate_timezone(tz: &str) -> Result<(), GitError> {
    let bytes = tz.as_bytes();
    let valid = bytes.len() == 5
        && (bytes[0] == b'+' || bytes[0] == b'-')
        && bytes[1..].iter().all(u8::is_ascii_digit);
    if !valid {
        return Err(GitError::InvalidSignatureType(tz.to_string()));
    }
    Ok(())
}

/// A tree entry name must be non-empty, contain no path separator, and no
/// NUL byte (the on-disk framing uses NUL as the name/SHA delimiter).
pub fn validate_tree_entry_name(name: &str) -> Result<(), GitError> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(GitError::InvalidTreeItem(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identity_name_with_angle_brackets() {
        assert!(validate_identity_name("A <evil>").is_err());
        assert!(validate_identity_name("A Name").is_ok());
    }

    #[test]
    fn validates_timezone_shape() {
        assert!(validate_timezone("+0000").is_ok());
        assert!(validate_timezone("-0730").is_ok());
        assert!(validate_timezone("UTC").is_err());
    }

    #[test]
    fn rejects_empty_or_slashed_tree_name() {
        assert!(validate_tree_entry_name("").is_err());
        assert!(validate_tree_entry_name("a/b").is_err());
        assert!(validate_tree_entry_name("ok.txt").is_ok());
    }
}
