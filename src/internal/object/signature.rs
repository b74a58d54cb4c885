//! Author/committer/tagger signature lines: `<name> <email> <timestamp> <tz>`.

use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which signature line this is: distinguishes `author`/`committer`/`tagger`
/// so `Signature::to_data` can re-emit the right prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureType {
    Author,
    Committer,
    Tagger,
}

impl Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureType::Author => write!(f, "author"),
            SignatureType::Committer => write!(f, "committer"),
            SignatureType::Tagger => write!(f, "tagger"),
        }
    }
}

impl SignatureType {
    fn from_prefix(s: &str) -> Result<Self, GitError> {
        match s {
            "author" => Ok(SignatureType::Author),
            "committer" => Ok(SignatureType::Committer),
            "tagger" => Ok(SignatureType::Tagger),
            _ => Err(GitError::InvalidSignatureType(s.to_string())),
        }
    }
}

/// A single author/committer/tagger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Git's `+HHMM`/`-HHMM` timezone offset string.
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} <{}> {} {}",
            self.signature_type, self.name, self.email, self.timestamp, self.timezone
        )
    }
}

impl Signature {
    pub fn new(signature_type: SignatureType, name: String, email: String) -> Self {
        Signature {
            signature_type,
            name,
            email,
            timestamp: chrono::Utc::now().timestamp(),
            timezone: "+0000".to_string(),
        }
    }

    /// Parses a single signature line, e.g.
    /// `author A U Thor <author@example.com> 1243040974 -0700`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let data_str = data
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?;

        let email_begin = data_str
            .find('<')
            .ok_or_else(|| GitError::InvalidSignatureType(data_str.to_string()))?;
        let email_end = data_str
            .find('>')
            .ok_or_else(|| GitError::InvalidSignatureType(data_str.to_string()))?;

        let prefix_and_name = data_str[..email_begin].trim_end();
        let mut parts = prefix_and_name.splitn(2, ' ');
        let prefix = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default().to_string();
        let signature_type = SignatureType::from_prefix(prefix)?;

        let email = data_str[email_begin + 1..email_end].to_string();

        let tail = data_str[email_end + 1..].trim();
        let mut tail_parts = tail.split_whitespace();
        let timestamp: i64 = tail_parts
            .next()
            .unwrap_or("0")
            .parse()
            .map_err(|_| GitError::InvalidSignatureType(data_str.to_string()))?;
        let timezone = tail_parts.next().unwrap_or("+0000").to_string();

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_author_line() {
        let line = b"author A U Thor <author@example.com> 1243040974 -0700".to_vec();
        let sig = Signature::from_data(line).unwrap();
        assert_eq!(sig.signature_type, SignatureType::Author);
        assert_eq!(sig.name, "A U Thor");
        assert_eq!(sig.email, "author@example.com");
        assert_eq!(sig.timestamp, 1243040974);
        assert_eq!(sig.timezone, "-0700");
    }

    #[test]
    fn round_trips_to_data() {
        let line = b"committer Jane Doe <jane@example.com> 1700000000 +0000".to_vec();
        let sig = Signature::from_data(line.clone()).unwrap();
        assert_eq!(sig.to_data().unwrap(), line);
    }

    #[test]
    fn rejects_unknown_prefix() {
        let line = b"reviewer A <a@b.com> 1 +0000".to_vec();
        assert!(Signature::from_data(line).is_err());
    }
}
