//! LFS Object ID (OID) - the key an object is stored under.
//!
//! Clients normally send the SHA256 hex digest of the content, but the
//! server treats the OID as an opaque, untrusted string. The only hard
//! requirement is that it cannot name anything outside the object tree.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Error, Result};

/// Characters that would let an OID address a different directory.
pub(crate) const FORBIDDEN: &[char] = &['/', '\\', '\0'];

/// A validated LFS Object ID.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Oid {
    value: String,
}

impl Oid {
    /// Validate an untrusted OID string.
    ///
    /// Rejects empty OIDs, OIDs containing a path separator, and OIDs whose
    /// shard directories would be `.` or `..`.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::InvalidOid("empty OID".into()));
        }
        if value.contains(FORBIDDEN) {
            return Err(Error::InvalidOid(format!(
                "{:?} contains a path separator",
                value
            )));
        }

        let oid = Oid {
            value: value.to_string(),
        };
        let (first, second) = oid.shards();
        if [value, first, second].iter().any(|c| *c == "." || *c == "..") {
            return Err(Error::InvalidOid(format!(
                "{:?} resolves to a relative path component",
                value
            )));
        }

        Ok(oid)
    }

    /// Compute the OID (SHA256 hex digest) of content.
    pub fn from_content(content: &[u8]) -> Self {
        Oid {
            value: hex::encode(Sha256::digest(content)),
        }
    }

    /// The two shard directory names: characters `[0, 2)` and `[2, 4)`.
    ///
    /// Short OIDs yield shorter, possibly empty, shards.
    pub fn shards(&self) -> (&str, &str) {
        let (first, rest) = split_chars(&self.value, 2);
        let (second, _) = split_chars(rest, 2);
        (first, second)
    }

    /// Get the OID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// Split after `n` characters, or return everything if shorter.
fn split_chars(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.value)
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl std::str::FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Oid::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_from_content() {
        let oid = Oid::from_content(b"Hello, World!");
        // SHA256 of "Hello, World!"
        assert_eq!(
            oid.as_str(),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_oid_shards() {
        let oid = Oid::parse("deadbeef01").unwrap();
        assert_eq!(oid.shards(), ("de", "ad"));

        let short = Oid::parse("a1").unwrap();
        assert_eq!(short.shards(), ("a1", ""));

        let three = Oid::parse("abc").unwrap();
        assert_eq!(three.shards(), ("ab", "c"));
    }

    #[test]
    fn test_oid_rejects_separators() {
        assert!(matches!(Oid::parse("../etc/passwd"), Err(Error::InvalidOid(_))));
        assert!(matches!(Oid::parse("ab/cd"), Err(Error::InvalidOid(_))));
        assert!(matches!(Oid::parse("ab\\cd"), Err(Error::InvalidOid(_))));
        assert!(matches!(Oid::parse(""), Err(Error::InvalidOid(_))));
    }

    #[test]
    fn test_oid_rejects_dot_components() {
        assert!(Oid::parse("..").is_err());
        assert!(Oid::parse(".").is_err());
        assert!(Oid::parse("..abcd").is_err());
        assert!(Oid::parse("ab..cd").is_err());
        assert!(Oid::parse("ab.").is_err());
        // Dots elsewhere are harmless.
        assert!(Oid::parse("abcd..").is_ok());
    }

    #[test]
    fn test_oid_multibyte_shards() {
        let oid = Oid::parse("éèàù").unwrap();
        assert_eq!(oid.shards(), ("éè", "àù"));
    }
}
