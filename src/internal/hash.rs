//! Object hash algorithms and fixed-width object identifiers for SHA-1 and SHA-256 repositories.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::internal::errors::GitError;

/// Hash algorithm used by a repository's object database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    #[default]
    Sha1,
    Sha256,
}

impl HashKind {
    /// Size of a raw digest in bytes.
    pub const fn size(&self) -> usize {
        match self {
            HashKind::Sha1 => 20,
            HashKind::Sha256 => 32,
        }
    }

    /// Length of a digest rendered as lowercase hex.
    pub const fn hex_len(&self) -> usize {
        self.size() * 2
    }

    /// The all-zero object id, used by diff output to mean "deleted".
    pub const fn zero_oid(&self) -> ObjectId {
        match self {
            HashKind::Sha1 => ObjectId::Sha1([0; 20]),
            HashKind::Sha256 => ObjectId::Sha256([0; 32]),
        }
    }

    pub fn is_zero_oid(&self, oid: &ObjectId) -> bool {
        oid.kind() == *self && oid.is_zero()
    }

    /// Parse a full-length hex object id of this hash kind.
    pub fn from_hex(&self, hex_str: &str) -> Result<ObjectId, GitError> {
        if hex_str.len() != self.hex_len() {
            return Err(GitError::InvalidObjectId(format!(
                "invalid object ID length {} for {self}, expected {}",
                hex_str.len(),
                self.hex_len()
            )));
        }
        let bytes = hex::decode(hex_str)
            .map_err(|e| GitError::InvalidObjectId(format!("{hex_str:?}: {e}")))?;
        ObjectId::from_bytes(*self, &bytes)
    }

    /// Name as printed by `git rev-parse --show-object-format`.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(HashKind::Sha1),
            "sha256" => Ok(HashKind::Sha256),
            _ => Err(GitError::InvalidObjectId(format!(
                "unsupported object format: '{s}'"
            ))),
        }
    }
}

/// A binary object identifier tagged with its hash algorithm.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    pub fn from_bytes(kind: HashKind, bytes: &[u8]) -> Result<Self, GitError> {
        let invalid = || {
            GitError::InvalidObjectId(format!(
                "expected {} bytes for {kind}, got {}",
                kind.size(),
                bytes.len()
            ))
        };
        match kind {
            HashKind::Sha1 => Ok(ObjectId::Sha1(bytes.try_into().map_err(|_| invalid())?)),
            HashKind::Sha256 => Ok(ObjectId::Sha256(bytes.try_into().map_err(|_| invalid())?)),
        }
    }

    pub fn kind(&self) -> HashKind {
        match self {
            ObjectId::Sha1(_) => HashKind::Sha1,
            ObjectId::Sha256(_) => HashKind::Sha256,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ObjectId::Sha1(bytes) => bytes,
            ObjectId::Sha256(bytes) => bytes,
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}:{})", self.kind(), self.to_hex())
    }
}

/// Parses a hex id, inferring the hash kind from its length.
impl FromStr for ObjectId {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            40 => HashKind::Sha1.from_hex(s),
            64 => HashKind::Sha256.from_hex(s),
            len => Err(GitError::InvalidObjectId(format!(
                "invalid hash length {len}, expected 40 or 64"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_round_trips_through_hex() {
        let hex_str = "d670460b4b4aece5915caf5c68d12f560a9fe3e4";
        let oid = HashKind::Sha1.from_hex(hex_str).unwrap();
        assert_eq!(oid.kind(), HashKind::Sha1);
        assert_eq!(oid.to_string(), hex_str);
        assert_eq!(ObjectId::from_str(hex_str).unwrap(), oid);
    }

    #[test]
    fn test_sha256_lengths() {
        assert_eq!(HashKind::Sha256.size(), 32);
        assert_eq!(HashKind::Sha256.hex_len(), 64);
        let zero = HashKind::Sha256.zero_oid();
        assert_eq!(zero.to_string(), "0".repeat(64));
        assert!(HashKind::Sha256.is_zero_oid(&zero));
        assert!(!HashKind::Sha1.is_zero_oid(&zero));
    }

    #[test]
    fn test_from_hex_rejects_wrong_length_and_digits() {
        assert!(HashKind::Sha1.from_hex("abc").is_err());
        assert!(HashKind::Sha1.from_hex(&"z".repeat(40)).is_err());
        assert!(HashKind::Sha256.from_hex(&"a".repeat(40)).is_err());
        assert!(ObjectId::from_str(&"a".repeat(41)).is_err());
    }

    #[test]
    fn test_object_format_names() {
        assert_eq!("sha256".parse::<HashKind>().unwrap(), HashKind::Sha256);
        assert_eq!(HashKind::Sha1.to_string(), "sha1");
        assert!("md5".parse::<HashKind>().is_err());
    }
}
