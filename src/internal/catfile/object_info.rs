//! Object headers as reported by git-cat-file(1): `<oid> SP <type> SP <size>`.

use std::{fmt, str::FromStr};

use crate::internal::{
    errors::GitError,
    hash::{HashKind, ObjectId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
    Unknown,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
            ObjectType::Tag => "tag",
            ObjectType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised type names map to [`ObjectType::Unknown`].
impl FromStr for ObjectType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "blob" => ObjectType::Blob,
            "tree" => ObjectType::Tree,
            "commit" => ObjectType::Commit,
            "tag" => ObjectType::Tag,
            _ => ObjectType::Unknown,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub oid: ObjectId,
    pub object_type: ObjectType,
    pub size: u64,
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.oid, self.object_type, self.size)
    }
}

/// Parses one reply header with its terminator already stripped.
///
/// `<revision> missing` and `<revision> ambiguous` become
/// [`GitError::NotFound`]; anything else malformed is a protocol error.
pub fn parse_object_info(line: &[u8], hash_kind: HashKind) -> Result<ObjectInfo, GitError> {
    let text = std::str::from_utf8(line).map_err(|_| {
        GitError::ProtocolError(format!(
            "invalid object info line: {:?}",
            String::from_utf8_lossy(line)
        ))
    })?;

    for suffix in [" missing", " ambiguous"] {
        if let Some(revision) = text.strip_suffix(suffix) {
            return Err(GitError::NotFound(revision.to_string()));
        }
    }

    let mut fields = text.split(' ');
    let (Some(oid), Some(object_type), Some(size), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(GitError::ProtocolError(format!(
            "invalid object info line: {text:?}"
        )));
    };

    let oid = hash_kind
        .from_hex(oid)
        .map_err(|e| GitError::ProtocolError(format!("invalid object ID in header: {e}")))?;
    let size = size
        .parse::<u64>()
        .map_err(|e| GitError::ProtocolError(format!("invalid object size {size:?}: {e}")))?;
    let Ok(object_type) = object_type.parse::<ObjectType>();

    Ok(ObjectInfo {
        oid,
        object_type,
        size,
    })
}
