//! Commit objects parsed into structured records.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset};
use tokio_util::sync::CancellationToken;

use super::{
    object_info::{ObjectInfo, ObjectType},
    object_reader::ObjectReader,
};
use crate::internal::{
    errors::GitError,
    hash::ObjectId,
    reference::{ReferenceName, Revision},
};

/// Seconds substituted when a signature's timestamp is unparsable, negative
/// or above 2^53. Far past anything chrono can represent.
pub const FALLBACK_TIMESTAMP: i64 = 9_223_371_974_719_179_007;

const MAX_COMMIT_DATE: i64 = 1 << 53;

/// An author or committer line: `Name <email> <seconds> <tz>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub name: Bytes,
    pub email: Bytes,
    pub timestamp: Option<i64>,
    /// The offset exactly as written, e.g. `+0200`.
    pub timezone: Bytes,
}

impl Signature {
    /// The signature time in its own offset. `None` for missing or
    /// out-of-range timestamps; an unreadable offset counts as UTC.
    pub fn time(&self) -> Option<DateTime<FixedOffset>> {
        let utc = DateTime::from_timestamp(self.timestamp?, 0)?;
        let offset = parse_offset(&self.timezone).or_else(|| FixedOffset::east_opt(0))?;
        Some(utc.with_timezone(&offset))
    }

    fn parse(line: &[u8]) -> Signature {
        let mut signature = Signature::default();
        let Some(lt) = line.iter().position(|b| *b == b'<') else {
            signature.name = Bytes::copy_from_slice(trim_one_space(line));
            return signature;
        };
        signature.name = Bytes::copy_from_slice(trim_one_space(&line[..lt]));

        let rest = &line[lt + 1..];
        let Some(gt) = rest.iter().position(|b| *b == b'>') else {
            return signature;
        };
        signature.email = Bytes::copy_from_slice(&rest[..gt]);

        let mut fields = rest[gt + 1..]
            .split(|b| b.is_ascii_whitespace())
            .filter(|f| !f.is_empty());
        let Some(seconds) = fields.next() else {
            return signature;
        };
        let seconds = std::str::from_utf8(seconds)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|s| (0..=MAX_COMMIT_DATE).contains(s))
            .unwrap_or(FALLBACK_TIMESTAMP);
        signature.timestamp = Some(seconds);
        if let Some(timezone) = fields.next() {
            signature.timezone = Bytes::copy_from_slice(timezone);
        }
        signature
    }

    fn write_to(&self, out: &mut BytesMut) {
        out.put_slice(&self.name);
        out.put_slice(b" <");
        out.put_slice(&self.email);
        out.put_u8(b'>');
        if let Some(timestamp) = self.timestamp {
            out.put_slice(format!(" {timestamp}").as_bytes());
            if !self.timezone.is_empty() {
                out.put_u8(b' ');
                out.put_slice(&self.timezone);
            }
        }
    }
}

fn trim_one_space(name: &[u8]) -> &[u8] {
    name.strip_suffix(b" ").unwrap_or(name)
}

/// `+hhmm` / `-hhmm`.
fn parse_offset(timezone: &[u8]) -> Option<FixedOffset> {
    let (sign, digits) = match timezone.split_first()? {
        (b'+', digits) => (1, digits),
        (b'-', digits) => (-1, digits),
        _ => return None,
    };
    if digits.len() != 4 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let value = |d: &[u8]| i32::from(d[0] - b'0') * 10 + i32::from(d[1] - b'0');
    let seconds = value(&digits[..2]) * 3600 + value(&digits[2..]) * 60;
    FixedOffset::east_opt(sign * seconds)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: ObjectId,
    pub tree_id: Option<ObjectId>,
    pub parent_ids: Vec<ObjectId>,
    pub author: Option<Signature>,
    pub committer: Option<Signature>,
    pub subject: Bytes,
    /// Possibly truncated; see `body_size`.
    pub body: Bytes,
    /// Length of the untruncated body.
    pub body_size: u64,
}

impl Commit {
    /// Serialises the record back into raw commit form. Only exact when the
    /// body was not truncated.
    pub fn to_raw(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(256 + self.body.len());
        if let Some(tree) = &self.tree_id {
            out.put_slice(format!("tree {tree}\n").as_bytes());
        }
        for parent in &self.parent_ids {
            out.put_slice(format!("parent {parent}\n").as_bytes());
        }
        for (key, signature) in [("author", &self.author), ("committer", &self.committer)] {
            if let Some(signature) = signature {
                out.put_slice(key.as_bytes());
                out.put_u8(b' ');
                signature.write_to(&mut out);
                out.put_u8(b'\n');
            }
        }
        out.put_u8(b'\n');
        out.put_slice(&self.body);
        out.freeze()
    }
}

/// Parses the raw payload of the commit described by `info`.
pub fn parse_raw_commit(
    raw: &[u8],
    info: &ObjectInfo,
    max_body_size: usize,
) -> Result<Commit, GitError> {
    let (header, body) = match find(raw, b"\n\n") {
        Some(pos) => (&raw[..pos], &raw[pos + 2..]),
        None => (raw, &[][..]),
    };

    let hash_kind = info.oid.kind();
    let parse_id = |key: &str, value: &[u8]| {
        hash_kind
            .from_hex(&String::from_utf8_lossy(value))
            .map_err(|e| GitError::ProtocolError(format!("commit {}: bad {key}: {e}", info.oid)))
    };

    let mut commit = Commit {
        id: info.oid,
        tree_id: None,
        parent_ids: Vec::new(),
        author: None,
        committer: None,
        subject: Bytes::copy_from_slice(subject_from_body(body)),
        body: Bytes::copy_from_slice(&body[..body.len().min(max_body_size)]),
        body_size: body.len() as u64,
    };

    for line in header.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() || line[0] == b' ' {
            continue;
        }
        let Some(space) = line.iter().position(|b| *b == b' ') else {
            continue;
        };
        let (key, value) = (&line[..space], &line[space + 1..]);
        match key {
            b"tree" => commit.tree_id = Some(parse_id("tree", value)?),
            b"parent" => commit.parent_ids.push(parse_id("parent", value)?),
            b"author" => commit.author = Some(Signature::parse(value)),
            b"committer" => commit.committer = Some(Signature::parse(value)),
            _ => {}
        }
    }
    Ok(commit)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn subject_from_body(body: &[u8]) -> &[u8] {
    let first = body.split(|b| *b == b'\n').next().unwrap_or_default();
    let end = first
        .iter()
        .rposition(|b| *b != b'\r' && *b != b'\n')
        .map_or(0, |i| i + 1);
    &first[..end]
}

/// Resolves `revision` to a commit, peeling tags, and parses it.
pub async fn get_commit(
    ctx: &CancellationToken,
    reader: &dyn ObjectReader,
    revision: &Revision,
    max_body_size: usize,
) -> Result<Commit, GitError> {
    let mut object = reader.object(ctx, &revision.peel_to_commit()).await?;
    let info = object.info().clone();
    let raw = object.read_to_vec().await?;
    check_commit(&info)?;
    parse_raw_commit(&raw, &info, max_body_size)
}

/// Looks up many branches or tags on one queue lease. Names that do not
/// resolve to a commit are left out.
pub async fn list_commits_by_ref_name(
    ctx: &CancellationToken,
    reader: &dyn ObjectReader,
    names: &[ReferenceName],
    max_body_size: usize,
) -> Result<Vec<Commit>, GitError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let mut queue = reader.object_queue(ctx)?;
    for name in names {
        queue
            .request_object(ctx, &name.revision().peel_to_commit())
            .await?;
    }
    queue.flush(ctx).await?;

    let mut commits = Vec::with_capacity(names.len());
    for _ in names {
        let mut object = match queue.read_object(ctx).await {
            Ok(object) => object,
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err),
        };
        let info = object.info().clone();
        let raw = object.read_to_vec().await?;
        drop(object);
        check_commit(&info)?;
        commits.push(parse_raw_commit(&raw, &info, max_body_size)?);
    }
    Ok(commits)
}

fn check_commit(info: &ObjectInfo) -> Result<(), GitError> {
    if info.object_type != ObjectType::Commit {
        return Err(GitError::ProtocolError(format!(
            "expected commit for {}, got {}",
            info.oid, info.object_type
        )));
    }
    Ok(())
}
