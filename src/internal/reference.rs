//! Revisions, reference names, Git's refname rules, and reference enumeration through
//! git-for-each-ref(1) and git-symbolic-ref(1).

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::internal::{
    errors::GitError,
    executor::{GitCommand, RepositoryExecutor},
    hash::{HashKind, ObjectId},
};

/// Anything git can resolve: a branch, a tag, a hex object id, `rev^{commit}`,
/// `commit:path` and so on. See gitrevisions(7).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(revision: impl Into<String>) -> Self {
        Revision(revision.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local syntax checks before a revision is put on the cat-file wire.
    pub fn validate(&self) -> Result<(), GitError> {
        if self.0.is_empty() {
            return Err(GitError::InvalidRevision("empty revision".to_string()));
        }
        if self.0.contains('\n') {
            return Err(GitError::InvalidRevision(format!(
                "revision contains newline: {:?}",
                self.0
            )));
        }
        if self.0.contains('\0') {
            return Err(GitError::InvalidRevision(format!(
                "revision contains NUL: {:?}",
                self.0
            )));
        }
        Ok(())
    }

    /// `rev^{commit}`, peeling tags down to the commit they point at.
    pub fn peel_to_commit(&self) -> Revision {
        Revision(format!("{}^{{commit}}", self.0))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(value: &str) -> Self {
        Revision(value.to_string())
    }
}

impl From<String> for Revision {
    fn from(value: String) -> Self {
        Revision(value)
    }
}

impl From<&ObjectId> for Revision {
    fn from(value: &ObjectId) -> Self {
        Revision(value.to_hex())
    }
}

/// A fully qualified reference name such as `refs/heads/main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceName(String);

impl ReferenceName {
    pub fn new(name: impl Into<String>) -> Self {
        ReferenceName(name.into())
    }

    /// Always prepends `refs/heads/`; `branch` is taken as unqualified.
    pub fn from_branch_name(branch: &str) -> Self {
        ReferenceName(format!("refs/heads/{branch}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The branch name if this is `refs/heads/<branch>`.
    pub fn branch(&self) -> Option<&str> {
        self.0.strip_prefix("refs/heads/")
    }

    pub fn revision(&self) -> Revision {
        Revision(self.0.clone())
    }

    pub fn validate(&self) -> Result<(), ReferenceError> {
        validate_reference(&self.0)
    }
}

impl fmt::Display for ReferenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
    Direct(ObjectId),
    Symbolic(ReferenceName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: ReferenceName,
    pub target: ReferenceTarget,
}

impl Reference {
    pub fn direct(name: ReferenceName, target: ObjectId) -> Self {
        Self {
            name,
            target: ReferenceTarget::Direct(target),
        }
    }

    pub fn symbolic(name: ReferenceName, target: ReferenceName) -> Self {
        Self {
            name,
            target: ReferenceTarget::Symbolic(target),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, ReferenceTarget::Symbolic(_))
    }
}

/// One variant per rule of git's `check_or_sanitize_refname()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("HEAD reference not allowed")]
    Head,
    #[error("reference is not fully qualified")]
    NotFullyQualified,
    #[error("refs/ is not a valid reference")]
    EmptyName,
    #[error("reference must not end with slash")]
    TrailingSlash,
    #[error("reference must not end with dot")]
    TrailingDot,
    #[error("reference must not contain @{{")]
    ReflogSyntax,
    #[error("reference must not contain double dots")]
    DoubleDot,
    #[error("reference must not contain space characters")]
    Whitespace,
    #[error("reference must not contain special characters")]
    SpecialCharacter,
    #[error("reference must not contain control characters")]
    ControlCharacter,
    #[error("empty component is not allowed")]
    EmptyComponent,
    #[error("component must not start with dot")]
    ComponentLeadingDot,
    #[error("component must not end with .lock")]
    ComponentLockSuffix,
}

/// Checks a reference name the way git-check-ref-format(1) does for fully
/// qualified names. Divergence from git is a bug.
pub fn validate_reference(name: &str) -> Result<(), ReferenceError> {
    if name == "HEAD" {
        return Err(ReferenceError::Head);
    }
    let name = name
        .strip_prefix("refs/")
        .ok_or(ReferenceError::NotFullyQualified)?;
    if name.is_empty() {
        return Err(ReferenceError::EmptyName);
    }
    if name.ends_with('/') {
        return Err(ReferenceError::TrailingSlash);
    }
    if name.ends_with('.') {
        return Err(ReferenceError::TrailingDot);
    }
    if name.contains("@{") {
        return Err(ReferenceError::ReflogSyntax);
    }
    if name.contains("..") {
        return Err(ReferenceError::DoubleDot);
    }

    for byte in name.bytes() {
        match byte {
            b' ' | b'\t' | b'\n' => return Err(ReferenceError::Whitespace),
            b':' | b'?' | b'[' | b'\\' | b'^' | b'~' | b'*' | 0x7f => {
                return Err(ReferenceError::SpecialCharacter);
            }
            b if b < 0x20 => return Err(ReferenceError::ControlCharacter),
            _ => {}
        }
    }

    for component in name.split('/') {
        if component.is_empty() {
            return Err(ReferenceError::EmptyComponent);
        }
        if component.starts_with('.') {
            return Err(ReferenceError::ComponentLeadingDot);
        }
        if component.ends_with(".lock") {
            return Err(ReferenceError::ComponentLockSuffix);
        }
    }
    Ok(())
}

/// How the hosting product treats an internal reference namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalReferenceType {
    /// Never advertised, never writable.
    Hidden,
    /// Advertised, but not writable.
    Readonly,
}

pub const INTERNAL_REF_PREFIXES: &[(&str, InternalReferenceType)] = &[
    ("refs/environments/", InternalReferenceType::Readonly),
    ("refs/keep-around/", InternalReferenceType::Hidden),
    ("refs/merge-requests/", InternalReferenceType::Readonly),
    ("refs/pipelines/", InternalReferenceType::Readonly),
    ("refs/remotes/", InternalReferenceType::Hidden),
    ("refs/tmp/", InternalReferenceType::Hidden),
];

pub fn internal_reference_type(name: &str) -> Option<InternalReferenceType> {
    INTERNAL_REF_PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetReferencesConfig {
    /// for-each-ref patterns; empty means every reference.
    pub patterns: Vec<String>,
    pub limit: Option<u32>,
}

const FOR_EACH_REF_FORMAT: &str = "--format=%(refname)%00%(objectname)%00%(symref)";

/// Enumerates references via git-for-each-ref(1).
pub async fn get_references(
    ctx: &CancellationToken,
    executor: &dyn RepositoryExecutor,
    config: &GetReferencesConfig,
) -> Result<Vec<Reference>, GitError> {
    let hash_kind = executor.object_hash(ctx).await?;
    let mut command = GitCommand::new("for-each-ref").flag(FOR_EACH_REF_FORMAT);
    if let Some(limit) = config.limit.filter(|limit| *limit > 0) {
        command = command.flag(format!("--count={limit}"));
    }
    command = command.args(config.patterns.iter().cloned());

    let output = executor.exec(ctx, command).await?.output(ctx).await?;
    parse_references(&output, hash_kind)
}

/// Parses `refname NUL objectname NUL symref` lines.
pub fn parse_references(output: &[u8], hash_kind: HashKind) -> Result<Vec<Reference>, GitError> {
    let mut refs = Vec::new();
    for line in output.split(|b| *b == b'\n').filter(|line| !line.is_empty()) {
        let fields: Vec<&[u8]> = line.splitn(3, |b| *b == 0).collect();
        let [name, object, symref] = fields.as_slice() else {
            return Err(GitError::ProtocolError(format!(
                "unexpected reference format: {:?}",
                String::from_utf8_lossy(line)
            )));
        };
        let name = ReferenceName::new(String::from_utf8_lossy(name));
        if symref.is_empty() {
            let oid = hash_kind.from_hex(&String::from_utf8_lossy(object))?;
            refs.push(Reference::direct(name, oid));
        } else {
            refs.push(Reference::symbolic(
                name,
                ReferenceName::new(String::from_utf8_lossy(symref)),
            ));
        }
    }
    Ok(refs)
}

/// Reads a symbolic reference such as `HEAD`.
pub async fn get_symbolic_ref(
    ctx: &CancellationToken,
    executor: &dyn RepositoryExecutor,
    name: &ReferenceName,
) -> Result<Reference, GitError> {
    let output = executor
        .exec(ctx, GitCommand::new("symbolic-ref").args([name.as_str()]))
        .await?
        .output(ctx)
        .await?;
    let target = parse_symbolic_ref(&output)?;
    Ok(Reference::symbolic(name.clone(), target))
}

fn parse_symbolic_ref(output: &[u8]) -> Result<ReferenceName, GitError> {
    let text = String::from_utf8_lossy(output);
    let Some((target, trailing)) = text.split_once('\n') else {
        return Err(GitError::ProtocolError(
            "expected symbolic reference to be terminated by newline".to_string(),
        ));
    };
    if !trailing.is_empty() {
        return Err(GitError::ProtocolError(
            "symbolic reference has trailing data".to_string(),
        ));
    }
    Ok(ReferenceName::new(target))
}
