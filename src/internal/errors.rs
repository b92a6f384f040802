//! Error type shared by the object reader, its cache and the reference helpers.

use std::io;

use thiserror::Error;

use crate::internal::reference::ReferenceError;

#[derive(Debug, Error)]
pub enum GitError {
    /// git-cat-file(1) answered `missing` for the revision.
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error("invalid object ID: {0}")]
    InvalidObjectId(String),

    /// Unexpected reply framing. The reader is poisoned.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The child closed its pipes. `stderr` holds whatever it printed, when
    /// that could be collected.
    #[error("git process terminated unexpectedly{}", stderr_hint(.stderr))]
    ChildTerminated { stderr: String },

    #[error("{0}")]
    QueueBusy(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("object queue is closed")]
    Closed,

    #[error("no outstanding request")]
    NoOutstandingRequest,

    #[error("invalid reference: {0}")]
    InvalidReference(#[from] ReferenceError),

    #[error("git {command} failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to spawn git: {0}")]
    SpawnFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
}

fn stderr_hint(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl GitError {
    pub(crate) fn child_terminated() -> Self {
        GitError::ChildTerminated {
            stderr: String::new(),
        }
    }

    /// Returns true for the only error kind callers may skip over.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitError::NotFound(_))
    }

    /// Maps an I/O error raised while talking to the child. Errors produced by
    /// [`Object`](crate::internal::catfile::Object) carry a `GitError` inside
    /// and are unwrapped here.
    pub(crate) fn from_child_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                return GitError::child_terminated();
            }
            io::ErrorKind::UnexpectedEof if err.get_ref().is_none() => {
                return GitError::child_terminated();
            }
            _ => {}
        }
        if err.get_ref().is_some_and(|inner| inner.is::<GitError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(git_err) = inner.downcast::<GitError>() {
                    return *git_err;
                }
            }
            return GitError::ProtocolError("unreadable child error".to_string());
        }
        GitError::IOError(err)
    }

    /// Wraps into an `io::Error` so that it can travel through `AsyncRead`.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match self {
            GitError::ChildTerminated { .. } | GitError::ProtocolError(_) => {
                io::ErrorKind::UnexpectedEof
            }
            // Not `Interrupted`: readers retry on that kind.
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}
