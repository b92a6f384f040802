//! Spawning git subcommands inside a repository with piped stdio.
//!
//! [`RepositoryExecutor`] is the seam between the object reader and the
//! process world: the real [`LocalRepository`] runs the configured git
//! binary, while tests substitute an in-process double.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    process::{Child, Command},
    sync::OnceCell,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::internal::{config::GitConfig, errors::GitError, hash::HashKind};

pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Maximum stderr bytes kept for error messages.
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// A git invocation: `git <name> <flags...> <args...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    pub name: String,
    pub flags: Vec<String>,
    pub args: Vec<String>,
    pub setup_stdin: bool,
}

impl GitCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: Vec::new(),
            args: Vec::new(),
            setup_stdin: false,
        }
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_stdin(mut self) -> Self {
        self.setup_stdin = true;
        self
    }
}

/// Identity of a repository for reader pooling. Two executors with equal keys
/// may share idle readers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repository: String,
    pub env: Vec<String>,
}

impl CacheKey {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            env: Vec::new(),
        }
    }
}

/// A running git subcommand with its pipes.
pub struct SpawnedCommand {
    pub description: String,
    pub stdin: Option<BoxedWriter>,
    pub stdout: BoxedReader,
    pub stderr: Option<JoinHandle<Vec<u8>>>,
    pub process: Option<Child>,
}

impl SpawnedCommand {
    /// Reads stdout to the end and waits for the process to exit successfully.
    pub async fn output(mut self, ctx: &CancellationToken) -> Result<Vec<u8>, GitError> {
        let mut stdout = Vec::new();
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(GitError::Cancelled),
            res = self.stdout.read_to_end(&mut stdout) => {
                res.map_err(GitError::from_child_io)?;
            }
        }
        self.wait(ctx).await?;
        Ok(stdout)
    }

    pub async fn wait(mut self, ctx: &CancellationToken) -> Result<(), GitError> {
        self.stdin = None;
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        let status = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                let _ = process.start_kill();
                return Err(GitError::Cancelled);
            }
            status = process.wait() => status?,
        };
        if status.success() {
            return Ok(());
        }
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };
        Err(GitError::CommandFailed {
            command: self.description,
            code: status.code(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        })
    }
}

#[async_trait]
pub trait RepositoryExecutor: Send + Sync {
    /// Starts `command` in the repository with stdout piped, and stdin piped
    /// when the command asks for it.
    async fn exec(
        &self,
        ctx: &CancellationToken,
        command: GitCommand,
    ) -> Result<SpawnedCommand, GitError>;

    /// The repository's active object hash.
    async fn object_hash(&self, ctx: &CancellationToken) -> Result<HashKind, GitError>;

    /// Pooling identity. `None` disables reader reuse for this repository.
    fn cache_key(&self) -> Option<CacheKey>;
}

/// A repository on local disk driven through the git binary.
#[derive(Debug)]
pub struct LocalRepository {
    path: PathBuf,
    git: GitConfig,
    alternates: Vec<PathBuf>,
    hash_kind: OnceCell<HashKind>,
}

impl LocalRepository {
    pub fn new(path: impl Into<PathBuf>, git: GitConfig) -> Self {
        Self {
            path: path.into(),
            git,
            alternates: Vec::new(),
            hash_kind: OnceCell::new(),
        }
    }

    /// Object directories borrowed through `GIT_ALTERNATE_OBJECT_DIRECTORIES`.
    pub fn with_alternates(mut self, alternates: Vec<PathBuf>) -> Self {
        self.alternates = alternates;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];
        if !self.alternates.is_empty() {
            let joined = std::env::join_paths(&self.alternates)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            env.push(("GIT_ALTERNATE_OBJECT_DIRECTORIES".to_string(), joined));
        }
        env
    }
}

#[async_trait]
impl RepositoryExecutor for LocalRepository {
    async fn exec(
        &self,
        ctx: &CancellationToken,
        command: GitCommand,
    ) -> Result<SpawnedCommand, GitError> {
        if ctx.is_cancelled() {
            return Err(GitError::Cancelled);
        }
        let description = command.name.clone();
        let mut cmd = Command::new(&self.git.binary);
        cmd.arg(&command.name)
            .args(&command.flags)
            .args(&command.args)
            .current_dir(&self.path)
            .envs(self.env())
            .stdin(if command.setup_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| GitError::SpawnFailed(format!("git {description}: {e}")))?;
        tracing::debug!(command = %description, pid = ?child.id(), "spawned git");

        let stdin = child.stdin.take().map(|s| Box::new(s) as BoxedWriter);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GitError::SpawnFailed("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_reader(stderr, MAX_STDERR_BYTES)));

        Ok(SpawnedCommand {
            description,
            stdin,
            stdout: Box::new(stdout),
            stderr,
            process: Some(child),
        })
    }

    async fn object_hash(&self, ctx: &CancellationToken) -> Result<HashKind, GitError> {
        let kind = self
            .hash_kind
            .get_or_try_init(|| async {
                let output = self
                    .exec(
                        ctx,
                        GitCommand::new("rev-parse").flag("--show-object-format"),
                    )
                    .await?
                    .output(ctx)
                    .await?;
                String::from_utf8_lossy(&output).trim().parse::<HashKind>()
            })
            .await?;
        Ok(*kind)
    }

    fn cache_key(&self) -> Option<CacheKey> {
        let mut key = CacheKey::new(self.path.to_string_lossy());
        key.env = self
            .env()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        key.env.push(format!("GIT={}", self.git.binary.display()));
        Some(key)
    }
}

/// Reads `reader` to EOF keeping at most `max_bytes`. Draining continues past
/// the cap so the child never blocks on a full pipe.
async fn drain_reader(mut reader: impl AsyncRead + Unpin, max_bytes: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let take = max_bytes.saturating_sub(buf.len()).min(n);
                buf.extend_from_slice(&tmp[..take]);
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::{TestRepo, git_available};

    #[test]
    fn test_git_command_builder() {
        let cmd = GitCommand::new("for-each-ref")
            .flag("--count=2")
            .args(["refs/heads", "refs/tags"])
            .with_stdin();
        assert_eq!(cmd.name, "for-each-ref");
        assert_eq!(cmd.flags, vec!["--count=2"]);
        assert_eq!(cmd.args, vec!["refs/heads", "refs/tags"]);
        assert!(cmd.setup_stdin);
    }

    #[test]
    fn test_cache_key_depends_on_alternates() {
        let plain = LocalRepository::new("/srv/repo.git", GitConfig::default());
        let borrowed = LocalRepository::new("/srv/repo.git", GitConfig::default())
            .with_alternates(vec![PathBuf::from("/srv/pool.git/objects")]);
        assert_ne!(plain.cache_key(), borrowed.cache_key());
        assert_eq!(
            plain.cache_key(),
            LocalRepository::new("/srv/repo.git", GitConfig::default()).cache_key()
        );
    }

    #[tokio::test]
    async fn test_object_hash_of_real_repository() {
        if !git_available() {
            return;
        }
        let repo = TestRepo::new();
        let executor = repo.executor();
        let ctx = CancellationToken::new();
        assert_eq!(executor.object_hash(&ctx).await.unwrap(), HashKind::Sha1);
    }

    #[tokio::test]
    async fn test_failed_command_reports_stderr() {
        if !git_available() {
            return;
        }
        let repo = TestRepo::new();
        let ctx = CancellationToken::new();
        let err = repo
            .executor()
            .exec(&ctx, GitCommand::new("rev-parse").args(["--verify", "refs/heads/none"]))
            .await
            .unwrap()
            .output(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { code: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_exec_honours_cancelled_context() {
        let repo = LocalRepository::new("/nonexistent", GitConfig::default());
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = repo.exec(&ctx, GitCommand::new("status")).await.err().unwrap();
        assert!(matches!(err, GitError::Cancelled));
    }
}
