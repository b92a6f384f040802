//! Command implementations behind the `catpool` CLI, plus the session they share.

pub mod batch_info;
pub mod cat_file;
pub mod check_ref_format;
pub mod for_each_ref;
pub mod show;

use std::{path::PathBuf, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::internal::{
    catfile::{NoopMetrics, ReaderCache, ReaderLease},
    config::Config,
    errors::GitError,
    executor::LocalRepository,
};

/// Everything a command needs: the repository, the reader pool and the
/// context that cancels outstanding git I/O.
pub struct Session {
    pub ctx: CancellationToken,
    pub config: Config,
    pub repository: LocalRepository,
    pub cache: ReaderCache,
}

impl Session {
    /// Must run inside a tokio runtime.
    pub fn new(repository: PathBuf, config: Config) -> Result<Self, GitError> {
        let cache = ReaderCache::new(config.cache.clone(), Arc::new(NoopMetrics))?;
        Ok(Self {
            ctx: CancellationToken::new(),
            repository: LocalRepository::new(repository, config.git.clone()),
            config,
            cache,
        })
    }

    pub async fn reader(&self) -> Result<ReaderLease, GitError> {
        self.cache.object_reader(&self.ctx, &self.repository).await
    }
}
