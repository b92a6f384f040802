//! A keyed pool of idle cat-file readers.
//!
//! Readers are checked out per repository and come back when their
//! [`ReaderLease`] is dropped. Only clean readers are kept; anything dirty
//! or closed is killed on return. A background task expires idle readers
//! older than the configured TTL.

use std::{
    ops::Deref,
    sync::{Arc, Mutex, Weak},
    time::Instant,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    object_reader::CatfileReader,
    trace::{CacheEvent, MetricsSink},
};
use crate::internal::{
    config::CacheConfig,
    errors::GitError,
    executor::{CacheKey, RepositoryExecutor},
};

struct Entry {
    key: CacheKey,
    reader: CatfileReader,
    inserted_at: Instant,
}

struct CacheInner {
    config: CacheConfig,
    metrics: Arc<dyn MetricsSink>,
    /// Idle readers, oldest first.
    entries: Mutex<Vec<Entry>>,
    shutdown: CancellationToken,
}

impl CacheInner {
    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes the oldest clean idle reader for `key`. Idle readers whose
    /// child died in the meantime are dropped on the way.
    fn checkout(&self, key: &CacheKey) -> Option<CatfileReader> {
        let mut stale = Vec::new();
        let found = {
            let mut entries = self.entries();
            let mut found = None;
            while let Some(pos) = entries.iter().position(|e| &e.key == key) {
                let entry = entries.remove(pos);
                if entry.reader.is_dirty() || entry.reader.is_closed() {
                    stale.push(entry);
                    continue;
                }
                found = Some(entry.reader);
                break;
            }
            found
        };
        for entry in stale {
            self.metrics.cache_event(CacheEvent::Evicted);
            entry.reader.close();
        }
        found
    }

    fn release(&self, key: CacheKey, reader: CatfileReader) {
        if self.shutdown.is_cancelled() {
            reader.close();
            return;
        }
        if reader.is_dirty() || reader.is_closed() {
            tracing::debug!(reader = reader.id(), "discarding dirty cat-file reader");
            self.metrics.cache_event(CacheEvent::ReturnedDirty);
            reader.close();
            return;
        }

        let evicted = {
            let mut entries = self.entries();
            let mut evicted = Vec::new();

            let same_key = entries.iter().filter(|e| e.key == key).count();
            if same_key >= self.config.max_per_key {
                if let Some(pos) = entries.iter().position(|e| e.key == key) {
                    evicted.push(entries.remove(pos));
                }
            }

            if !entries.iter().any(|e| e.key == key) {
                while !entries.is_empty() && distinct_keys(&entries) >= self.config.max_keys {
                    evicted.push(entries.remove(0));
                }
            }

            entries.push(Entry {
                key,
                reader,
                inserted_at: Instant::now(),
            });
            evicted
        };

        for entry in evicted {
            tracing::debug!(reader = entry.reader.id(), "evicting cat-file reader at capacity");
            self.metrics.cache_event(CacheEvent::Evicted);
            entry.reader.close();
        }
    }

    fn expire(&self) {
        let ttl = self.config.ttl();
        let expired: Vec<Entry> = {
            let mut entries = self.entries();
            let (expired, kept) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|e| e.inserted_at.elapsed() >= ttl);
            *entries = kept;
            expired
        };
        for entry in expired {
            tracing::debug!(reader = entry.reader.id(), "expiring idle cat-file reader");
            self.metrics.cache_event(CacheEvent::Expired);
            entry.reader.close();
        }
    }

    fn drain(&self) -> Vec<Entry> {
        std::mem::take(&mut *self.entries())
    }
}

fn distinct_keys(entries: &[Entry]) -> usize {
    let mut keys: Vec<&CacheKey> = Vec::with_capacity(entries.len());
    for entry in entries {
        if !keys.contains(&&entry.key) {
            keys.push(&entry.key);
        }
    }
    keys.len()
}

/// Process-wide pool of idle readers. Construct once and pass it down.
pub struct ReaderCache {
    inner: Arc<CacheInner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderCache {
    /// Builds the cache and starts its expiry task on the current tokio
    /// runtime.
    pub fn new(config: CacheConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self, GitError> {
        config.validate()?;
        let interval = config.monitor_interval();
        let inner = Arc::new(CacheInner {
            config,
            metrics,
            entries: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        });
        let monitor = tokio::spawn(monitor(
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
            interval,
        ));
        Ok(Self {
            inner,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Checks out a reader for `executor`'s repository, reusing an idle one
    /// when possible and spawning otherwise. Never waits on capacity.
    pub async fn object_reader(
        &self,
        ctx: &CancellationToken,
        executor: &dyn RepositoryExecutor,
    ) -> Result<ReaderLease, GitError> {
        if ctx.is_cancelled() {
            return Err(GitError::Cancelled);
        }
        let key = executor.cache_key();
        if let Some(key) = &key {
            if !self.inner.shutdown.is_cancelled() {
                if let Some(reader) = self.inner.checkout(key) {
                    self.inner.metrics.cache_event(CacheEvent::Hit);
                    reader.touch();
                    return Ok(ReaderLease {
                        reader: Some(reader),
                        key: Some(key.clone()),
                        cache: Arc::downgrade(&self.inner),
                    });
                }
            }
        }

        self.inner.metrics.cache_event(CacheEvent::Miss);
        let reader = CatfileReader::new(ctx, executor, self.inner.metrics.clone()).await?;
        Ok(ReaderLease {
            reader: Some(reader),
            key,
            cache: Arc::downgrade(&self.inner),
        })
    }

    /// Closes every idle reader of `key`. Returns how many were closed.
    pub fn evict(&self, key: &CacheKey) -> usize {
        let evicted: Vec<Entry> = {
            let mut entries = self.inner.entries();
            let (evicted, kept) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|e| &e.key == key);
            *entries = kept;
            evicted
        };
        for entry in &evicted {
            self.inner.metrics.cache_event(CacheEvent::Evicted);
            entry.reader.close();
        }
        evicted.len()
    }

    /// Number of idle readers.
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the expiry task and closes all idle readers. Readers still
    /// checked out are closed when their leases end.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(monitor) = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            monitor.abort();
        }
        let drained = self.inner.drain();
        if !drained.is_empty() {
            tracing::debug!(readers = drained.len(), "closing idle cat-file readers");
        }
        for entry in drained {
            entry.reader.close();
        }
    }
}

impl Drop for ReaderCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn monitor(
    cache: Weak<CacheInner>,
    shutdown: CancellationToken,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let Some(cache) = cache.upgrade() else {
            return;
        };
        cache.expire();
    }
}

/// A reader checked out of a [`ReaderCache`]. Dropping the lease hands the
/// reader back, or kills it when it is no longer clean.
pub struct ReaderLease {
    reader: Option<CatfileReader>,
    key: Option<CacheKey>,
    cache: Weak<CacheInner>,
}

impl ReaderLease {
    /// Kills the reader instead of returning it on drop.
    pub fn discard(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
    }
}

impl Deref for ReaderLease {
    type Target = CatfileReader;

    fn deref(&self) -> &CatfileReader {
        // Only `Drop` and `discard` take the reader, and both consume the lease.
        self.reader
            .as_ref()
            .unwrap_or_else(|| unreachable!("reader lease used after release"))
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        match (self.key.take(), self.cache.upgrade()) {
            (Some(key), Some(cache)) => cache.release(key, reader),
            _ => reader.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::{
        internal::{
            catfile::{ObjectReader, object_info::ObjectType, trace::InMemoryMetrics},
            hash::HashKind,
        },
        utils::test::ScriptedExecutor,
    };

    fn executor() -> ScriptedExecutor {
        ScriptedExecutor::new(HashKind::Sha1)
            .with_object("blob-a", ObjectType::Blob, b"alpha".to_vec())
    }

    fn cache(config: CacheConfig) -> (ReaderCache, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::default());
        (ReaderCache::new(config, metrics.clone()).unwrap(), metrics)
    }

    #[tokio::test]
    async fn test_clean_reader_is_reused() {
        let ctx = CancellationToken::new();
        let (cache, metrics) = cache(CacheConfig::default());
        let executor = executor();

        let lease = cache.object_reader(&ctx, &executor).await.unwrap();
        let first = lease.id();
        lease.info(&ctx, &"blob-a".into()).await.unwrap();
        drop(lease);
        assert_eq!(cache.len(), 1);

        let lease = cache.object_reader(&ctx, &executor).await.unwrap();
        assert_eq!(lease.id(), first);
        assert_eq!(cache.len(), 0);
        assert_eq!(executor.spawns(), 1);
        assert_eq!(metrics.events(CacheEvent::Miss), 1);
        assert_eq!(metrics.events(CacheEvent::Hit), 1);
    }

    #[tokio::test]
    async fn test_partially_read_object_gets_a_new_reader() {
        let ctx = CancellationToken::new();
        let (cache, metrics) = cache(CacheConfig::default());
        let executor = executor();

        let lease = cache.object_reader(&ctx, &executor).await.unwrap();
        let first = lease.id();
        let mut object = lease.object(&ctx, &"blob-a".into()).await.unwrap();
        let mut half = [0u8; 2];
        object.read_exact(&mut half).await.unwrap();
        drop(object);
        drop(lease);
        assert_eq!(cache.len(), 0);
        assert_eq!(metrics.events(CacheEvent::ReturnedDirty), 1);

        let lease = cache.object_reader(&ctx, &executor).await.unwrap();
        assert_ne!(lease.id(), first);
        assert_eq!(executor.spawns(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_get_distinct_readers() {
        let ctx = CancellationToken::new();
        let (cache, _) = cache(CacheConfig::default());
        let executor = executor();

        let a = cache.object_reader(&ctx, &executor).await.unwrap();
        let b = cache.object_reader(&ctx, &executor).await.unwrap();
        assert_ne!(a.id(), b.id());
        drop(a);
        drop(b);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_max_per_key_evicts_oldest() {
        let ctx = CancellationToken::new();
        let (cache, metrics) = cache(CacheConfig {
            max_per_key: 1,
            ..CacheConfig::default()
        });
        let executor = executor();

        let a = cache.object_reader(&ctx, &executor).await.unwrap();
        let b = cache.object_reader(&ctx, &executor).await.unwrap();
        let b_id = b.id();
        drop(a);
        drop(b);
        assert_eq!(cache.len(), 1);
        assert_eq!(metrics.events(CacheEvent::Evicted), 1);
        let lease = cache.object_reader(&ctx, &executor).await.unwrap();
        assert_eq!(lease.id(), b_id);
    }

    #[tokio::test]
    async fn test_max_keys_evicts_globally_oldest() {
        let ctx = CancellationToken::new();
        let (cache, _) = cache(CacheConfig {
            max_keys: 2,
            ..CacheConfig::default()
        });
        let executors: Vec<_> = ["one", "two", "three"]
            .into_iter()
            .map(|name| executor().with_cache_key(Some(CacheKey::new(name))))
            .collect();

        for executor in &executors {
            drop(cache.object_reader(&ctx, executor).await.unwrap());
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evict(&CacheKey::new("one")), 0);
        assert_eq!(cache.evict(&CacheKey::new("two")), 1);
        assert_eq!(cache.evict(&CacheKey::new("two")), 0);
        assert_eq!(cache.evict(&CacheKey::new("three")), 1);
    }

    #[tokio::test]
    async fn test_uncacheable_executor_is_never_pooled() {
        let ctx = CancellationToken::new();
        let (cache, _) = cache(CacheConfig::default());
        let executor = executor().with_cache_key(None);
        drop(cache.object_reader(&ctx, &executor).await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_idle_readers_expire() {
        let ctx = CancellationToken::new();
        let (cache, metrics) = cache(CacheConfig {
            ttl_secs: 1,
            monitor_interval_ms: 20,
            ..CacheConfig::default()
        });
        drop(cache.object_reader(&ctx, &executor()).await.unwrap());
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert!(cache.is_empty());
        assert_eq!(metrics.events(CacheEvent::Expired), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_and_returning_readers() {
        let ctx = CancellationToken::new();
        let (cache, _) = cache(CacheConfig::default());
        let executor = executor();
        let idle = cache.object_reader(&ctx, &executor).await.unwrap();
        let busy = cache.object_reader(&ctx, &executor).await.unwrap();
        drop(idle);
        assert_eq!(cache.len(), 1);

        cache.shutdown();
        cache.shutdown();
        assert!(cache.is_empty());
        drop(busy);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_discarded_lease_is_not_returned() {
        let ctx = CancellationToken::new();
        let (cache, _) = cache(CacheConfig::default());
        cache
            .object_reader(&ctx, &executor())
            .await
            .unwrap()
            .discard();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = ReaderCache::new(
            CacheConfig {
                max_keys: 0,
                ..CacheConfig::default()
            },
            Arc::new(InMemoryMetrics::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, GitError::InvalidConfig(_)));
    }
}
