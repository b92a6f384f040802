//! One long-lived `git cat-file --batch-command` process and its request queue.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use async_trait::async_trait;
use tokio::{
    process::Child,
    sync::{Mutex, OwnedMutexGuard},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::{
    object::Object,
    object_info::ObjectInfo,
    request_queue::{QueueState, RequestQueue},
    trace::{MetricsSink, RequestTrace},
};
use crate::internal::{
    errors::GitError,
    executor::{GitCommand, RepositoryExecutor},
    hash::HashKind,
    reference::Revision,
};

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

/// What callers need from an object reader. Implemented by [`CatfileReader`]
/// and by test doubles.
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Header of `revision` without its payload.
    async fn info(&self, ctx: &CancellationToken, revision: &Revision)
    -> Result<ObjectInfo, GitError>;

    /// Header and payload reader of `revision`. The payload must be drained
    /// before the reader is used again.
    async fn object(&self, ctx: &CancellationToken, revision: &Revision)
    -> Result<Object, GitError>;

    /// Leases the queue for pipelined use. Fails at once with
    /// [`GitError::QueueBusy`] when it is already leased.
    fn object_queue(&self, ctx: &CancellationToken) -> Result<ObjectQueue, GitError>;
}

/// Clears the single-consumer flag. Declared after the queue guard in
/// [`ObjectQueue`] so the mutex is unlocked first.
struct InUseGuard(Arc<AtomicBool>);

impl Drop for InUseGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Exclusive lease on a reader's request queue. Released on drop.
///
/// Replies are read back in exactly the order requests were made. Requests
/// only reach git on [`flush`](Self::flush); reading before that waits
/// forever, or until `ctx` is cancelled.
pub struct ObjectQueue {
    queue: OwnedMutexGuard<RequestQueue>,
    _in_use: InUseGuard,
}

impl ObjectQueue {
    pub async fn request_object(
        &mut self,
        ctx: &CancellationToken,
        revision: &Revision,
    ) -> Result<(), GitError> {
        let span = self.span();
        self.queue.request_object(ctx, revision).instrument(span).await
    }

    pub async fn request_info(
        &mut self,
        ctx: &CancellationToken,
        revision: &Revision,
    ) -> Result<(), GitError> {
        let span = self.span();
        self.queue.request_info(ctx, revision).instrument(span).await
    }

    pub async fn flush(&mut self, ctx: &CancellationToken) -> Result<(), GitError> {
        let span = self.span();
        self.queue.flush(ctx).instrument(span).await
    }

    pub async fn read_object(&mut self, ctx: &CancellationToken) -> Result<Object, GitError> {
        let span = self.span();
        self.queue.read_object(ctx).instrument(span).await
    }

    pub async fn read_info(&mut self, ctx: &CancellationToken) -> Result<ObjectInfo, GitError> {
        let span = self.span();
        self.queue.read_info(ctx).instrument(span).await
    }

    /// The lease's span, named after the method that took it.
    fn span(&self) -> Span {
        self.queue
            .trace
            .as_ref()
            .map(|trace| trace.span().clone())
            .unwrap_or_else(Span::none)
    }

    /// Replies still owed to the caller.
    pub fn outstanding_reads(&self) -> usize {
        self.queue.state().outstanding_reads()
    }

    pub fn object_hash(&self) -> HashKind {
        self.queue.object_hash()
    }
}

impl Drop for ObjectQueue {
    fn drop(&mut self) {
        let state = self.queue.state().clone();
        if state.outstanding_reads() > 0 {
            tracing::debug!(
                outstanding = state.outstanding_reads(),
                "object queue released with unread replies"
            );
        }
        if let Some(trace) = self.queue.trace.take() {
            trace.finish();
        }
    }
}

impl fmt::Debug for ObjectQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectQueue")
            .field("outstanding_reads", &self.outstanding_reads())
            .finish_non_exhaustive()
    }
}

/// Drives `git cat-file -Z --batch-command --buffer` in one repository.
///
/// Not meant for concurrent callers: a second lease attempt fails instead
/// of waiting.
pub struct CatfileReader {
    id: u64,
    process: std::sync::Mutex<Option<Child>>,
    queue: Arc<Mutex<RequestQueue>>,
    state: Arc<QueueState>,
    queue_in_use: Arc<AtomicBool>,
    metrics: Arc<dyn MetricsSink>,
    created_at: Instant,
    last_used: std::sync::Mutex<Instant>,
}

impl CatfileReader {
    pub async fn new(
        ctx: &CancellationToken,
        executor: &dyn RepositoryExecutor,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, GitError> {
        let object_hash = executor.object_hash(ctx).await?;
        let spawned = executor
            .exec(
                ctx,
                GitCommand::new("cat-file")
                    .flag("-Z")
                    .flag("--batch-command")
                    .flag("--buffer")
                    .with_stdin(),
            )
            .await?;
        let stdin = spawned
            .stdin
            .ok_or_else(|| GitError::SpawnFailed("cat-file stdin was not captured".to_string()))?;

        let queue =
            RequestQueue::new(object_hash, stdin, spawned.stdout, true).with_stderr(spawned.stderr);
        let state = queue.state().clone();
        let id = NEXT_READER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(reader = id, hash = %object_hash, "started cat-file reader");

        let now = Instant::now();
        Ok(Self {
            id,
            process: std::sync::Mutex::new(spawned.process),
            queue: Arc::new(Mutex::new(queue)),
            state,
            queue_in_use: Arc::new(AtomicBool::new(false)),
            metrics,
            created_at: now,
            last_used: std::sync::Mutex::new(now),
        })
    }

    /// Process-unique reader number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// OS pid of the child, if it is a real process that has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        let process = self.process.lock().unwrap_or_else(|e| e.into_inner());
        process.as_ref().and_then(Child::id)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Whether the reader can be handed to another caller. A reader is
    /// dirty while its queue is leased, while a reply is owed, after any
    /// protocol failure, and once the child has exited.
    pub fn is_dirty(&self) -> bool {
        if self.queue_in_use.load(Ordering::Acquire) || self.state.is_dirty() {
            return true;
        }
        let mut process = self.process.lock().unwrap_or_else(|e| e.into_inner());
        match process.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Closes git's stdin and kills the child. Idempotent.
    pub fn close(&self) {
        if self.state.is_closed() && self.process_taken() {
            return;
        }
        self.state.mark_closed();
        if let Ok(mut queue) = self.queue.try_lock() {
            queue.close();
        }
        let child = self
            .process
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
        }
        tracing::debug!(reader = self.id, "closed cat-file reader");
    }

    fn process_taken(&self) -> bool {
        self.process
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    fn lease(&self, ctx: &CancellationToken, method: &'static str) -> Result<ObjectQueue, GitError> {
        if ctx.is_cancelled() {
            return Err(GitError::Cancelled);
        }
        if self.state.is_closed() {
            return Err(GitError::Closed);
        }
        if self
            .queue_in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GitError::QueueBusy("object queue already in use".to_string()));
        }
        let in_use = InUseGuard(self.queue_in_use.clone());
        let mut queue = self
            .queue
            .clone()
            .try_lock_owned()
            .map_err(|_| GitError::QueueBusy("object queue already in use".to_string()))?;
        queue.trace = Some(RequestTrace::start(method, self.metrics.clone()));
        self.touch();
        Ok(ObjectQueue {
            queue,
            _in_use: in_use,
        })
    }
}

#[async_trait]
impl ObjectReader for CatfileReader {
    async fn info(
        &self,
        ctx: &CancellationToken,
        revision: &Revision,
    ) -> Result<ObjectInfo, GitError> {
        let mut queue = self.lease(ctx, "catfile.Info")?;
        queue.request_info(ctx, revision).await?;
        queue.flush(ctx).await?;
        queue.read_info(ctx).await
    }

    async fn object(
        &self,
        ctx: &CancellationToken,
        revision: &Revision,
    ) -> Result<Object, GitError> {
        let mut queue = self.lease(ctx, "catfile.Object")?;
        queue.request_object(ctx, revision).await?;
        queue.flush(ctx).await?;
        queue.read_object(ctx).await
    }

    fn object_queue(&self, ctx: &CancellationToken) -> Result<ObjectQueue, GitError> {
        self.lease(ctx, "catfile.ObjectQueue")
    }
}

impl Drop for CatfileReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for CatfileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatfileReader")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Reads the whole payload of `revision`.
pub async fn read_object_bytes(
    ctx: &CancellationToken,
    reader: &dyn ObjectReader,
    revision: &Revision,
) -> Result<Vec<u8>, GitError> {
    let mut object = reader.object(ctx, revision).await?;
    object.read_to_vec().await
}
