//! The git-cat-file `--batch-command` wire protocol.
//!
//! Commands are written to the child's buffered stdin and only reach git
//! when the buffer is flushed; with `--buffer` git likewise holds its replies
//! until it sees `flush`. Replies come back strictly in request order, so the
//! queue only counts, it never matches replies to requests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    sync::Mutex,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{
    object::Object,
    object_info::{ObjectInfo, parse_object_info},
    trace::RequestTrace,
};
use crate::internal::{
    errors::GitError,
    executor::{BoxedReader, BoxedWriter},
    hash::HashKind,
    reference::Revision,
};

pub(crate) type Stdout = BufReader<BoxedReader>;

/// How long a dead child gets to hand over its stderr.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Counters and flags shared between the queue and the object it handed out.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    /// Commands written but not yet pushed to git by `flush`.
    outstanding_requests: AtomicUsize,
    /// Commands whose reply has not been fully consumed.
    outstanding_reads: AtomicUsize,
    closed: AtomicBool,
    dirty: AtomicBool,
    pub(crate) object_in_flight: AtomicBool,
    /// A drained object left its terminator unread.
    pub(crate) trailer_pending: AtomicBool,
}

impl QueueState {
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True when the wire state is unknown or a reply is still owed.
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
            || self.object_in_flight.load(Ordering::Acquire)
            || self.outstanding_reads.load(Ordering::Acquire) > 0
    }

    pub(crate) fn outstanding_requests(&self) -> usize {
        self.outstanding_requests.load(Ordering::Acquire)
    }

    pub(crate) fn outstanding_reads(&self) -> usize {
        self.outstanding_reads.load(Ordering::Acquire)
    }

    fn add_request(&self) {
        self.outstanding_requests.fetch_add(1, Ordering::AcqRel);
        self.outstanding_reads.fetch_add(1, Ordering::AcqRel);
    }

    /// One reply fully consumed.
    pub(crate) fn finish_read(&self) {
        let reads = self
            .outstanding_reads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|prev| prev - 1)
            .unwrap_or(0);
        let _ = self
            .outstanding_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > reads).then_some(reads)
            });
        self.object_in_flight.store(false, Ordering::Release);
    }
}

pub(crate) struct RequestQueue {
    object_hash: HashKind,
    terminator: u8,
    stdin: Option<BufWriter<BoxedWriter>>,
    stdout: Arc<Mutex<Stdout>>,
    state: Arc<QueueState>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    pub(crate) trace: Option<RequestTrace>,
}

impl RequestQueue {
    pub(crate) fn new(
        object_hash: HashKind,
        stdin: BoxedWriter,
        stdout: BoxedReader,
        nul_terminated: bool,
    ) -> Self {
        Self {
            object_hash,
            terminator: if nul_terminated { b'\0' } else { b'\n' },
            stdin: Some(BufWriter::new(stdin)),
            stdout: Arc::new(Mutex::new(BufReader::new(stdout))),
            state: Arc::new(QueueState::default()),
            stderr: None,
            trace: None,
        }
    }

    /// Collector of the child's stderr, quoted when the child dies mid-reply.
    pub(crate) fn with_stderr(mut self, stderr: Option<JoinHandle<Vec<u8>>>) -> Self {
        self.stderr = stderr;
        self
    }

    pub(crate) fn state(&self) -> &Arc<QueueState> {
        &self.state
    }

    pub(crate) fn object_hash(&self) -> HashKind {
        self.object_hash
    }

    pub(crate) async fn request_object(
        &mut self,
        ctx: &CancellationToken,
        revision: &Revision,
    ) -> Result<(), GitError> {
        self.request(ctx, "contents", revision).await
    }

    pub(crate) async fn request_info(
        &mut self,
        ctx: &CancellationToken,
        revision: &Revision,
    ) -> Result<(), GitError> {
        self.request(ctx, "info", revision).await
    }

    async fn request(
        &mut self,
        ctx: &CancellationToken,
        command: &str,
        revision: &Revision,
    ) -> Result<(), GitError> {
        self.ensure_open()?;
        if self.state.object_in_flight.load(Ordering::Acquire) {
            return Err(GitError::QueueBusy(
                "current object has not been fully read".to_string(),
            ));
        }
        revision.validate()?;

        let mut line = Vec::with_capacity(command.len() + revision.as_str().len() + 2);
        line.extend_from_slice(command.as_bytes());
        line.push(b' ');
        line.extend_from_slice(revision.as_str().as_bytes());
        line.push(self.terminator);

        self.write(ctx, &line, false).await?;
        self.state.add_request();
        tracing::trace!(command, %revision, "queued request");
        Ok(())
    }

    /// Pushes every queued command to git and asks it to emit the replies.
    pub(crate) async fn flush(&mut self, ctx: &CancellationToken) -> Result<(), GitError> {
        self.ensure_open()?;
        if self.state.outstanding_reads() == 0 {
            return Err(GitError::NoOutstandingRequest);
        }
        let mut line = b"flush".to_vec();
        line.push(self.terminator);
        self.write(ctx, &line, true).await?;
        self.state.outstanding_requests.store(0, Ordering::Release);
        Ok(())
    }

    pub(crate) async fn read_object(&mut self, ctx: &CancellationToken) -> Result<Object, GitError> {
        self.ensure_readable()?;
        let mut stdout = self
            .stdout
            .clone()
            .try_lock_owned()
            .map_err(|_| GitError::QueueBusy("current object has not been fully read".into()))?;

        let info = match self.read_header(ctx, &mut stdout).await {
            Ok(info) => info,
            Err(err) => {
                if err.is_not_found() {
                    self.state.finish_read();
                }
                return Err(err);
            }
        };
        if let Some(trace) = self.trace.as_mut() {
            trace.record(info.object_type);
        }
        self.state.object_in_flight.store(true, Ordering::Release);
        Ok(Object::new(
            info,
            stdout,
            self.terminator,
            self.state.clone(),
            ctx,
        ))
    }

    pub(crate) async fn read_info(&mut self, ctx: &CancellationToken) -> Result<ObjectInfo, GitError> {
        self.ensure_readable()?;
        let stdout = self.stdout.clone();
        let mut stdout = stdout
            .try_lock()
            .map_err(|_| GitError::QueueBusy("current object has not been fully read".into()))?;

        let result = self.read_header(ctx, &mut stdout).await;
        match &result {
            Ok(info) => {
                if let Some(trace) = self.trace.as_mut() {
                    trace.record(info.object_type);
                }
                self.state.finish_read();
            }
            Err(err) if err.is_not_found() => self.state.finish_read(),
            Err(_) => {}
        }
        result
    }

    /// Marks the queue closed and closes git's stdin so that it exits.
    pub(crate) fn close(&mut self) {
        self.state.mark_closed();
        self.stdin = None;
    }

    fn ensure_open(&self) -> Result<(), GitError> {
        if self.state.is_closed() || self.stdin.is_none() {
            return Err(GitError::Closed);
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<(), GitError> {
        if self.state.is_closed() {
            return Err(GitError::Closed);
        }
        if self.state.object_in_flight.load(Ordering::Acquire) {
            return Err(GitError::QueueBusy(
                "current object has not been fully read".to_string(),
            ));
        }
        if self.state.outstanding_reads() == 0 {
            return Err(GitError::NoOutstandingRequest);
        }
        Ok(())
    }

    async fn write(
        &mut self,
        ctx: &CancellationToken,
        data: &[u8],
        flush: bool,
    ) -> Result<(), GitError> {
        let stdin = self.stdin.as_mut().ok_or(GitError::Closed)?;
        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(GitError::Cancelled),
            res = async {
                stdin.write_all(data).await?;
                if flush {
                    stdin.flush().await?;
                }
                Ok::<_, std::io::Error>(())
            } => res.map_err(GitError::from_child_io),
        };
        if let Err(err) = &result {
            tracing::warn!(error = %err, "writing to git cat-file failed");
            self.state.mark_dirty();
        }
        result
    }

    /// Reads one reply header, first consuming a terminator left behind by
    /// the previous object.
    async fn read_header(
        &mut self,
        ctx: &CancellationToken,
        stdout: &mut Stdout,
    ) -> Result<ObjectInfo, GitError> {
        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(GitError::Cancelled),
            res = self.read_header_line(stdout) => res,
        };
        let line = match result {
            Ok(line) => line,
            Err(err) => {
                self.state.mark_dirty();
                return Err(self.attach_stderr(err).await);
            }
        };
        parse_object_info(&line, self.object_hash).inspect_err(|err| {
            if !err.is_not_found() {
                tracing::warn!(error = %err, "malformed git cat-file reply");
                self.state.mark_dirty();
            }
        })
    }

    async fn attach_stderr(&mut self, err: GitError) -> GitError {
        if !matches!(err, GitError::ChildTerminated { .. }) {
            return err;
        }
        let Some(stderr) = self.stderr.take() else {
            return err;
        };
        match tokio::time::timeout(STDERR_GRACE, stderr).await {
            Ok(Ok(stderr)) => GitError::ChildTerminated {
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            },
            _ => err,
        }
    }

    async fn read_header_line(&self, stdout: &mut Stdout) -> Result<Vec<u8>, GitError> {
        if self.state.trailer_pending.load(Ordering::Acquire) {
            let byte = stdout.read_u8().await.map_err(GitError::from_child_io)?;
            if byte != self.terminator {
                return Err(GitError::ProtocolError(format!(
                    "expected object terminator, got byte {byte:#04x}"
                )));
            }
            self.state.trailer_pending.store(false, Ordering::Release);
        }

        let mut line = Vec::new();
        let n = stdout
            .read_until(self.terminator, &mut line)
            .await
            .map_err(GitError::from_child_io)?;
        if n == 0 || line.last() != Some(&self.terminator) {
            return Err(GitError::child_terminated());
        }
        line.pop();
        Ok(line)
    }
}
