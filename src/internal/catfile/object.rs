//! A single object's payload streamed straight off git-cat-file's stdout.

use std::{
    fmt,
    io,
    pin::Pin,
    sync::{Arc, atomic::Ordering},
    task::{Context, Poll, ready},
};

use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncReadExt, ReadBuf},
    sync::OwnedMutexGuard,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::{
    object_info::{ObjectInfo, ObjectType},
    request_queue::{QueueState, Stdout},
};
use crate::internal::{errors::GitError, hash::ObjectId};

/// An object header plus a reader over exactly `size` bytes of payload.
///
/// The payload is single-pass. Until it reports EOF the queue refuses new
/// requests; dropping it with bytes left unread poisons the queue. Once EOF
/// is reached the object lets go of stdout, so the next reply can be read
/// while it is still alive.
pub struct Object {
    info: ObjectInfo,
    /// `None` once the reply has been consumed or the read failed.
    stdout: Option<OwnedMutexGuard<Stdout>>,
    remaining: u64,
    terminator: u8,
    finished: bool,
    state: Arc<QueueState>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl Object {
    pub(crate) fn new(
        info: ObjectInfo,
        stdout: OwnedMutexGuard<Stdout>,
        terminator: u8,
        state: Arc<QueueState>,
        ctx: &CancellationToken,
    ) -> Self {
        Self {
            remaining: info.size,
            info,
            stdout: Some(stdout),
            terminator,
            finished: false,
            state,
            cancelled: Box::pin(ctx.clone().cancelled_owned()),
        }
    }

    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    pub fn oid(&self) -> &ObjectId {
        &self.info.oid
    }

    pub fn object_type(&self) -> ObjectType {
        self.info.object_type
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// Payload bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Reads the whole payload.
    pub async fn read_to_vec(&mut self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::with_capacity(usize::try_from(self.remaining).unwrap_or(0).min(1 << 20));
        self.read_to_end(&mut data)
            .await
            .map_err(GitError::from_child_io)?;
        Ok(data)
    }

    /// Reads and throws away the rest of the payload so the queue stays usable.
    pub async fn discard(&mut self) -> Result<u64, GitError> {
        tokio::io::copy(self, &mut tokio::io::sink())
            .await
            .map_err(GitError::from_child_io)
    }

    fn fail(&mut self, err: GitError) -> io::Error {
        self.state.mark_dirty();
        self.finished = true;
        self.stdout = None;
        self.state.object_in_flight.store(false, Ordering::Release);
        err.into_io()
    }

    fn poll_trailer(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(stdout) = self.stdout.as_deref_mut() else {
            return Poll::Ready(Ok(()));
        };
        let next = match ready!(Pin::new(stdout).poll_fill_buf(cx)) {
            Ok(buffered) => buffered.first().copied(),
            Err(e) => return Poll::Ready(Err(self.fail(GitError::from_child_io(e)))),
        };
        match next {
            None => Poll::Ready(Err(self.fail(GitError::child_terminated()))),
            Some(byte) if byte != self.terminator => Poll::Ready(Err(self.fail(
                GitError::ProtocolError(format!(
                    "object {} not followed by terminator, got byte {byte:#04x}",
                    self.info.oid
                )),
            ))),
            Some(_) => {
                if let Some(mut stdout) = self.stdout.take() {
                    Pin::new(&mut *stdout).consume(1);
                }
                self.finished = true;
                self.state.finish_read();
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl AsyncRead for Object {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Ok(()));
        }
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(this.fail(GitError::Cancelled)));
        }
        if this.remaining == 0 {
            return this.poll_trailer(cx);
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let Some(stdout) = this.stdout.as_deref_mut() else {
            return Poll::Ready(Ok(()));
        };
        let available = match ready!(Pin::new(&mut *stdout).poll_fill_buf(cx)) {
            Ok(available) => available,
            Err(e) => return Poll::Ready(Err(this.fail(GitError::from_child_io(e)))),
        };
        if available.is_empty() {
            let err = GitError::ProtocolError(format!(
                "short payload for {}: {} bytes missing",
                this.info.oid, this.remaining
            ));
            return Poll::Ready(Err(this.fail(err)));
        }
        let n = available
            .len()
            .min(buf.remaining())
            .min(usize::try_from(this.remaining).unwrap_or(usize::MAX));
        buf.put_slice(&available[..n]);
        Pin::new(&mut *stdout).consume(n);
        this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.remaining > 0 {
            tracing::debug!(
                oid = %self.info.oid,
                remaining = self.remaining,
                "object dropped before it was fully read"
            );
            self.state.mark_dirty();
            self.state.object_in_flight.store(false, Ordering::Release);
            return;
        }
        // Fully drained but EOF was never polled.
        if let Some(mut stdout) = self.stdout.take() {
            match stdout.buffer().first().copied() {
                Some(byte) if byte == self.terminator => Pin::new(&mut *stdout).consume(1),
                Some(_) => self.state.mark_dirty(),
                None => self.state.trailer_pending.store(true, Ordering::Release),
            }
        }
        self.state.finish_read();
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("info", &self.info)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}
