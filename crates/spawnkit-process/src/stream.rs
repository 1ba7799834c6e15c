//! Stream endpoint tracking for the close-ordering guarantee.
//!
//! Every parent-side pipe endpoint the launch manager creates is wrapped
//! in a [`TrackedIo`] registered with the handle's [`StreamGate`]. The
//! gate reaches idle only when each endpoint has seen end-of-stream or
//! been dropped; the `Close` event waits on it, which is what makes
//! "close strictly after exit and after all streams drained" hold.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;

/// Countdown of live stream endpoints.
#[derive(Debug, Default)]
pub struct StreamGate {
    remaining: AtomicUsize,
    notify: Notify,
}

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one more live endpoint.
    pub fn register(&self) {
        self.remaining.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark one endpoint finished. Called exactly once per endpoint.
    pub fn release(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Wait until every registered endpoint has finished.
    pub async fn wait_idle(&self) {
        loop {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A stream endpoint owned by a process handle. Forwards reads and
/// writes to the inner stream and releases its gate slot on end-of-stream,
/// shutdown or drop, whichever comes first.
#[derive(Debug)]
pub struct TrackedIo<T> {
    inner: T,
    gate: Arc<StreamGate>,
    done: bool,
}

impl<T> TrackedIo<T> {
    /// Wrap an endpoint and register it with the gate.
    pub fn new(inner: T, gate: Arc<StreamGate>) -> Self {
        gate.register();
        Self {
            inner,
            gate,
            done: false,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    fn mark_done(&mut self) {
        if !self.done {
            self.done = true;
            self.gate.release();
        }
    }
}

impl<T> Drop for TrackedIo<T> {
    fn drop(&mut self) {
        self.mark_done();
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TrackedIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            if buf.filled().len() == before {
                // Zero-byte read is end-of-stream.
                this.mark_done();
            }
        }
        result
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrackedIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if let Poll::Ready(Ok(())) = &result {
            this.mark_done();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_gate_idle_after_eof() {
        let gate = Arc::new(StreamGate::new());
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut tracked = TrackedIo::new(rx, Arc::clone(&gate));
        assert_eq!(gate.pending(), 1);

        tokio::io::AsyncWriteExt::write_all(&mut tx, b"data").await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        tracked.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"data");
        assert_eq!(gate.pending(), 0);
        gate.wait_idle().await;
    }

    #[tokio::test]
    async fn test_gate_released_on_drop() {
        let gate = Arc::new(StreamGate::new());
        let (_tx, rx) = tokio::io::duplex(64);
        let tracked = TrackedIo::new(rx, Arc::clone(&gate));
        assert_eq!(gate.pending(), 1);
        drop(tracked);
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test]
    async fn test_release_is_once_per_endpoint() {
        let gate = Arc::new(StreamGate::new());
        let (tx, rx) = tokio::io::duplex(64);
        let mut tracked = TrackedIo::new(rx, Arc::clone(&gate));
        drop(tx);

        // EOF releases; the subsequent drop must not release again.
        let mut out = Vec::new();
        tracked.read_to_end(&mut out).await.unwrap();
        assert_eq!(gate.pending(), 0);
        drop(tracked);
        assert_eq!(gate.pending(), 0);
    }
}
