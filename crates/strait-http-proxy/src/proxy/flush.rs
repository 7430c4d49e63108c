//! Bounded-latency flushing for streamed bodies.
//!
//! While a response body streams through the proxy, small writes can sit in
//! the sink's buffer indefinitely. [`MaxLatencyWriter`] wraps a sink and
//! flushes it at most once per configured interval from a background task.
//! Writes and flushes take the same lock, so they never interleave, and the
//! flusher is joined before [`MaxLatencyWriter::finish`] returns.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// A write sink flushed periodically by a background task.
pub struct MaxLatencyWriter<W> {
    dst: Arc<Mutex<W>>,
    stop: Option<watch::Sender<()>>,
    flusher: Option<JoinHandle<()>>,
}

impl<W> MaxLatencyWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap `dst`, flushing it every `interval`. An interval of zero spawns
    /// no flusher; bytes are only flushed on [`finish`](Self::finish).
    pub fn new(dst: W, interval: Duration) -> Self {
        let dst = Arc::new(Mutex::new(dst));

        if interval.is_zero() {
            return Self {
                dst,
                stop: None,
                flusher: None,
            };
        }

        let (stop, mut stopped) = watch::channel(());
        let flush_dst = Arc::clone(&dst);
        let flusher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately; skip it so the initial flush
            // happens one interval after the first write, not before it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut dst = flush_dst.lock().await;
                        let _ = dst.flush().await;
                    }
                    res = stopped.changed() => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Self {
            dst,
            stop: Some(stop),
            flusher: Some(flusher),
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut dst = self.dst.lock().await;
        dst.write_all(buf).await
    }

    /// Stop the flusher, wait for it to exit, then flush and shut down the
    /// sink. Must be called on every completion path so the flusher never
    /// outlives the copy.
    pub async fn finish(mut self) -> io::Result<()> {
        if let Some(stop) = self.stop.take() {
            drop(stop);
        }
        if let Some(flusher) = self.flusher.take() {
            let _ = flusher.await;
        }
        let mut dst = self.dst.lock().await;
        dst.flush().await?;
        dst.shutdown().await
    }
}

/// Copy `reader` to `writer` through a reusable buffer of `buf_size` bytes,
/// returning the number of bytes copied. The writer is flushed at the end
/// but not shut down; tunnel directions half-close explicitly.
pub async fn copy_buffered<R, W>(reader: &mut R, writer: &mut W, buf_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}
