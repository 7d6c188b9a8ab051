//! Fixed-capacity circular byte buffer with one writer and many readers.
//!
//! The buffer models a logical, ever-growing byte stream. The writer appends
//! at `total_written` (a monotonically increasing logical offset that never
//! wraps); the physical offset of a logical position is `position % capacity`.
//! Each reader keeps its own logical `read_head`, initialised to the write head
//! at attach time, so a reader only ever sees bytes written after it attached.
//!
//! # Invariants
//! - At most one [`RingWriter`] exists at a time.
//! - `0 <= total_written - read_head` for every reader.
//! - When `total_written - read_head > capacity` the reader's backlog has been
//!   overwritten and its next read fails with
//!   [`RestreamError::ReaderOverrun`]. Readers are never resynchronised.
//!
//! The backing storage sits behind a `RwLock` that is held only for the
//! duration of a memcpy, so a reader never observes a half-written wrap
//! segment and no lock is ever held across an await point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::{RestreamError, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Shared {
    data: RwLock<Box<[u8]>>,
    capacity: usize,
    total_written: AtomicU64,
    writer_attached: AtomicBool,
    /// Set when the last writer detached; readers that caught up see EOF.
    finished: AtomicBool,
    notify: Notify,
}

impl Shared {
    /// Copy up to `buf.len()` bytes starting at `read_head`.
    ///
    /// Returns `Ok(0)` when the reader is at the live tail.
    fn copy_from(&self, read_head: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.read();
        let total = self.total_written.load(Ordering::Acquire);
        let gap = total.saturating_sub(read_head);

        if gap == 0 {
            return Ok(0);
        }
        if gap > self.capacity as u64 {
            return Err(RestreamError::ReaderOverrun {
                behind: gap,
                capacity: self.capacity,
            });
        }

        let len = (buf.len() as u64).min(gap) as usize;
        let start = (read_head % self.capacity as u64) as usize;
        let first = (self.capacity - start).min(len);
        buf[..first].copy_from_slice(&data[start..start + first]);
        if len > first {
            buf[first..len].copy_from_slice(&data[..len - first]);
        }
        Ok(len)
    }
}

/// Shared handle to a ring buffer. Cloning is cheap and yields the same buffer.
#[derive(Clone)]
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.shared.capacity)
            .field("total_written", &self.total_written())
            .field("writer_attached", &self.has_writer())
            .finish()
    }
}

impl RingBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RestreamError::Configuration {
                reason: "ring buffer capacity must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                data: RwLock::new(vec![0u8; capacity].into_boxed_slice()),
                capacity,
                total_written: AtomicU64::new(0),
                writer_attached: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Logical write head.
    pub fn total_written(&self) -> u64 {
        self.shared.total_written.load(Ordering::Acquire)
    }

    /// Physical write offset inside the backing array.
    pub fn position(&self) -> usize {
        (self.total_written() % self.shared.capacity as u64) as usize
    }

    pub fn has_writer(&self) -> bool {
        self.shared.writer_attached.load(Ordering::Acquire)
    }

    /// True once a writer has detached and no new writer replaced it.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Claim the single writer role. Returns `None` while another writer is alive.
    pub fn writer(&self) -> Option<RingWriter> {
        self.shared
            .writer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.shared.finished.store(false, Ordering::Release);
        Some(RingWriter {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Clear the finished flag while no writer is attached, so readers wait
    /// for the next writer instead of reporting end of stream.
    ///
    /// Returns `false` when a writer is attached.
    pub fn reopen(&self) -> bool {
        if self.has_writer() {
            return false;
        }
        self.shared.finished.store(false, Ordering::Release);
        true
    }

    /// Release readers waiting on a writer that will never arrive.
    pub fn finish(&self) {
        if self.has_writer() {
            return;
        }
        self.shared.finished.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Attach a reader at the current write head.
    pub fn reader(&self) -> RingReader {
        RingReader {
            shared: Arc::clone(&self.shared),
            read_head: self.total_written(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Exclusive write side of a [`RingBuffer`]. Has no read capability.
///
/// Dropping the writer marks the stream finished and wakes every reader.
pub struct RingWriter {
    shared: Arc<Shared>,
}

impl RingWriter {
    /// Append `bytes`, overwriting the oldest data on wrap.
    ///
    /// Never waits for readers to consume anything. When `bytes` is longer
    /// than the capacity only its last `capacity` bytes are stored, but the
    /// write head still advances by the full length.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let cap = self.shared.capacity;
        {
            let mut data = self.shared.data.write();
            let total = self.shared.total_written.load(Ordering::Acquire);

            let skip = bytes.len().saturating_sub(cap);
            let tail = &bytes[skip..];
            let start = ((total + skip as u64) % cap as u64) as usize;
            let first = (cap - start).min(tail.len());
            data[start..start + first].copy_from_slice(&tail[..first]);
            if tail.len() > first {
                data[..tail.len() - first].copy_from_slice(&tail[first..]);
            }

            self.shared
                .total_written
                .store(total + bytes.len() as u64, Ordering::Release);
        }

        trace!(len = bytes.len(), "Ring buffer write");
        self.shared.notify.notify_waiters();
    }

    pub fn position(&self) -> usize {
        (self.total_written() % self.shared.capacity as u64) as usize
    }

    pub fn total_written(&self) -> u64 {
        self.shared.total_written.load(Ordering::Acquire)
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        self.shared.finished.store(true, Ordering::Release);
        self.shared.writer_attached.store(false, Ordering::Release);
        self.shared.notify.notify_waiters();
        debug!(
            total_written = self.total_written(),
            "Ring buffer writer detached"
        );
    }
}

/// Independent read cursor over a [`RingBuffer`].
pub struct RingReader {
    shared: Arc<Shared>,
    read_head: u64,
    poll_interval: Duration,
}

impl std::fmt::Debug for RingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingReader")
            .field("read_head", &self.read_head)
            .field("lag", &self.lag())
            .finish()
    }
}

impl RingReader {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn read_head(&self) -> u64 {
        self.read_head
    }

    /// Bytes written but not yet consumed by this reader.
    pub fn lag(&self) -> u64 {
        self.shared
            .total_written
            .load(Ordering::Acquire)
            .saturating_sub(self.read_head)
    }

    /// Non-blocking read. `Ok(None)` means the reader is at the live tail.
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        match self.shared.copy_from(self.read_head, buf)? {
            0 => Ok(None),
            n => {
                self.read_head += n as u64;
                Ok(Some(n))
            }
        }
    }

    /// Read at least one byte, waiting at the live tail until the writer
    /// produces more.
    ///
    /// Returns `Ok(0)` only after the writer has detached and every byte has
    /// been consumed. Fails with [`RestreamError::ReaderOverrun`] when the
    /// writer lapped this reader.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            // Register for wakeups before checking so a write in between is not missed.
            let notified = self.shared.notify.notified();
            let finished = self.shared.finished.load(Ordering::Acquire);

            let n = self.shared.copy_from(self.read_head, buf)?;
            if n > 0 {
                self.read_head += n as u64;
                return Ok(n);
            }
            if finished {
                return Ok(0);
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Turn the reader into a stream of chunks of at most `chunk_size` bytes.
    ///
    /// The stream ends after the writer finishes, and yields a single error
    /// before ending if the reader is overrun.
    pub fn into_stream(self, chunk_size: usize) -> BoxStream<'static, Result<Bytes>> {
        let buf = vec![0u8; chunk_size.max(1)];
        futures::stream::unfold(
            (self, buf, false),
            |(mut reader, mut buf, failed)| async move {
                if failed {
                    return None;
                }
                match reader.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => Some((Ok(Bytes::copy_from_slice(&buf[..n])), (reader, buf, false))),
                    Err(e) => Some((Err(e), (reader, buf, true))),
                }
            },
        )
        .boxed()
    }
}
