//! Trunk-wide buffer pool.
//!
//! Grounded on the lock-free buffer pool pattern used by a DAQ crate's
//! buffer pool: a [`crossbeam_queue::SegQueue`] gives a fast, allocation-free
//! `get`/`put` path with no lock on the hot path, and a `holdcnt` ceiling
//! bounds how much idle memory the pool hoards.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use super::Buffer;

/// A bounded cache of [`Buffer`]s shared by every stream on a trunk.
///
/// `get` never blocks: it pops a recycled buffer if one is queued, otherwise
/// allocates a fresh one. `put` returns a buffer to the queue unless the
/// pool is already holding `holdcnt` of them, in which case the buffer is
/// simply dropped and `allcnt` shrinks back down on the next allocation.
pub struct BufferPool {
  queue: SegQueue<Buffer>,
  holdcnt: usize,
  queued: AtomicUsize,
  allcnt: AtomicUsize,
  usedcnt: AtomicUsize,
}

impl BufferPool {
  /// Creates a pool that holds on to at most `holdcnt` idle buffers.
  pub fn new(holdcnt: usize) -> Self {
    BufferPool {
      queue: SegQueue::new(),
      holdcnt,
      queued: AtomicUsize::new(0),
      allcnt: AtomicUsize::new(0),
      usedcnt: AtomicUsize::new(0),
    }
  }

  /// Takes a buffer from the pool, allocating a new one if none is idle.
  pub fn get(&self) -> Buffer {
    self.usedcnt.fetch_add(1, Ordering::Relaxed);
    if let Some(buf) = self.queue.pop() {
      self.queued.fetch_sub(1, Ordering::Relaxed);
      return buf;
    }
    self.allcnt.fetch_add(1, Ordering::Relaxed);
    Buffer::new()
  }

  /// Returns a buffer to the pool, or drops it once the pool is full.
  pub fn put(&self, mut buf: Buffer) {
    self.usedcnt.fetch_sub(1, Ordering::Relaxed);
    buf.reset();
    if self.queued.load(Ordering::Relaxed) >= self.holdcnt {
      self.allcnt.fetch_sub(1, Ordering::Relaxed);
      return;
    }
    self.queued.fetch_add(1, Ordering::Relaxed);
    self.queue.push(buf);
  }

  /// Returns a whole batch of buffers to the pool at once.
  ///
  /// Mirrors `appendList`, used during trunk teardown when a stream's
  /// leftover free-list is drained back into the shared pool.
  pub fn put_all(&self, buffers: impl IntoIterator<Item = Buffer>) {
    for buf in buffers {
      self.put(buf);
    }
  }

  /// Number of buffers currently checked out of the pool.
  pub fn used_count(&self) -> usize {
    self.usedcnt.load(Ordering::Relaxed)
  }

  /// Total buffers ever allocated and still tracked by the pool (idle + in use).
  pub fn allocated_count(&self) -> usize {
    self.allcnt.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reuses_returned_buffers() {
    let pool = BufferPool::new(4);
    let a = pool.get();
    assert_eq!(pool.allocated_count(), 1);
    pool.put(a);
    let b = pool.get();
    assert_eq!(pool.allocated_count(), 1, "get should reuse the returned buffer");
    pool.put(b);
  }

  #[test]
  fn drops_past_holdcnt() {
    let pool = BufferPool::new(1);
    let a = pool.get();
    let b = pool.get();
    pool.put(a);
    pool.put(b);
    assert_eq!(pool.allocated_count(), 1, "second buffer should be dropped, not held");
  }

  #[test]
  fn put_all_recycles_a_batch() {
    let pool = BufferPool::new(8);
    let bufs: Vec<Buffer> = (0..3).map(|_| pool.get()).collect();
    pool.put_all(bufs);
    assert_eq!(pool.used_count(), 0);
  }
}
