//! Per-stream buffer free-list with hysteresis-based flow control hints.
//!
//! Grounded on `examples/original_source/proxy/buffer.go`'s `bufferHeader`:
//! a small owned list of recycled buffers, plus `almostFull`/`almostEmpty`
//! checks a stream uses to decide when to tell its peer to pause or resume.
//! The original uses an intrusive singly linked list; this crate uses a
//! `VecDeque` behind a `Mutex` instead, giving the same FIFO append/pop/
//! count semantics without raw pointers or `unsafe`.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Buffer, BufferPool};
use crate::util::unwrap_poison;

/// A stream-owned cache of buffers, backed by a shared [`BufferPool`] for
/// both overflow (when the list is empty) and drain (when it is full).
pub struct BufferHeader {
  holdcnt: usize,
  list: Mutex<VecDeque<Buffer>>,
}

impl BufferHeader {
  /// Creates a free-list that holds on to at most `holdcnt` buffers before
  /// spilling returns straight through to the pool.
  pub fn new(holdcnt: usize) -> Self {
    BufferHeader { holdcnt, list: Mutex::new(VecDeque::with_capacity(holdcnt)) }
  }

  /// Takes a buffer off the free-list, falling back to `pool` if empty.
  pub fn get(&self, pool: &BufferPool) -> Buffer {
    if let Some(buf) = self.pop() {
      return buf;
    }
    pool.get()
  }

  /// Returns a buffer to the free-list, or straight to `pool` once the
  /// list already holds `holdcnt` entries.
  pub fn put(&self, mut buf: Buffer, pool: &BufferPool) {
    buf.reset();
    let mut list = unwrap_poison(self.list.lock());
    if list.len() >= self.holdcnt {
      drop(list);
      pool.put(buf);
      return;
    }
    list.push_back(buf);
  }

  /// Takes the head buffer off the list, if any, without touching `pool`.
  pub fn pop(&self) -> Option<Buffer> {
    unwrap_poison(self.list.lock()).pop_front()
  }

  /// Appends an already-filled buffer to the back of the list, bypassing
  /// `reset()` and the holdcnt overflow-to-pool behavior of [`Self::put`].
  /// Used where this list is the actual queue of work (a stream's
  /// `send_queue`) rather than a recycle cache.
  pub fn push_filled(&self, buf: Buffer) {
    unwrap_poison(self.list.lock()).push_back(buf);
  }

  /// True once the list holds more than two thirds of `holdcnt`, so the
  /// stream's reader should signal `PAUSE` to its peer.
  pub fn almost_full(&self) -> bool {
    let len = unwrap_poison(self.list.lock()).len();
    len > 2 * self.holdcnt / 3
  }

  /// True once the list holds less than a third of `holdcnt`, so the
  /// stream's reader should signal `RUN` to its peer.
  pub fn almost_empty(&self) -> bool {
    let len = unwrap_poison(self.list.lock()).len();
    len < self.holdcnt / 3
  }

  /// Drains every buffer still held by this free-list back to `pool`.
  ///
  /// Called during stream teardown so pooled memory isn't stranded with a
  /// dead stream.
  pub fn drain_to(&self, pool: &BufferPool) {
    let drained: Vec<Buffer> = unwrap_poison(self.list.lock()).drain(..).collect();
    pool.put_all(drained);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hysteresis_thresholds() {
    let pool = BufferPool::new(32);
    let header = BufferHeader::new(9);
    assert!(header.almost_empty(), "0 < 9/3");
    assert!(!header.almost_full());

    for _ in 0..7 {
      header.put(pool.get(), &pool);
    }
    assert!(header.almost_full(), "7 > 2*9/3");
    assert!(!header.almost_empty());
  }

  #[test]
  fn hysteresis_matches_worked_example() {
    // holdcnt=32: RUN fires once the queue drops below 32/3 == 10.
    let pool = BufferPool::new(32);
    let header = BufferHeader::new(32);
    for _ in 0..10 {
      header.put(pool.get(), &pool);
    }
    assert!(!header.almost_empty(), "10 is not < 10");
    header.pop();
    assert!(header.almost_empty(), "9 < 10");
  }

  #[test]
  fn overflow_spills_to_pool() {
    let pool = BufferPool::new(16);
    let header = BufferHeader::new(2);
    for _ in 0..5 {
      header.put(pool.get(), &pool);
    }
    assert_eq!(pool.used_count(), 2, "list holds 2, the rest spill back to the pool");
  }

  #[test]
  fn drain_returns_everything() {
    let pool = BufferPool::new(16);
    let header = BufferHeader::new(4);
    header.put(pool.get(), &pool);
    header.put(pool.get(), &pool);
    header.drain_to(&pool);
    assert_eq!(pool.used_count(), 0);
  }
}
