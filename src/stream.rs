//! A single tunneled TCP connection multiplexed over a trunk.
//!
//! Grounded on `examples/original_source/proxy/client.go`'s `read`/`write`
//! goroutines (translated into a thread-per-connection idiom, see
//! `tiipotto-tii/src/stream.rs`'s `ConnectionStream` read/write split) and
//! on `tiipotto-tii/src/extras/tcp_connector.rs` for spawning a guarded
//! worker thread per connection.
//!
//! The writer side keeps its actual backlog in a `send_queue: BufferHeader`
//! (`examples/original_source/proxy/buffer.go`'s `bufferHeader`, reused here
//! as a queue rather than a recycle cache) and only uses a tiny bounded
//! channel as a wake/exit signal. After every local write it rechecks
//! `send_queue.almost_full()`/`almost_empty()` and tells the peer to
//! `PAUSE`/`RUN` accordingly, mirroring `client.go`'s write loop.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::{Buffer, BufferHeader, BufferPool, DEFAULT_BUFFER_SIZE};
use crate::error::TunnelResult;
use crate::thread::spawn_guarded;
use crate::wire::frame::HEADER_LEN;
use crate::{debug_log, trace_log};

/// How long a stream's reader sleeps between polls while its peer has it
/// paused, mirroring the original's cooperative 50ms busy-sleep.
const PAUSE_SLEEP: Duration = Duration::from_millis(50);

/// How long a socket read/write blocks before giving the reader thread a
/// chance to notice the stream has been asked to close.
const IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Depth of the writer's wake/exit signal channel. It never carries data —
/// just a nudge — so one slot plus coalescing via `try_send` is enough.
const SIGNAL_CHAN_DEPTH: usize = 1;

/// Where a [`Stream`] sends frames bound for its peer across the trunk.
///
/// Kept as a trait so `stream` does not need to depend on `trunk` directly
/// — the trunk implements this once and hands each stream a shared handle,
/// the same seam `tiipotto-tii`'s connector traits sit at.
pub trait FrameSink: Send + Sync {
  fn send_data(&self, stream_id: u32, subtype: bool, payload: &[u8]) -> TunnelResult<()>;
  fn send_pause(&self, stream_id: u32, subtype: bool, pause: bool) -> TunnelResult<()>;
  fn send_close(&self, stream_id: u32, subtype: bool) -> TunnelResult<()>;
}

/// Wakes the writer thread to drain `send_queue`, or tells it to exit.
enum WriterSignal {
  Wake,
  Exit,
}

/// One multiplexed connection: a local `TcpStream` plus the bookkeeping
/// needed to shuttle bytes between it and the trunk.
pub struct Stream {
  pub id: u32,
  pub subtype: bool,
  free_list: BufferHeader,
  /// Buffers already decrypted off the trunk, waiting to be written to the
  /// local socket. Its fill level drives `PAUSE`/`RUN` back to the peer.
  send_queue: BufferHeader,
  writer_signal: SyncSender<WriterSignal>,
  /// Peer told us to pause: the reader stops pulling more data in.
  paused: AtomicBool,
  /// We told the peer to pause: tracked so we only emit one `PAUSE`/`RUN`
  /// per edge crossing instead of one per write.
  send_paused: AtomicBool,
  closed: AtomicBool,
}

impl Stream {
  /// Spawns the reader and writer threads for a freshly accepted or dialed
  /// socket and returns the handle used to feed it inbound frames.
  pub fn spawn(
    id: u32,
    subtype: bool,
    socket: TcpStream,
    pool: Arc<BufferPool>,
    sink: Arc<dyn FrameSink>,
    holdcnt: usize,
  ) -> Arc<Stream> {
    let _ = socket.set_read_timeout(Some(IO_TIMEOUT));
    let _ = socket.set_write_timeout(Some(IO_TIMEOUT));

    let (writer_signal, signal_rx) = mpsc::sync_channel(SIGNAL_CHAN_DEPTH);
    let stream = Arc::new(Stream {
      id,
      subtype,
      free_list: BufferHeader::new(holdcnt),
      send_queue: BufferHeader::new(holdcnt),
      writer_signal,
      paused: AtomicBool::new(false),
      send_paused: AtomicBool::new(false),
      closed: AtomicBool::new(false),
    });

    let reader_socket = socket.try_clone().expect("clone tcp stream for reader thread");
    let reader_stream = Arc::clone(&stream);
    let reader_sink = Arc::clone(&sink);
    let reader_pool = Arc::clone(&pool);
    spawn_guarded(format!("stream-{id}-read"), move || {
      reader_stream.run_reader(reader_socket, reader_sink, &reader_pool);
    });

    let writer_stream = Arc::clone(&stream);
    let writer_pool = Arc::clone(&pool);
    spawn_guarded(format!("stream-{id}-write"), move || {
      writer_stream.run_writer(socket, signal_rx, sink, &writer_pool);
    });

    stream
  }

  /// Queues a frame's payload to be written to the local socket.
  pub fn deliver(&self, buf: Buffer) {
    self.send_queue.push_filled(buf);
    let _ = self.writer_signal.try_send(WriterSignal::Wake);
  }

  /// Sets whether this stream's reader should hold off sending more data.
  pub fn set_paused(&self, paused: bool) {
    self.paused.store(paused, Ordering::Relaxed);
  }

  /// Signals both worker threads to stop and releases pooled buffers.
  pub fn close(&self, pool: &BufferPool) {
    if self.closed.swap(true, Ordering::SeqCst) {
      return;
    }
    let _ = self.writer_signal.try_send(WriterSignal::Exit);
    self.free_list.drain_to(pool);
    self.send_queue.drain_to(pool);
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Relaxed)
  }

  fn run_reader(&self, mut socket: TcpStream, sink: Arc<dyn FrameSink>, pool: &BufferPool) {
    loop {
      if self.closed.load(Ordering::Relaxed) {
        break;
      }
      if self.paused.load(Ordering::Relaxed) {
        std::thread::sleep(PAUSE_SLEEP);
        continue;
      }
      let mut buf = self.free_list.get(pool);
      #[allow(clippy::indexing_slicing)]
      let read_area = &mut buf.data[HEADER_LEN..DEFAULT_BUFFER_SIZE];
      match socket.read(read_area) {
        Ok(0) => {
          trace_log!("stream {} local socket closed", self.id);
          break;
        }
        Ok(n) => {
          #[allow(clippy::indexing_slicing)]
          let payload = &buf.data[HEADER_LEN..HEADER_LEN + n];
          if let Err(e) = sink.send_data(self.id, self.subtype, payload) {
            debug_log!("stream {} failed to forward data: {}", self.id, e);
            self.free_list.put(buf, pool);
            break;
          }
          self.free_list.put(buf, pool);
        }
        Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
          self.free_list.put(buf, pool);
          continue;
        }
        Err(e) => {
          trace_log!("stream {} local read failed: {}", self.id, e);
          self.free_list.put(buf, pool);
          break;
        }
      }
    }
    self.closed.store(true, Ordering::SeqCst);
    let _ = sink.send_close(self.id, self.subtype);
  }

  fn run_writer(
    &self,
    mut socket: TcpStream,
    signal_rx: Receiver<WriterSignal>,
    sink: Arc<dyn FrameSink>,
    pool: &BufferPool,
  ) {
    loop {
      match signal_rx.recv_timeout(IO_TIMEOUT) {
        Ok(WriterSignal::Wake) => {
          if !self.drain_send_queue(&mut socket, &sink, pool) {
            break;
          }
        }
        Ok(WriterSignal::Exit) => break,
        Err(RecvTimeoutError::Timeout) => {
          if self.closed.load(Ordering::Relaxed) {
            break;
          }
        }
        Err(RecvTimeoutError::Disconnected) => break,
      }
    }
    let _ = socket.shutdown(std::net::Shutdown::Both);
  }

  /// Writes every buffer currently queued, checking flow control after each
  /// one. Returns `false` if the local socket failed and the writer thread
  /// should stop.
  fn drain_send_queue(&self, socket: &mut TcpStream, sink: &Arc<dyn FrameSink>, pool: &BufferPool) -> bool {
    while let Some(buf) = self.send_queue.pop() {
      if let Err(e) = write_all_ignoring_timeouts(socket, buf.filled()) {
        trace_log!("stream {} local write failed: {}", self.id, e);
        self.free_list.put(buf, pool);
        return false;
      }
      self.free_list.put(buf, pool);
      self.update_flow_control(sink);
    }
    true
  }

  /// Tells the peer to `PAUSE` once the backlog crosses the full threshold,
  /// and `RUN` once it drains back below the empty threshold.
  fn update_flow_control(&self, sink: &Arc<dyn FrameSink>) {
    if self.send_queue.almost_full() {
      if !self.send_paused.swap(true, Ordering::Relaxed) {
        let _ = sink.send_pause(self.id, self.subtype, true);
      }
    } else if self.send_queue.almost_empty() && self.send_paused.swap(false, Ordering::Relaxed) {
      let _ = sink.send_pause(self.id, self.subtype, false);
    }
  }
}

fn write_all_ignoring_timeouts(socket: &mut TcpStream, mut data: &[u8]) -> std::io::Result<()> {
  while !data.is_empty() {
    match socket.write(data) {
      Ok(0) => return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "local socket closed")),
      Ok(n) => data = &data[n..],
      Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(())
}
