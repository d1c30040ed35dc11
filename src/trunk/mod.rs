//! The trunk: one encrypted, authenticated TCP connection to a peer,
//! multiplexing every [`crate::stream::Stream`] and [`crate::listener::Listener`]
//! running over it.
//!
//! Grounded on `tiipotto-tii/src/tii_server.rs`'s `Server` (a struct holding
//! shared config plus a shutdown flag that every worker thread polls) and on
//! `examples/original_source/proxy/proxy.go`'s `Proxy` struct for the
//! registries and channel layout.

mod command;
mod dispatch;
mod reader;
mod writer;

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, RwLock};

use crate::buffer::{Buffer, BufferPool};
use crate::error::{TunnelError, TunnelResult};
use crate::listener::{AcceptSink, Listener};
use crate::stream::{FrameSink, Stream};
use crate::thread::spawn_guarded;
use crate::util::unwrap_poison;
use crate::wire::address::{Address, ListenerSpec};
use crate::wire::crypto::TrunkCipher;
use crate::wire::frame::Opcode;
use crate::{info_log, warn_log};

/// How many buffers a single stream's free-list holds before spilling back
/// to the shared pool.
const STREAM_HOLDCNT: usize = 16;

/// Bounded depth of `send_chan`: plain `DATA` frames. A full channel blocks
/// the sender, which is how a slow trunk socket backpressures every stream
/// reading off it.
const DATA_CHAN_DEPTH: usize = 256;

/// Bounded depth of `ctrl_chan`: `NEW_CONNECT`/`NEW_LISTEN`/`CLOSE_CONNECT`/
/// `KEEPALIVE`.
const CTRL_CHAN_DEPTH: usize = 64;

/// Bounded depth of `emergency_chan`: `PAUSE`/`RUN` only, drained ahead of
/// everything else so flow control isn't stuck behind a backlog of data.
const EMERGENCY_CHAN_DEPTH: usize = 16;

/// A trunk's two stream registries, keyed the way
/// `examples/original_source/proxy/proxy.go` keys `clients`/`subClients`:
/// by stream id, split by which side originated the stream.
struct Registries {
  /// Streams this side accepted locally (subtype = true).
  local: RwLock<HashMap<u32, Arc<Stream>>>,
  /// Streams this side opened in response to the peer's `NEW_CONNECT`
  /// (subtype = false).
  remote: RwLock<HashMap<u32, Arc<Stream>>>,
}

impl Registries {
  fn new() -> Self {
    Registries { local: RwLock::new(HashMap::new()), remote: RwLock::new(HashMap::new()) }
  }

  /// Looks a stream up by id in whichever map corresponds to the *other*
  /// side's subtype bit, mirroring `readProc`'s inverse-subtype lookup.
  fn find(&self, stream_id: u32, frame_subtype: bool) -> Option<Arc<Stream>> {
    let map = if frame_subtype { &self.remote } else { &self.local };
    unwrap_poison(map.read()).get(&stream_id).cloned()
  }

  fn insert_local(&self, stream: Arc<Stream>) {
    unwrap_poison(self.local.write()).insert(stream.id, stream);
  }

  /// Inserts `stream` under its id, returning whatever stream previously
  /// occupied that slot so the caller can force it closed. A bare
  /// `insert` here would otherwise leak the incumbent's reader/writer
  /// threads and socket on a reused stream id.
  fn insert_remote(&self, stream: Arc<Stream>) -> Option<Arc<Stream>> {
    unwrap_poison(self.remote.write()).insert(stream.id, stream)
  }

  fn remove(&self, stream_id: u32, frame_subtype: bool) -> Option<Arc<Stream>> {
    let map = if frame_subtype { &self.remote } else { &self.local };
    unwrap_poison(map.write()).remove(&stream_id)
  }

  fn close_all(&self, pool: &BufferPool) {
    for (_, s) in unwrap_poison(self.local.write()).drain() {
      s.close(pool);
    }
    for (_, s) in unwrap_poison(self.remote.write()).drain() {
      s.close(pool);
    }
  }
}

/// One multiplexed trunk connection.
pub struct Trunk {
  socket: TcpStream,
  cipher: TrunkCipher,
  pool: Arc<BufferPool>,
  registries: Registries,
  listeners: Mutex<Vec<Listener>>,
  next_id: AtomicU32,
  shutdown: Arc<AtomicBool>,
  /// Plain `DATA` frames. Bounded so a slow trunk socket backpressures the
  /// streams reading off it instead of growing without limit.
  data_tx: SyncSender<Buffer>,
  /// `NEW_CONNECT`/`NEW_LISTEN`/`CLOSE_CONNECT`/`KEEPALIVE`.
  ctrl_tx: SyncSender<Buffer>,
  /// `PAUSE`/`RUN` only. Drained ahead of `ctrl_tx` and `data_tx` so flow
  /// control never waits behind a backlog of data.
  emergency_tx: SyncSender<Buffer>,
}

impl Trunk {
  /// Takes ownership of an authenticated socket and cipher and starts the
  /// trunk's reader and writer threads.
  pub fn start(socket: TcpStream, cipher: TrunkCipher, pool: Arc<BufferPool>) -> Arc<Trunk> {
    let (data_tx, data_rx) = mpsc::sync_channel(DATA_CHAN_DEPTH);
    let (ctrl_tx, ctrl_rx) = mpsc::sync_channel(CTRL_CHAN_DEPTH);
    let (emergency_tx, emergency_rx) = mpsc::sync_channel(EMERGENCY_CHAN_DEPTH);
    let trunk = Arc::new(Trunk {
      socket,
      cipher,
      pool,
      registries: Registries::new(),
      listeners: Mutex::new(Vec::new()),
      next_id: AtomicU32::new(1),
      shutdown: Arc::new(AtomicBool::new(false)),
      data_tx,
      ctrl_tx,
      emergency_tx,
    });

    let reader_trunk = Arc::clone(&trunk);
    spawn_guarded("trunk-reader", move || reader::run(&reader_trunk));

    let writer_trunk = Arc::clone(&trunk);
    spawn_guarded("trunk-writer", move || writer::run(&writer_trunk, data_rx, ctrl_rx, emergency_rx));

    trunk
  }

  /// Opens a listener whose accepted connections are announced to the peer
  /// with `NEW_CONNECT`, as requested by an inbound `NEW_LISTEN` frame or by
  /// local configuration (`server`'s `--listener`/`--peer-listener`).
  pub fn add_listener(self: &Arc<Self>, spec: ListenerSpec) {
    info_log!("opening listener {} -> {}", spec.listen.addr, spec.forward.addr);
    let acceptor: Arc<dyn AcceptSink> = Arc::new(TrunkAcceptor(Arc::clone(self)));
    let listener = Listener::spawn(spec, acceptor);
    unwrap_poison(self.listeners.lock()).push(listener);
  }

  /// Asks the peer to open a listener on our behalf (`NEW_LISTEN`), used by
  /// `--peer-listener` configuration entries.
  pub fn request_peer_listener(&self, spec: &ListenerSpec) -> TunnelResult<()> {
    let body = serde_json::to_vec(spec)?;
    self.enqueue_control(Opcode::NewListen, false, 0, &body)
  }

  pub fn shutdown(&self) {
    if self.shutdown.swap(true, Ordering::SeqCst) {
      return;
    }
    for listener in unwrap_poison(self.listeners.lock()).drain(..) {
      listener.stop();
    }
    self.registries.close_all(&self.pool);
    let _ = self.socket.shutdown(std::net::Shutdown::Both);
  }

  pub fn is_shutting_down(&self) -> bool {
    self.shutdown.load(Ordering::Relaxed)
  }

  fn next_stream_id(&self) -> u32 {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  fn enqueue_data(&self, buf: Buffer) -> TunnelResult<()> {
    self.data_tx.send(buf).map_err(|_| TunnelError::ShuttingDown)
  }

  fn enqueue_control(&self, opcode: Opcode, subtype: bool, stream_id: u32, body: &[u8]) -> TunnelResult<()> {
    let buf = command::build_frame(&self.pool, &self.cipher, opcode, subtype, stream_id, body)?;
    self.ctrl_tx.send(buf).map_err(|_| TunnelError::ShuttingDown)
  }

  fn enqueue_emergency(&self, opcode: Opcode, subtype: bool, stream_id: u32) -> TunnelResult<()> {
    let buf = command::build_frame(&self.pool, &self.cipher, opcode, subtype, stream_id, &[])?;
    self.emergency_tx.send(buf).map_err(|_| TunnelError::ShuttingDown)
  }
}

impl FrameSink for Trunk {
  fn send_data(&self, stream_id: u32, subtype: bool, payload: &[u8]) -> TunnelResult<()> {
    let buf = command::build_frame(&self.pool, &self.cipher, Opcode::Data, subtype, stream_id, payload)?;
    self.enqueue_data(buf)
  }

  fn send_pause(&self, stream_id: u32, subtype: bool, pause: bool) -> TunnelResult<()> {
    let opcode = if pause { Opcode::Pause } else { Opcode::Run };
    self.enqueue_emergency(opcode, subtype, stream_id)
  }

  fn send_close(&self, stream_id: u32, subtype: bool) -> TunnelResult<()> {
    self.enqueue_control(Opcode::CloseConnect, subtype, stream_id, &[])
  }
}

/// Adapts an `Arc<Trunk>` to [`AcceptSink`] — a [`Listener`] only ever sees
/// `&self`, but registering a new stream needs a clonable `Arc<Trunk>` to
/// hand the stream as its [`FrameSink`].
struct TrunkAcceptor(Arc<Trunk>);

impl AcceptSink for TrunkAcceptor {
  fn on_accept(&self, socket: TcpStream, forward: Address) {
    self.0.accept_connection(socket, forward);
  }
}

impl Trunk {
  /// Real accept handler; takes `Arc<Self>` so it can hand each new
  /// [`Stream`] a cloneable [`FrameSink`].
  fn accept_connection(self: &Arc<Self>, socket: TcpStream, forward: Address) {
    if self.is_shutting_down() {
      return;
    }
    let id = self.next_stream_id();
    let stream = Stream::spawn(
      id,
      true,
      socket,
      Arc::clone(&self.pool),
      Arc::clone(self) as Arc<dyn FrameSink>,
      STREAM_HOLDCNT,
    );
    self.registries.insert_local(Arc::clone(&stream));

    let announce = match serde_json::to_vec(&forward) {
      Ok(b) => b,
      Err(e) => {
        warn_log!("failed to encode forward address: {}", e);
        return;
      }
    };
    if let Err(e) = self.enqueue_control(Opcode::NewConnect, true, id, &announce) {
      warn_log!("failed to announce new connection {}: {}", id, e);
      stream.close(&self.pool);
      self.registries.remove(id, true);
    }
  }

  /// Registers a socket dialed in response to the peer's `NEW_CONNECT`,
  /// under the stream id the peer chose (subtype = false side of the map).
  /// A reused id force-closes whatever stream was already registered there
  /// instead of silently abandoning its reader/writer threads and socket.
  fn accept_remote_connect(self: &Arc<Self>, stream_id: u32, socket: TcpStream) {
    let stream = Stream::spawn(
      stream_id,
      false,
      socket,
      Arc::clone(&self.pool),
      Arc::clone(self) as Arc<dyn FrameSink>,
      STREAM_HOLDCNT,
    );
    if let Some(incumbent) = self.registries.insert_remote(stream) {
      warn_log!("stream id {} reused before its predecessor closed, force-closing it", stream_id);
      incumbent.close(&self.pool);
    }
  }

  fn find_stream(&self, stream_id: u32, frame_subtype: bool) -> Option<Arc<Stream>> {
    self.registries.find(stream_id, frame_subtype)
  }

  fn remove_stream(&self, stream_id: u32, frame_subtype: bool) -> Option<Arc<Stream>> {
    self.registries.remove(stream_id, frame_subtype)
  }

  fn send_close_reply(&self, stream_id: u32, frame_subtype: bool) -> TunnelResult<()> {
    self.enqueue_control(Opcode::CloseConnect, frame_subtype, stream_id, &[])
  }

  fn release_buffer(&self, buf: crate::buffer::Buffer) {
    self.pool.put(buf);
  }

  fn pool_ref(&self) -> &BufferPool {
    &self.pool
  }
}
