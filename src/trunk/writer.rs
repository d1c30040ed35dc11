//! Trunk writer thread: drains queued frames onto the wire, with control
//! frames (`PAUSE`/`RUN`, `NEW_CONNECT`, `NEW_LISTEN`, `CLOSE_CONNECT`)
//! always sent ahead of `DATA` frames, plus periodic keepalives and an
//! idle-connection timeout.
//!
//! Grounded on `examples/original_source/proxy/proxy.go::write`: selects
//! over an emergency channel and a data channel with the emergency channel
//! preferred, emits `KEEPALIVE` on a fixed interval, and tears the trunk
//! down if nothing at all has been seen from the peer for too long. This
//! crate adds a third, `ctrl_chan`, lane between the two so `NEW_CONNECT`/
//! `NEW_LISTEN`/`CLOSE_CONNECT` don't queue behind a backlog of `DATA` either.

use std::io::Write;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::Buffer;
use crate::{debug_log, trace_log};

use super::Trunk;

const POLL: Duration = Duration::from_millis(100);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

pub fn run(trunk: &Arc<Trunk>, data_rx: Receiver<Buffer>, ctrl_rx: Receiver<Buffer>, emergency_rx: Receiver<Buffer>) {
  defer_heavy::defer!(trunk.shutdown());

  #[allow(clippy::unwrap_used)]
  let mut socket = trunk.socket.try_clone().unwrap();
  let _ = socket.set_write_timeout(Some(POLL));

  let mut last_keepalive = Instant::now();
  let mut last_activity = Instant::now();

  loop {
    if trunk.is_shutting_down() {
      break;
    }

    let next = match emergency_rx.try_recv() {
      Ok(buf) => Some(buf),
      Err(TryRecvError::Empty) => match ctrl_rx.try_recv() {
        Ok(buf) => Some(buf),
        Err(TryRecvError::Empty) => match data_rx.recv_timeout(POLL) {
          Ok(buf) => Some(buf),
          Err(RecvTimeoutError::Timeout) => None,
          Err(RecvTimeoutError::Disconnected) => break,
        },
        Err(TryRecvError::Disconnected) => break,
      },
      Err(TryRecvError::Disconnected) => break,
    };

    if let Some(buf) = next {
      #[allow(clippy::indexing_slicing)]
      if let Err(e) = write_all(&mut socket, &buf.data[..buf.size]) {
        debug_log!("trunk writer: write failed: {}", e);
        trunk.pool_ref().put(buf);
        break;
      }
      trunk.pool_ref().put(buf);
      last_activity = Instant::now();
    }

    let now = Instant::now();
    if now.duration_since(last_keepalive) >= KEEPALIVE_INTERVAL {
      last_keepalive = now;
      if let Err(e) = send_keepalive(trunk, &mut socket) {
        debug_log!("trunk writer: keepalive failed: {}", e);
        break;
      }
    }
    if now.duration_since(last_activity) >= IDLE_TIMEOUT {
      trace_log!("trunk writer: idle for {:?}, tearing down", IDLE_TIMEOUT);
      break;
    }
  }
}

fn send_keepalive(trunk: &Arc<Trunk>, socket: &mut std::net::TcpStream) -> std::io::Result<()> {
  let buf = match super::command::build_frame(
    trunk.pool_ref(),
    &trunk.cipher,
    crate::wire::frame::Opcode::Keepalive,
    false,
    0,
    &[],
  ) {
    Ok(b) => b,
    Err(_) => return Ok(()),
  };
  #[allow(clippy::indexing_slicing)]
  let result = write_all(socket, &buf.data[..buf.size]);
  trunk.pool_ref().put(buf);
  result
}

fn write_all(socket: &mut std::net::TcpStream, mut data: &[u8]) -> std::io::Result<()> {
  while !data.is_empty() {
    match socket.write(data) {
      Ok(0) => return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "trunk socket closed")),
      Ok(n) => data = &data[n..],
      Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(())
}
