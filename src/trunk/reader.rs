//! Trunk reader thread: pulls frames off the wire, decrypts them, and hands
//! them to [`super::dispatch`].
//!
//! Grounded on `examples/original_source/proxy/proxy.go::read` (the trunk's
//! reader goroutine): a deadline-bounded read so the thread periodically
//! wakes up even with no traffic (the `TICK` mechanism, here just the
//! socket's own read timeout), header decrypt-and-validate, then payload
//! decrypt and dispatch.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::wire::frame::{FrameHeader, CIPHER_BLOCK_LEN, HEADER_LEN};
use crate::{debug_log, trace_log};

use super::Trunk;

const TICK: Duration = Duration::from_millis(100);

pub fn run(trunk: &Arc<Trunk>) {
  defer_heavy::defer!(trunk.shutdown());

  #[allow(clippy::unwrap_used)]
  let mut socket = trunk.socket.try_clone().unwrap();
  let _ = socket.set_read_timeout(Some(TICK));

  loop {
    if trunk.is_shutting_down() {
      break;
    }

    let mut buf = trunk.pool.get();
    #[allow(clippy::indexing_slicing)]
    let head_block = &mut buf.data[..CIPHER_BLOCK_LEN];
    match read_exact_or_tick(&mut socket, head_block, trunk) {
      Ok(true) => {}
      Ok(false) => {
        trunk.pool.put(buf);
        continue;
      }
      Err(e) => {
        debug_log!("trunk reader: socket closed: {}", e);
        trunk.pool.put(buf);
        break;
      }
    }

    if let Err(e) = trunk.cipher.decrypt(&mut buf.data[..CIPHER_BLOCK_LEN]) {
      debug_log!("trunk reader: failed to decrypt header: {}", e);
      trunk.pool.put(buf);
      break;
    }

    let header = match FrameHeader::decode_from(&buf.data[..HEADER_LEN]) {
      Ok(h) => h,
      Err(e) => {
        debug_log!("trunk reader: malformed header: {}", e);
        trunk.pool.put(buf);
        break;
      }
    };

    let total = header.size as usize;
    if total < CIPHER_BLOCK_LEN || total % CIPHER_BLOCK_LEN != 0 || total > buf.data.len() {
      debug_log!("trunk reader: invalid frame size {}", total);
      trunk.pool.put(buf);
      break;
    }

    if total > CIPHER_BLOCK_LEN {
      #[allow(clippy::indexing_slicing)]
      let rest = &mut buf.data[CIPHER_BLOCK_LEN..total];
      match read_exact_or_tick(&mut socket, rest, trunk) {
        Ok(true) => {}
        Ok(false) => {
          trunk.pool.put(buf);
          continue;
        }
        Err(e) => {
          debug_log!("trunk reader: socket closed mid-frame: {}", e);
          trunk.pool.put(buf);
          break;
        }
      }
      #[allow(clippy::indexing_slicing)]
      if let Err(e) = trunk.cipher.decrypt(rest) {
        debug_log!("trunk reader: failed to decrypt payload: {}", e);
        trunk.pool.put(buf);
        break;
      }
    }

    let body_end = total.saturating_sub(header.pad as usize);
    if body_end < HEADER_LEN {
      debug_log!("trunk reader: pad count exceeds frame");
      trunk.pool.put(buf);
      break;
    }
    #[allow(clippy::indexing_slicing)]
    let payload: Vec<u8> = buf.data[HEADER_LEN..body_end].to_vec();
    trace_log!("trunk reader: frame opcode={:?} id={} len={}", header.opcode, header.stream_id, payload.len());
    super::dispatch::handle_frame(trunk, header, &payload, buf);
  }
}

/// Reads exactly `out.len()` bytes, retrying across read-timeout wakeups so
/// the shutdown flag gets checked periodically. Returns `Ok(false)` if the
/// trunk was asked to shut down mid-read (caller should abandon the frame).
fn read_exact_or_tick(
  socket: &mut std::net::TcpStream,
  out: &mut [u8],
  trunk: &Arc<Trunk>,
) -> std::io::Result<bool> {
  let mut filled = 0;
  while filled < out.len() {
    if trunk.is_shutting_down() {
      return Ok(false);
    }
    #[allow(clippy::indexing_slicing)]
    match socket.read(&mut out[filled..]) {
      Ok(0) => {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed the trunk"));
      }
      Ok(n) => filled += n,
      Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(true)
}

