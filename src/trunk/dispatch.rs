//! Frame dispatch: decides what to do with a decrypted frame.
//!
//! Grounded on `examples/original_source/proxy/proxy.go::readProc`: look up
//! the stream by id under the *opposite* subtype bit, reply `CLOSE_CONNECT`
//! for frames referencing an unknown stream (the `handle_close` arm skips
//! this reply to avoid a reply loop), and otherwise hand the frame to the
//! matching stream or trunk-level handler.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::Buffer;
use crate::wire::address::{Address, ListenerSpec};
use crate::wire::frame::{FrameHeader, Opcode};
use crate::{debug_log, warn_log};

use super::Trunk;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles one decrypted frame. `payload` excludes the header and any
/// trailing padding.
pub fn handle_frame(trunk: &Arc<Trunk>, header: FrameHeader, payload: &[u8], buf: Buffer) {
  if matches!(header.opcode, Opcode::Data) {
    handle_data(trunk, header, buf);
    return;
  }
  match header.opcode {
    Opcode::NewListen => handle_new_listen(trunk, payload),
    Opcode::NewConnect => handle_new_connect(trunk, header, payload),
    Opcode::Keepalive => debug_log!("keepalive from peer"),
    Opcode::Pause | Opcode::Run => handle_pause_run(trunk, header),
    Opcode::CloseConnect => handle_close(trunk, header),
    Opcode::Data => unreachable!("handled above"),
  }
  trunk.release_buffer(buf);
}

fn handle_new_listen(trunk: &Arc<Trunk>, payload: &[u8]) {
  match serde_json::from_slice::<ListenerSpec>(payload) {
    Ok(spec) => trunk.add_listener(spec),
    Err(e) => warn_log!("malformed NEW_LISTEN payload: {}", e),
  }
}

fn handle_new_connect(trunk: &Arc<Trunk>, header: FrameHeader, payload: &[u8]) {
  let forward: Address = match serde_json::from_slice(payload) {
    Ok(addr) => addr,
    Err(e) => {
      warn_log!("malformed NEW_CONNECT payload: {}", e);
      let _ = trunk.send_close_reply(header.stream_id, header.subtype);
      return;
    }
  };

  let dial_addr = forward.addr.clone();
  match dial_with_timeout(&dial_addr) {
    Ok(socket) => {
      trunk.accept_remote_connect(header.stream_id, socket);
    }
    Err(e) => {
      warn_log!("dial {} failed for stream {}: {}", dial_addr, header.stream_id, e);
      let _ = trunk.send_close_reply(header.stream_id, header.subtype);
    }
  }
}

fn dial_with_timeout(addr: &str) -> std::io::Result<TcpStream> {
  use std::net::ToSocketAddrs;
  let resolved = addr
    .to_socket_addrs()?
    .next()
    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"))?;
  TcpStream::connect_timeout(&resolved, DIAL_TIMEOUT)
}

fn handle_data(trunk: &Arc<Trunk>, header: FrameHeader, mut buf: Buffer) {
  match trunk.find_stream(header.stream_id, header.subtype) {
    Some(stream) => {
      // The stream writer expects `buf.filled()` to be exactly the payload
      // bytes; shift it down from its header-offset position in place so
      // the pooled buffer can be handed straight to the stream.
      let body_end = (header.size as usize).saturating_sub(header.pad as usize);
      #[allow(clippy::indexing_slicing)]
      buf.data.copy_within(crate::wire::frame::HEADER_LEN..body_end, 0);
      buf.size = body_end.saturating_sub(crate::wire::frame::HEADER_LEN);
      stream.deliver(buf);
    }
    None => {
      trunk.release_buffer(buf);
      let _ = trunk.send_close_reply(header.stream_id, header.subtype);
    }
  }
}

fn handle_pause_run(trunk: &Arc<Trunk>, header: FrameHeader) {
  match trunk.find_stream(header.stream_id, header.subtype) {
    Some(stream) => stream.set_paused(matches!(header.opcode, Opcode::Pause)),
    None => {
      let _ = trunk.send_close_reply(header.stream_id, header.subtype);
    }
  }
}

fn handle_close(trunk: &Arc<Trunk>, header: FrameHeader) {
  if let Some(stream) = trunk.remove_stream(header.stream_id, header.subtype) {
    stream.close(trunk.pool_ref());
  }
}
