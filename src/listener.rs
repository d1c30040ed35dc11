//! Accept-loop worker for a single configured listen address.
//!
//! Grounded on `tiipotto-tii/src/extras/tcp_connector.rs` (retrying bind,
//! shutdown-flag-aware accept loop, per-connection thread spawn via the
//! panic-guarded spawner) and `examples/original_source/proxy/proxy.go`'s
//! `NewListener`/`NewPeerListener` (bind-retry-every-second-on-failure, one
//! `accept` callback per connection). `socket2` supplies `SO_REUSEPORT` the
//! same way `tiipotto-tii/src/extras/socket2_tcp_connector.rs` does, so a
//! restarted trunk can rebind a still-lingering port immediately.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use crate::error::{TunnelError, TunnelResult};
use crate::thread::spawn_guarded;
use crate::wire::address::{Address, ListenerSpec};
use crate::{debug_log, warn_log};

const BIND_RETRY: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receives every socket a [`Listener`] accepts, along with the address
/// traffic on it should ultimately be forwarded to.
pub trait AcceptSink: Send + Sync {
  fn on_accept(&self, socket: TcpStream, forward: Address);
}

/// One running accept loop, bound to `spec.listen` and forwarding new
/// connections to `sink` tagged with `spec.forward`.
pub struct Listener {
  shutdown: Arc<AtomicBool>,
}

impl Listener {
  /// Binds `spec.listen` and spawns its accept loop.
  pub fn spawn(spec: ListenerSpec, sink: Arc<dyn AcceptSink>) -> Listener {
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker_shutdown = Arc::clone(&shutdown);
    let addr = spec.listen.addr.clone();
    spawn_guarded(format!("listener-{addr}"), move || {
      run_accept_loop(spec, sink, &worker_shutdown);
    });
    Listener { shutdown }
  }

  /// Stops the accept loop. The underlying socket closes when the worker
  /// thread notices and unwinds; this does not block for that to happen.
  pub fn stop(&self) {
    self.shutdown.store(true, Ordering::SeqCst);
  }
}

impl Drop for Listener {
  fn drop(&mut self) {
    self.stop();
  }
}

fn bind_reuseport(addr: &str) -> TunnelResult<std::net::TcpListener> {
  let socket_addr: std::net::SocketAddr =
    addr.parse().map_err(|_| TunnelError::MalformedFrame("invalid listen address"))?;
  let domain = if socket_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
  let socket = Socket::new(domain, Type::STREAM, None)?;
  socket.set_reuse_address(true)?;
  #[cfg(unix)]
  socket.set_reuse_port(true)?;
  socket.bind(&socket_addr.into())?;
  socket.listen(128)?;
  socket.set_nonblocking(true)?;
  Ok(socket.into())
}

fn run_accept_loop(spec: ListenerSpec, sink: Arc<dyn AcceptSink>, shutdown: &AtomicBool) {
  loop {
    if shutdown.load(Ordering::Relaxed) {
      return;
    }
    let listener = match bind_reuseport(&spec.listen.addr) {
      Ok(l) => l,
      Err(e) => {
        warn_log!("bind {} failed: {}, retrying", spec.listen.addr, e);
        std::thread::sleep(BIND_RETRY);
        continue;
      }
    };

    loop {
      if shutdown.load(Ordering::Relaxed) {
        return;
      }
      match listener.accept() {
        Ok((socket, peer)) => {
          debug_log!("accepted {} on {}", peer, spec.listen.addr);
          sink.on_accept(socket, spec.forward.clone());
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
          std::thread::sleep(POLL_INTERVAL);
        }
        Err(e) => {
          warn_log!("accept on {} failed: {}", spec.listen.addr, e);
          break;
        }
      }
    }
  }
}
