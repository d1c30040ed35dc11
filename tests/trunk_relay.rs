//! End-to-end relay: a real client connects to a trunk's listener, the
//! trunk forwards that connection across to its peer, the peer dials a real
//! echo server, and bytes make the whole round trip — handshake, open a
//! listener, dial through it, data arrives — driven over real sockets the
//! way `tiipotto-tii/tests/shutdown_test.rs` drives its HTTP server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use trunkline::buffer::BufferPool;
use trunkline::handshake::{node_handshake, server_handshake};
use trunkline::wire::address::{Address, ListenerSpec};

fn spawn_echo_server() -> String {
  let listener = TcpListener::bind("127.0.0.1:0").expect("bind echo");
  let addr = listener.local_addr().expect("addr").to_string();
  std::thread::spawn(move || {
    for incoming in listener.incoming() {
      let mut socket = match incoming {
        Ok(s) => s,
        Err(_) => break,
      };
      std::thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
          match socket.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
              if socket.write_all(&buf[..n]).is_err() {
                break;
              }
            }
          }
        }
      });
    }
  });
  addr
}

#[test]
fn relays_a_connection_through_both_trunks() {
  trivial_log::init_stdout(LevelFilter::Trace).ok();
  let echo_addr = spawn_echo_server();

  let trunk_listener = TcpListener::bind("127.0.0.1:0").expect("bind trunk control port");
  let trunk_addr = trunk_listener.local_addr().expect("addr");

  let server_thread = std::thread::spawn(move || {
    let (mut socket, _) = trunk_listener.accept().expect("accept trunk conn");
    let (_uuid, outcome) = server_handshake(&mut socket, |_| Some("shared-secret".to_string())).expect("handshake");
    let pool = Arc::new(BufferPool::new(64));
    trunkline::Trunk::start(socket, outcome.cipher, pool)
  });

  let mut client_socket = TcpStream::connect(trunk_addr).expect("connect trunk");
  let outcome = node_handshake(&mut client_socket, "test-node", "shared-secret").expect("handshake");
  let pool = Arc::new(BufferPool::new(64));
  let trunk_a = trunkline::Trunk::start(client_socket, outcome.cipher, pool);
  let trunk_b = server_thread.join().expect("server trunk thread");

  let front_listener = TcpListener::bind("127.0.0.1:0").expect("bind front door");
  let front_addr = front_listener.local_addr().expect("addr").to_string();
  drop(front_listener);

  trunk_a.add_listener(ListenerSpec {
    listen: Address::tcp(front_addr.clone()),
    forward: Address::tcp(echo_addr),
  });

  std::thread::sleep(Duration::from_millis(300));

  let mut client = TcpStream::connect(&front_addr).expect("connect front door");
  client.set_read_timeout(Some(Duration::from_secs(5))).expect("set timeout");
  client.write_all(b"hello through the trunk").expect("write");

  let mut echoed = vec![0u8; 24];
  client.read_exact(&mut echoed).expect("read echo");
  assert_eq!(&echoed, b"hello through the trunk");

  trunk_a.shutdown();
  trunk_b.shutdown();
  trivial_log::free();
}
