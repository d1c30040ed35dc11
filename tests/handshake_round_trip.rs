//! End-to-end handshake over a real loopback socket, matching
//! `shutdown_test.rs`'s style of driving a real `TcpListener`/`TcpStream`
//! pair rather than mocking the transport.

use std::net::{TcpListener, TcpStream};

use log::LevelFilter;
use trunkline::handshake::{node_handshake, server_handshake};

#[test]
fn node_authenticates_against_server() {
  trivial_log::init_stdout(LevelFilter::Trace).ok();
  let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
  let addr = listener.local_addr().expect("local addr");

  let server_thread = std::thread::spawn(move || {
    let (mut socket, _) = listener.accept().expect("accept");
    server_handshake(&mut socket, |uuid| {
      if uuid == "test-node" {
        Some("correct-horse-battery-staple".to_string())
      } else {
        None
      }
    })
  });

  let mut client = TcpStream::connect(addr).expect("connect");
  let outcome = node_handshake(&mut client, "test-node", "correct-horse-battery-staple").expect("handshake");

  let (uuid, server_outcome) = server_thread.join().expect("join").expect("server handshake ok");
  assert_eq!(uuid, "test-node");

  let mut probe = [7u8; 16];
  let mut expected = probe;
  outcome.cipher.encrypt(&mut probe).expect("encrypt");
  server_outcome.cipher.encrypt(&mut expected).expect("encrypt");
  assert_eq!(probe, expected);
  trivial_log::free();
}

#[test]
fn unknown_uuid_is_rejected() {
  trivial_log::init_stdout(LevelFilter::Trace).ok();
  let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
  let addr = listener.local_addr().expect("local addr");

  let server_thread = std::thread::spawn(move || {
    let (mut socket, _) = listener.accept().expect("accept");
    server_handshake(&mut socket, |_| None)
  });

  let mut client = TcpStream::connect(addr).expect("connect");
  let result = node_handshake(&mut client, "ghost", "whatever");
  assert!(result.is_err());
  assert!(server_thread.join().expect("join").is_err());
  trivial_log::free();
}
