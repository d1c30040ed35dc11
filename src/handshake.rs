//! UUID + password + MD5 handshake.
//!
//! `examples/original_source` only retrieved the RSA+AES flavor of this
//! exchange (`apps/node/node.go::login`, `apps/server/server.go::login`);
//! this crate implements the simpler UUID+password+MD5 flavor instead, but
//! keeps its literal preamble bytes: node sends `"  v1"`, server replies
//! `"hello"`, node sends its raw UUID bytes, server replies with a 16-byte
//! nonce, and both sides derive `key = md5(nonce || password)[0:16]`. The
//! UUID itself is read the same way `server.go::login` reads its RSA
//! ciphertext — one `read` call, trusting however many bytes it returns —
//! rather than a length-prefixed field.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::{TunnelError, TunnelResult};
use crate::wire::crypto::{TrunkCipher, KEY_LEN};

const NODE_PREAMBLE: &[u8; 4] = b"  v1";
const SERVER_PREAMBLE: &[u8; 5] = b"hello";
const MAX_UUID_LEN: usize = 256;
const NONCE_LEN: usize = 16;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a completed handshake: the trunk cipher both sides now share.
pub struct HandshakeOutcome {
  pub cipher: TrunkCipher,
}

/// Node side: announce `uuid`, receive a nonce, prove `password` and start
/// encrypting with the derived key.
pub fn node_handshake(socket: &mut TcpStream, uuid: &str, password: &str) -> TunnelResult<HandshakeOutcome> {
  socket.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
  socket.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

  socket.write_all(NODE_PREAMBLE)?;

  let mut hello = [0u8; SERVER_PREAMBLE.len()];
  socket.read_exact(&mut hello)?;
  if &hello != SERVER_PREAMBLE {
    return Err(TunnelError::Handshake("server did not reply with the expected preamble"));
  }

  socket.write_all(uuid.as_bytes())?;

  let mut nonce = [0u8; NONCE_LEN];
  socket.read_exact(&mut nonce)?;

  let key = TrunkCipher::derive_key(&nonce, password.as_bytes());
  let cipher = TrunkCipher::new(key);

  let mut proof = nonce;
  cipher.encrypt(&mut proof)?;
  socket.write_all(&proof)?;

  Ok(HandshakeOutcome { cipher })
}

/// Server side: read the client's announced UUID, look up its password via
/// `lookup_password`, issue a nonce, and verify the client can prove it
/// knows the shared secret before accepting the connection.
pub fn server_handshake(
  socket: &mut TcpStream,
  lookup_password: impl FnOnce(&str) -> Option<String>,
) -> TunnelResult<(String, HandshakeOutcome)> {
  socket.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
  socket.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

  let mut preamble = [0u8; NODE_PREAMBLE.len()];
  socket.read_exact(&mut preamble)?;
  if &preamble != NODE_PREAMBLE {
    return Err(TunnelError::Handshake("bad node preamble"));
  }
  socket.write_all(SERVER_PREAMBLE)?;

  let mut uuid_buf = [0u8; MAX_UUID_LEN];
  let n = socket.read(&mut uuid_buf)?;
  if n == 0 {
    return Err(TunnelError::Handshake("node closed before sending its uuid"));
  }
  #[allow(clippy::indexing_slicing)]
  let uuid = String::from_utf8(uuid_buf[..n].to_vec()).map_err(|_| TunnelError::Handshake("uuid not utf-8"))?;

  let password = match lookup_password(&uuid) {
    Some(p) => p,
    None => return Err(TunnelError::Handshake("unknown client uuid")),
  };

  let nonce = random_nonce()?;
  socket.write_all(&nonce)?;

  let key = TrunkCipher::derive_key(&nonce, password.as_bytes());
  let cipher = TrunkCipher::new(key);

  let mut proof = [0u8; NONCE_LEN];
  socket.read_exact(&mut proof)?;
  cipher.decrypt(&mut proof)?;
  if proof != nonce {
    return Err(TunnelError::Handshake("password proof mismatch"));
  }

  Ok((uuid, HandshakeOutcome { cipher }))
}

fn random_nonce() -> TunnelResult<[u8; NONCE_LEN]> {
  let mut nonce = [0u8; NONCE_LEN];
  getrandom::fill(&mut nonce).map_err(|_| TunnelError::Handshake("failed to generate nonce"))?;
  Ok(nonce)
}

const _: () = assert!(NONCE_LEN == KEY_LEN, "nonce and key length are both one AES block");

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::TcpListener;

  #[test]
  fn node_and_server_agree_on_a_cipher() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server_thread = std::thread::spawn(move || {
      let (mut socket, _) = listener.accept().expect("accept");
      server_handshake(&mut socket, |uuid| {
        assert_eq!(uuid, "node-a");
        Some("hunter2".to_string())
      })
      .expect("server handshake")
    });

    let mut client_socket = TcpStream::connect(addr).expect("connect");
    let outcome = node_handshake(&mut client_socket, "node-a", "hunter2").expect("node handshake");

    let (uuid, server_outcome) = server_thread.join().expect("server thread");
    assert_eq!(uuid, "node-a");

    let mut client_block = [0x42u8; 16];
    let mut server_block = client_block;
    outcome.cipher.encrypt(&mut client_block).expect("encrypt");
    server_outcome.cipher.encrypt(&mut server_block).expect("encrypt");
    assert_eq!(client_block, server_block, "both sides derived the same key");
  }

  #[test]
  fn node_sends_the_literal_preamble_and_uuid() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");

    let peer_thread = std::thread::spawn(move || {
      let (mut peer, _) = listener.accept().expect("accept");
      let mut preamble = [0u8; 4];
      peer.read_exact(&mut preamble).expect("read preamble");
      assert_eq!(&preamble, NODE_PREAMBLE);
      peer.write_all(SERVER_PREAMBLE).expect("write hello");
      let mut uuid_buf = [0u8; MAX_UUID_LEN];
      let n = peer.read(&mut uuid_buf).expect("read uuid");
      assert_eq!(&uuid_buf[..n], b"idste");
      peer.write_all(&[0u8; NONCE_LEN]).expect("write nonce");
    });

    let mut client_socket = TcpStream::connect(addr).expect("connect");
    client_socket.set_write_timeout(Some(HANDSHAKE_TIMEOUT)).expect("timeout");
    client_socket.write_all(NODE_PREAMBLE).expect("write preamble");
    // Drive the rest of node_handshake's I/O directly against the raw socket
    // so this test can assert on the literal bytes, not just the outcome.
    let mut hello = [0u8; 5];
    client_socket.read_exact(&mut hello).expect("read hello");
    assert_eq!(&hello, SERVER_PREAMBLE);
    client_socket.write_all(b"idste").expect("write uuid");
    let mut nonce = [0u8; NONCE_LEN];
    client_socket.read_exact(&mut nonce).expect("read nonce");
    assert_eq!(nonce, [0u8; NONCE_LEN]);

    peer_thread.join().expect("peer thread");
  }

  #[test]
  fn wrong_password_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server_thread = std::thread::spawn(move || {
      let (mut socket, _) = listener.accept().expect("accept");
      server_handshake(&mut socket, |_| Some("correct-password".to_string()))
    });

    let mut client_socket = TcpStream::connect(addr).expect("connect");
    let result = node_handshake(&mut client_socket, "node-a", "wrong-password");
    assert!(result.is_err());
    assert!(server_thread.join().expect("server thread").is_err());
  }
}
