//! AES-128-ECB framing cipher and MD5-based key derivation.
//!
//! Sourced from crates already used for this purpose elsewhere (`aes`+`ecb`
//! as used by `examples/other_examples/manifests/denoland-deno`, `md-5` as
//! used there and in `.../surrealdb-surrealdb`).

use aes::Aes128;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use digest::Digest;
use md5::Md5;

use crate::error::{TunnelError, TunnelResult};

/// Length in bytes of the derived AES-128 key.
pub const KEY_LEN: usize = 16;

type EcbEnc = ecb::Encryptor<Aes128>;
type EcbDec = ecb::Decryptor<Aes128>;

/// Encrypts and decrypts frame bytes in place using AES-128 in ECB mode.
///
/// The trunk never encrypts anything that isn't already padded to a
/// multiple of 16 bytes (see `wire::frame`), so there is no padding scheme
/// to apply or strip beyond `NoPadding`.
pub struct TrunkCipher {
  key: [u8; KEY_LEN],
}

impl TrunkCipher {
  pub fn new(key: [u8; KEY_LEN]) -> Self {
    TrunkCipher { key }
  }

  /// `key = md5(nonce || password)[0:16]`, the handshake's key derivation.
  pub fn derive_key(nonce: &[u8], password: &[u8]) -> [u8; KEY_LEN] {
    let mut hasher = Md5::new();
    hasher.update(nonce);
    hasher.update(password);
    let digest = hasher.finalize();
    let mut key = [0u8; KEY_LEN];
    #[allow(clippy::indexing_slicing)]
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
  }

  /// Encrypts `buf` in place. `buf.len()` must be a multiple of 16.
  pub fn encrypt(&self, buf: &mut [u8]) -> TunnelResult<()> {
    let len = buf.len();
    let enc = EcbEnc::new_from_slice(&self.key)
      .map_err(|_| TunnelError::MalformedFrame("invalid cipher key length"))?;
    enc
      .encrypt_padded_mut::<NoPadding>(buf, len)
      .map_err(|_| TunnelError::MalformedFrame("frame length not block-aligned"))?;
    Ok(())
  }

  /// Decrypts `buf` in place. `buf.len()` must be a multiple of 16.
  pub fn decrypt(&self, buf: &mut [u8]) -> TunnelResult<()> {
    let dec = EcbDec::new_from_slice(&self.key)
      .map_err(|_| TunnelError::MalformedFrame("invalid cipher key length"))?;
    dec
      .decrypt_padded_mut::<NoPadding>(buf)
      .map_err(|_| TunnelError::MalformedFrame("frame length not block-aligned"))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encrypt_then_decrypt_round_trips() {
    let key = TrunkCipher::derive_key(b"some-nonce", b"hunter2");
    let cipher = TrunkCipher::new(key);
    let mut buf = [0xABu8; 32];
    let original = buf;
    cipher.encrypt(&mut buf).expect("encrypt");
    assert_ne!(buf, original);
    cipher.decrypt(&mut buf).expect("decrypt");
    assert_eq!(buf, original);
  }

  #[test]
  fn derive_key_is_deterministic() {
    let a = TrunkCipher::derive_key(b"nonce", b"pw");
    let b = TrunkCipher::derive_key(b"nonce", b"pw");
    assert_eq!(a, b);
  }

  #[test]
  fn rejects_unaligned_buffers() {
    let cipher = TrunkCipher::new([0u8; KEY_LEN]);
    let mut buf = [0u8; 17];
    assert!(cipher.encrypt(&mut buf).is_err());
  }
}
