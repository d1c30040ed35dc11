//! Frame construction: pads a payload to a cipher block boundary, writes the
//! header, and encrypts in place.
//!
//! Grounded on `examples/original_source/proxy/proxy.go`'s `sendCommand`/
//! `encryptBuffer`: the pad count goes in the header's low nibble so the
//! receiver knows how many trailing zero bytes to drop after decrypting.

use crate::buffer::{Buffer, BufferPool, DEFAULT_BUFFER_SIZE};
use crate::error::{TunnelError, TunnelResult};
use crate::wire::crypto::TrunkCipher;
use crate::wire::frame::{FrameHeader, Opcode, CIPHER_BLOCK_LEN, HEADER_LEN};

/// Builds, pads, and encrypts a frame carrying `body` and returns the
/// pooled [`Buffer`] ready to hand to the writer.
pub fn build_frame(
  pool: &BufferPool,
  cipher: &TrunkCipher,
  opcode: Opcode,
  subtype: bool,
  stream_id: u32,
  body: &[u8],
) -> TunnelResult<Buffer> {
  let unpadded = HEADER_LEN + body.len();
  if unpadded > DEFAULT_BUFFER_SIZE {
    return Err(TunnelError::MalformedFrame("frame body too large"));
  }
  let pad = (CIPHER_BLOCK_LEN - (unpadded % CIPHER_BLOCK_LEN)) % CIPHER_BLOCK_LEN;
  let total = unpadded + pad;

  let mut buf = pool.get();
  buf.size = total;

  #[allow(clippy::indexing_slicing)]
  {
    for b in buf.data[..total].iter_mut() {
      *b = 0;
    }
    buf.data[HEADER_LEN..unpadded].copy_from_slice(body);
  }

  let header = FrameHeader { opcode, subtype, pad: pad as u8, size: total as u16, stream_id };
  #[allow(clippy::indexing_slicing)]
  header.encode_into(&mut buf.data[..HEADER_LEN])?;

  #[allow(clippy::indexing_slicing)]
  cipher.encrypt(&mut buf.data[..total])?;

  Ok(buf)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pads_to_block_boundary() {
    let pool = BufferPool::new(4);
    let cipher = TrunkCipher::new([0u8; 16]);
    let buf = build_frame(&pool, &cipher, Opcode::Data, true, 7, b"hello").expect("build");
    assert_eq!(buf.size % CIPHER_BLOCK_LEN, 0);
  }

  #[test]
  fn header_survives_decrypt() {
    let pool = BufferPool::new(4);
    let cipher = TrunkCipher::new([0xAAu8; 16]);
    let mut buf = build_frame(&pool, &cipher, Opcode::NewConnect, false, 99, b"payload").expect("build");
    cipher.decrypt(&mut buf.data[..buf.size]).expect("decrypt");
    let header = FrameHeader::decode_from(&buf.data).expect("decode");
    assert_eq!(header.opcode, Opcode::NewConnect);
    assert_eq!(header.stream_id, 99);
    assert!(!header.subtype);
    #[allow(clippy::indexing_slicing)]
    let body_end = buf.size - header.pad as usize;
    #[allow(clippy::indexing_slicing)]
    assert_eq!(&buf.data[HEADER_LEN..body_end], b"payload");
  }
}
