//! The 8-byte logical frame header shared by every command on the wire.
//!
//! Grounded on `examples/original_source/proxy/proxy.go` (`sendCommand`,
//! `readProc`) for the field layout, and on `tiipotto-tii/src/websocket/frame.rs`
//! for the "parse the header bits into a small struct, validate as you go"
//! style.

use crate::error::{TunnelError, TunnelResult};

/// Size in bytes of the logical frame header. Payload starts right after it.
pub const HEADER_LEN: usize = 8;

/// AES block size the frame is padded out to before encryption.
pub const CIPHER_BLOCK_LEN: usize = 16;

const OPCODE_MASK: u8 = 0x1f;
const SUBTYPE_BIT: u8 = 0x20;

/// The seven control/data opcodes a frame can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  Data,
  NewConnect,
  CloseConnect,
  NewListen,
  Keepalive,
  Pause,
  Run,
}

impl Opcode {
  fn from_raw(raw: u8) -> TunnelResult<Self> {
    match raw & OPCODE_MASK {
      0 => Ok(Opcode::Data),
      1 => Ok(Opcode::Pause),
      2 => Ok(Opcode::Run),
      3 => Ok(Opcode::NewConnect),
      4 => Ok(Opcode::CloseConnect),
      5 => Ok(Opcode::NewListen),
      6 => Ok(Opcode::Keepalive),
      _ => Err(TunnelError::MalformedFrame("unknown opcode")),
    }
  }

  fn as_raw(self) -> u8 {
    match self {
      Opcode::Data => 0,
      Opcode::Pause => 1,
      Opcode::Run => 2,
      Opcode::NewConnect => 3,
      Opcode::CloseConnect => 4,
      Opcode::NewListen => 5,
      Opcode::Keepalive => 6,
    }
  }
}

/// The decoded contents of a frame's 8-byte header.
///
/// `subtype` mirrors which peer originated the stream the frame belongs to
/// (true for the side that accepted the connection locally and forwarded it
/// onward, false for the side that received the matching `NEW_CONNECT`);
/// dispatch looks up the opposite subtype's registry to find the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub opcode: Opcode,
  pub subtype: bool,
  pub pad: u8,
  pub size: u16,
  pub stream_id: u32,
}

impl FrameHeader {
  pub fn new(opcode: Opcode, subtype: bool, stream_id: u32, size: u16) -> Self {
    FrameHeader { opcode, subtype, pad: 0, size, stream_id }
  }

  /// Encodes the header into the first 8 bytes of `out`.
  pub fn encode_into(&self, out: &mut [u8]) -> TunnelResult<()> {
    if out.len() < HEADER_LEN {
      return Err(TunnelError::MalformedFrame("buffer too small for header"));
    }
    let mut byte0 = self.opcode.as_raw();
    if self.subtype {
      byte0 |= SUBTYPE_BIT;
    }
    #[allow(clippy::indexing_slicing)]
    {
      out[0] = byte0;
      out[1] = self.pad & 0x0f;
      let size_bytes = self.size.to_le_bytes();
      out[2] = size_bytes[0];
      out[3] = size_bytes[1];
      let id_bytes = self.stream_id.to_le_bytes();
      out[4] = id_bytes[0];
      out[5] = id_bytes[1];
      out[6] = id_bytes[2];
      out[7] = id_bytes[3];
    }
    Ok(())
  }

  /// Decodes a header from the first 8 bytes of `data`.
  pub fn decode_from(data: &[u8]) -> TunnelResult<Self> {
    if data.len() < HEADER_LEN {
      return Err(TunnelError::MalformedFrame("frame shorter than header"));
    }
    #[allow(clippy::indexing_slicing)]
    let (byte0, byte1, size, stream_id) = (
      data[0],
      data[1],
      u16::from_le_bytes([data[2], data[3]]),
      u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
    );
    let opcode = Opcode::from_raw(byte0)?;
    let subtype = byte0 & SUBTYPE_BIT != 0;
    let pad = byte1 & 0x0f;
    Ok(FrameHeader { opcode, subtype, pad, size, stream_id })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_round_trips() {
    let header = FrameHeader::new(Opcode::Data, true, 42, 128);
    let mut buf = [0u8; HEADER_LEN];
    header.encode_into(&mut buf).expect("encode");
    let decoded = FrameHeader::decode_from(&buf).expect("decode");
    assert_eq!(header, decoded);
  }

  #[test]
  fn rejects_unknown_opcode() {
    let mut buf = [0u8; HEADER_LEN];
    buf[0] = 0x1f;
    assert!(FrameHeader::decode_from(&buf).is_err());
  }

  #[test]
  fn rejects_short_buffers() {
    assert!(FrameHeader::decode_from(&[0u8; 4]).is_err());
  }
}
