//! Wire-format types: the JSON payloads exchanged for listener/connect
//! control messages, the binary frame header, and the AES-128-ECB cipher
//! every frame passes through.

pub mod address;
pub mod crypto;
pub mod frame;

pub use address::{Address, ListenerSpec};
pub use crypto::TrunkCipher;
pub use frame::{FrameHeader, Opcode};
