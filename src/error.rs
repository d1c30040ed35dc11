//! Crate-wide error type.

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io;

/// Everything that can go wrong while running a trunk, stream, or handshake.
///
/// New variants may be added without a semver break.
#[non_exhaustive]
#[derive(Debug)]
pub enum TunnelError {
  /// Transport-level failure (dial, accept, read, write).
  Io(io::Error),
  /// A frame failed header or size validation.
  MalformedFrame(&'static str),
  /// The handshake did not complete (bad magic, key mismatch, timeout).
  Handshake(&'static str),
  /// A JSON payload (`Address`, `ListenerSpec`, config entry) failed to parse.
  Payload(serde_json::Error),
  /// A stream id referenced by a frame has no registered stream.
  UnknownStream(u32),
  /// The trunk is shutting down and can no longer accept new work.
  ShuttingDown,
  /// A background thread panicked and poisoned a shared lock.
  PoisonedLock,
}

impl Display for TunnelError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      TunnelError::Io(e) => write!(f, "io error: {e}"),
      TunnelError::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
      TunnelError::Handshake(msg) => write!(f, "handshake failed: {msg}"),
      TunnelError::Payload(e) => write!(f, "payload error: {e}"),
      TunnelError::UnknownStream(id) => write!(f, "unknown stream id {id}"),
      TunnelError::ShuttingDown => write!(f, "trunk is shutting down"),
      TunnelError::PoisonedLock => write!(f, "lock was poisoned by a panicked thread"),
    }
  }
}

impl StdError for TunnelError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      TunnelError::Io(e) => Some(e),
      TunnelError::Payload(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for TunnelError {
  fn from(e: io::Error) -> Self {
    TunnelError::Io(e)
  }
}

impl From<serde_json::Error> for TunnelError {
  fn from(e: serde_json::Error) -> Self {
    TunnelError::Payload(e)
  }
}

impl<T> From<std::sync::PoisonError<T>> for TunnelError {
  fn from(_: std::sync::PoisonError<T>) -> Self {
    TunnelError::PoisonedLock
  }
}

/// Shorthand for `Result<T, TunnelError>`.
pub type TunnelResult<T> = Result<T, TunnelError>;
