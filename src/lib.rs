//! `trunkline`: a multiplexed, encrypted TCP tunnel trunk.
//!
//! A single authenticated TCP connection (the "trunk") carries many
//! independent proxied TCP connections ("streams"), each tagged with a
//! stream id and framed with AES-128-ECB. See [`trunk::Trunk`] for the
//! connection lifecycle, [`handshake`] for how a trunk is authenticated,
//! and [`listener::Listener`] for accepting new streams to tunnel.

pub mod util;

pub mod buffer;
pub mod config;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod stream;
pub mod thread;
pub mod trunk;
pub mod wire;

pub use error::{TunnelError, TunnelResult};
pub use trunk::Trunk;
