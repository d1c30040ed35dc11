//! On-disk registry of which clients may connect and what they're allowed
//! to listen/forward.
//!
//! Grounded on `examples/original_source/apps/server/main.go`'s repeatable
//! `-listener`/`-peer_listener` flags (reflected here as the `entries` list
//! per client) and on the JSON-payload convention already used for
//! `NEW_LISTEN`/`NEW_CONNECT` wire messages.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TunnelResult;
use crate::wire::address::Address;

/// Which side opens the TCP listener for a configured entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
  /// The server listens locally and forwards accepted connections to the node.
  Listener,
  /// The node listens and forwards accepted connections back to the server.
  PeerListener,
}

/// One `-listener`/`-peer_listener` style entry: where to listen and where
/// to forward traffic accepted there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
  pub kind: EntryKind,
  pub listen: Address,
  pub forward: Address,
}

/// Everything the server needs to know about one client UUID: the shared
/// password used to derive its session key, and the listeners it's allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
  pub password: String,
  #[serde(default)]
  pub entries: Vec<ConfigEntry>,
}

/// The full registry: client UUID to its record.
pub type Registry = HashMap<String, ClientRecord>;

/// Loads a JSON registry file mapping client UUIDs to [`ClientRecord`]s.
pub fn load_registry(path: impl AsRef<Path>) -> TunnelResult<Registry> {
  let data = fs::read_to_string(path)?;
  let registry: Registry = serde_json::from_str(&data)?;
  Ok(registry)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_a_registry() {
    let json = r#"{
            "idste": {
                "password": "hunter2",
                "entries": [
                    {"kind": "listener", "listen": {"domain": "tcp", "addr": "127.0.0.1:1511"},
                     "forward": {"domain": "tcp", "addr": "127.0.0.1:80"}}
                ]
            }
        }"#;
    let registry: Registry = serde_json::from_str(json).expect("parse");
    assert_eq!(registry.len(), 1);
    let rec = registry.get("idste").expect("entry present");
    assert_eq!(rec.entries.len(), 1);
    assert_eq!(rec.entries[0].kind, EntryKind::Listener);
  }
}
