//! JSON payload types carried inside `NEW_CONNECT` and `NEW_LISTEN` frames.
//!
//! Grounded on `examples/original_source/proxy/common.go`'s `Address` and
//! `Listener` structs; the field names are kept (`domain`/`addr`) as the
//! Rust identifiers, but the wire contract's JSON keys are the literal
//! capitalized `Domain`/`Addr`/`Listen`/`Forward` the existing deployments
//! already speak.
//!
//! See `examples/original_source/proxy/common.go`'s `Address`/`Listener`
//! struct tags, which carry the same capitalized keys.

use serde::{Deserialize, Serialize};

/// A dial or listen target: a network family (`"tcp"`, `"tcp4"`, `"tcp6"`)
/// plus a `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
  pub domain: String,
  pub addr: String,
}

impl Address {
  pub fn tcp(addr: impl Into<String>) -> Self {
    Address { domain: "tcp".to_string(), addr: addr.into() }
  }
}

/// The payload of a `NEW_LISTEN` frame: where to listen, and where traffic
/// accepted there should ultimately be dialed out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenerSpec {
  pub listen: Address,
  pub forward: Address,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_json() {
    let spec = ListenerSpec {
      listen: Address::tcp("127.0.0.1:1511"),
      forward: Address::tcp("127.0.0.1:80"),
    };
    let json = serde_json::to_string(&spec).expect("serialize");
    let back: ListenerSpec = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(spec, back);
  }

  #[test]
  fn uses_capitalized_wire_keys() {
    let addr = Address::tcp("127.0.0.1:1511");
    let json = serde_json::to_value(&addr).expect("serialize");
    assert_eq!(json["Domain"], "tcp");
    assert_eq!(json["Addr"], "127.0.0.1:1511");

    let spec = ListenerSpec { listen: addr.clone(), forward: addr };
    let json = serde_json::to_value(&spec).expect("serialize");
    assert!(json.get("Listen").is_some());
    assert!(json.get("Forward").is_some());
  }
}
