//! CLI entry point: `trunkline node` dials a server and tunnels through it;
//! `trunkline server` accepts nodes and serves whatever listeners the
//! registry configures for them.
//!
//! Grounded on `examples/other_examples/manifests/linkerd-linkerd-tcp/Cargo.toml`'s
//! pairing of `clap` + `serde_json` + a `log` backend for a TCP proxy's CLI,
//! and on `examples/original_source/apps/{node,server}/main.go`'s flag
//! surface (`--host`, `--port`, `--uuid`, repeatable `--listener`/
//! `--peer-listener`).

use std::net::TcpStream;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use trunkline::buffer::BufferPool;
use trunkline::config::{load_registry, ConfigEntry, EntryKind};
use trunkline::handshake::{node_handshake, server_handshake};
use trunkline::wire::address::{Address, ListenerSpec};

const TRUNK_POOL_HOLDCNT: usize = 256;

#[derive(Parser)]
#[command(name = "trunkline", about = "A multiplexed, encrypted TCP tunnel trunk.")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Dial a trunkline server and expose/consume its listeners.
  Node {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 925)]
    port: u16,
    #[arg(long, default_value = "idste")]
    uuid: String,
    #[arg(long)]
    password: String,
  },
  /// Accept nodes and serve the listeners configured for each in the registry.
  Server {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 925)]
    port: u16,
    #[arg(long)]
    config_path: String,
    /// `listen_addr,forward_addr`, repeatable. Applied to every node that
    /// connects, in addition to that node's registry entries.
    #[arg(long = "listener", value_name = "LISTEN,FORWARD")]
    listeners: Vec<String>,
    /// `listen_addr,forward_addr`, repeatable. Asks every connecting node
    /// to open the listener on our behalf.
    #[arg(long = "peer-listener", value_name = "LISTEN,FORWARD")]
    peer_listeners: Vec<String>,
  },
}

/// Parses one `--listener`/`--peer-listener` value into a [`ConfigEntry`].
fn parse_entry(kind: EntryKind, raw: &str) -> trunkline::TunnelResult<ConfigEntry> {
  let (listen, forward) = raw
    .split_once(',')
    .ok_or(trunkline::TunnelError::MalformedFrame("--listener/--peer-listener expects LISTEN,FORWARD"))?;
  Ok(ConfigEntry { kind, listen: Address::tcp(listen), forward: Address::tcp(forward) })
}

fn main() {
  env_logger::init();
  let cli = Cli::parse();
  let result = match cli.command {
    Command::Node { host, port, uuid, password } => run_node(&host, port, &uuid, &password),
    Command::Server { host, port, config_path, listeners, peer_listeners } => {
      run_server(&host, port, &config_path, &listeners, &peer_listeners)
    }
  };
  if let Err(e) = result {
    log::error!("trunkline exited with an error: {e}");
    std::process::exit(1);
  }
}

fn run_node(host: &str, port: u16, uuid: &str, password: &str) -> trunkline::TunnelResult<()> {
  let addr = format!("{host}:{port}");
  log::info!("connecting to {addr} as {uuid}");
  let mut socket = TcpStream::connect(&addr)?;
  let outcome = node_handshake(&mut socket, uuid, password)?;
  let pool = Arc::new(BufferPool::new(TRUNK_POOL_HOLDCNT));
  let trunk = trunkline::Trunk::start(socket, outcome.cipher, pool);
  log::info!("trunk established with {addr}");
  wait_forever();
  trunk.shutdown();
  Ok(())
}

fn run_server(
  host: &str,
  port: u16,
  config_path: &str,
  cli_listeners: &[String],
  cli_peer_listeners: &[String],
) -> trunkline::TunnelResult<()> {
  let registry = Arc::new(load_registry(config_path)?);
  let mut global_entries = Vec::with_capacity(cli_listeners.len() + cli_peer_listeners.len());
  for raw in cli_listeners {
    global_entries.push(parse_entry(EntryKind::Listener, raw)?);
  }
  for raw in cli_peer_listeners {
    global_entries.push(parse_entry(EntryKind::PeerListener, raw)?);
  }
  let global_entries = Arc::new(global_entries);

  let addr = format!("{host}:{port}");
  log::info!("listening for nodes on {addr}");
  let listener = std::net::TcpListener::bind(&addr)?;
  let pool = Arc::new(BufferPool::new(TRUNK_POOL_HOLDCNT));

  for incoming in listener.incoming() {
    let mut socket = match incoming {
      Ok(s) => s,
      Err(e) => {
        log::warn!("accept failed: {e}");
        continue;
      }
    };
    let registry = Arc::clone(&registry);
    let global_entries = Arc::clone(&global_entries);
    let pool = Arc::clone(&pool);
    std::thread::spawn(move || {
      let lookup = |uuid: &str| registry.get(uuid).map(|r| r.password.clone());
      let (uuid, outcome) = match server_handshake(&mut socket, lookup) {
        Ok(pair) => pair,
        Err(e) => {
          log::warn!("handshake failed: {e}");
          return;
        }
      };
      log::info!("node {uuid} connected");
      let trunk = trunkline::Trunk::start(socket, outcome.cipher, pool);
      let registry_entries = registry.get(&uuid).map(|r| r.entries.as_slice()).unwrap_or(&[]);
      for entry in global_entries.iter().chain(registry_entries) {
        let spec = ListenerSpec { listen: entry.listen.clone(), forward: entry.forward.clone() };
        match entry.kind {
          EntryKind::Listener => trunk.add_listener(spec),
          EntryKind::PeerListener => {
            if let Err(e) = trunk.request_peer_listener(&spec) {
              log::warn!("failed to request peer listener for {uuid}: {e}");
            }
          }
        }
      }
    });
  }
  Ok(())
}

fn wait_forever() {
  loop {
    std::thread::sleep(std::time::Duration::from_secs(3600));
  }
}

