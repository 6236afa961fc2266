//! ember node entrypoint: CLI parsing, identity, state wiring and the
//! periodic workers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ember_core::{random_hex_id, DEFAULT_DIFFICULTY};
use ember_net::{
    bootstrap, load_peer_snapshot, spawn_propagator, spawn_tasks, Identity, NetClient, NetContext,
    Overlay, SharedInventory, SharedOverlay,
};
use ember_rpc::ApiContext;
use ember_store::Inventory;

mod miner;

/// Grace period for draining in-flight requests on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Command-line arguments for the ember node.
#[derive(Parser, Debug)]
#[command(name = "ember", about = "ember blockchain node", version)]
struct Args {
    /// Listening port (also the target port for --mine).
    port: u16,

    /// Bootstrap peer as ip:port.
    #[arg(long)]
    peer: Option<String>,

    /// Comma-separated bootstrap peers (a:b,c:d).
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Use 127.0.0.1 instead of querying the public IP service.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    localhost: bool,

    /// Proof-of-work difficulty in leading zero hex characters.
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: usize,

    /// Known-peer snapshot file, loaded on startup and rewritten every 60 s.
    #[arg(long)]
    peer_store: Option<PathBuf>,

    /// Mine one block against the node at PORT, report and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    mine: bool,

    /// Parent hash for the mined block (defaults to the chain head).
    #[arg(long)]
    prev_hash: Option<String>,

    /// Creator id stamped into the mined block (defaults to the target
    /// node's own id).
    #[arg(long)]
    creator: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    // One-shot miner invocation: talk to the node at PORT and exit.
    if args.mine {
        let report =
            miner::mine_once(args.port, args.creator, args.prev_hash, args.difficulty).await?;
        println!("mined block {}", report.hash);
        println!(
            "  nonce={} txs={} elapsed={:?} confirmed={}",
            report.nonce, report.transactions, report.elapsed, report.confirmed
        );
        return Ok(());
    }

    let client = NetClient::new()?;
    let ip = if args.localhost {
        "127.0.0.1".to_string()
    } else {
        client
            .public_ip()
            .await
            .context("cannot determine the public IP; rerun with --localhost")?
    };
    let identity = Identity::new(random_hex_id(), ip, args.port)?;
    info!(
        node_id = %identity.node_id,
        group = %identity.group,
        ip = %identity.ip,
        port = identity.port,
        "starting ember node"
    );

    let inventory: SharedInventory = Arc::new(Mutex::new(Inventory::new(args.difficulty)));
    let overlay: SharedOverlay = Arc::new(Mutex::new(Overlay::new(&identity)));
    let propagator = spawn_propagator(client.clone(), overlay.clone());

    if let Some(path) = &args.peer_store {
        match load_peer_snapshot(path) {
            Ok(peers) => {
                let mut guard = overlay.lock().unwrap();
                let seeded = peers.into_iter().filter(|p| guard.learn(p.clone())).count();
                info!(seeded, path = %path.display(), "seeded known peers from snapshot");
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring unreadable peer snapshot");
            }
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));

    let bootstrap_addrs: Vec<String> =
        args.peer.clone().into_iter().chain(args.peers.clone()).collect();
    bootstrap(&client, &overlay, &inventory, &identity, &bootstrap_addrs).await;

    // A lonely node seeds its own chain.
    {
        let mut guard = inventory.lock().unwrap();
        if bootstrap_addrs.is_empty() && !guard.has_genesis() {
            let genesis =
                Inventory::genesis_block(&identity.node_id, Utc::now().timestamp_millis() as u64);
            let hash = genesis.hash.clone();
            guard
                .add_block(genesis)
                .expect("fresh store accepts its genesis");
            info!(%hash, "created genesis block");
        }
    }

    spawn_tasks(NetContext {
        client: client.clone(),
        overlay: overlay.clone(),
        inventory: inventory.clone(),
        propagator: propagator.clone(),
        shutdown: shutdown.clone(),
        peer_store: args.peer_store.clone(),
    });

    let ctx = ApiContext {
        identity,
        inventory,
        overlay,
        propagator,
        client,
    };
    ember_rpc::serve(ctx, shutdown_signal(shutdown)).await?;
    info!("shutdown complete");
    Ok(())
}

/// Resolve on ctrl-c: flip the shared flag so the periodic workers stop,
/// and bound the request drain with a hard exit after the grace period.
async fn shutdown_signal(flag: Arc<AtomicBool>) {
    let _ = signal::ctrl_c().await;
    info!("shutting down");
    flag.store(true, Ordering::SeqCst);
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        std::process::exit(0);
    });
}

/// Initialize tracing/logging for the node.
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
