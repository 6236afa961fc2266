//! Best-effort fan-out of blocks, transactions and peer lists.
//!
//! Producers hand a command to the propagator and move on; delivery is
//! parallel per peer, bounded by the client's request deadline, retried
//! once in bulk, and feeds the overlay's failure accounting. Receivers
//! deduplicate via their `seen` sets, so redelivery is harmless.

use async_channel::{Receiver, Sender};
use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, warn};

use ember_core::{Block, PeerEntry, Transaction};

use crate::tasks::evict_and_replace;
use crate::{NetClient, SharedOverlay, MAX_PEER_RETRIES, RETRY_DELAY};

/// A message to fan out to every active connection.
#[derive(Debug)]
pub enum PropagateCommand {
    Block(Block),
    Transaction(Transaction),
    PeerList(Vec<PeerEntry>),
}

/// Fire-and-forget handle for enqueueing propagation work.
#[derive(Clone)]
pub struct PropagatorHandle {
    commands: Sender<PropagateCommand>,
}

impl PropagatorHandle {
    pub fn block(&self, block: Block) {
        self.send(PropagateCommand::Block(block));
    }

    pub fn transaction(&self, tx: Transaction) {
        self.send(PropagateCommand::Transaction(tx));
    }

    pub fn peer_list(&self, peers: Vec<PeerEntry>) {
        self.send(PropagateCommand::PeerList(peers));
    }

    fn send(&self, command: PropagateCommand) {
        if let Err(err) = self.commands.try_send(command) {
            warn!(%err, "dropping propagation command");
        }
    }
}

/// Spawn the propagator task and return its handle.
pub fn spawn_propagator(client: NetClient, overlay: SharedOverlay) -> PropagatorHandle {
    let (tx, rx) = async_channel::bounded(256);
    tokio::spawn(run(client, overlay, rx));
    PropagatorHandle { commands: tx }
}

async fn run(client: NetClient, overlay: SharedOverlay, rx: Receiver<PropagateCommand>) {
    while let Ok(command) = rx.recv().await {
        // Each fan-out runs independently so a slow round (its bulk
        // retry sleeps 5 s) cannot delay later messages.
        tokio::spawn(fan_out(client.clone(), overlay.clone(), command));
    }
}

async fn fan_out(client: NetClient, overlay: SharedOverlay, command: PropagateCommand) {
    let peers = overlay.lock().unwrap().snapshot_active();
    if peers.is_empty() {
        debug!("no active connections; nothing to propagate");
        return;
    }

    let retry = deliver_round(&client, &overlay, &command, peers, false).await;
    if retry.is_empty() {
        return;
    }

    sleep(RETRY_DELAY).await;
    deliver_round(&client, &overlay, &command, retry, true).await;
}

/// Deliver to every peer in parallel and settle the overlay bookkeeping.
/// Returns the peers that failed and are still worth one bulk retry;
/// with `final_round` set, failures are evicted instead.
async fn deliver_round(
    client: &NetClient,
    overlay: &SharedOverlay,
    command: &PropagateCommand,
    peers: Vec<PeerEntry>,
    final_round: bool,
) -> Vec<PeerEntry> {
    let sends = peers.iter().map(|peer| deliver_one(client, command, peer));
    let outcomes = join_all(sends).await;

    let mut retry = Vec::new();
    for (peer, outcome) in peers.into_iter().zip(outcomes) {
        match outcome {
            Ok(()) => overlay.lock().unwrap().touch(&peer.node_id),
            Err(err) => {
                debug!(node_id = %peer.node_id, %err, "propagation delivery failed");
                let retries = overlay.lock().unwrap().record_failure(&peer.node_id);
                if final_round || retries >= MAX_PEER_RETRIES {
                    evict_and_replace(client, overlay, &peer.node_id).await;
                } else {
                    retry.push(peer);
                }
            }
        }
    }
    retry
}

async fn deliver_one(
    client: &NetClient,
    command: &PropagateCommand,
    peer: &PeerEntry,
) -> Result<(), crate::NetError> {
    match command {
        PropagateCommand::Block(block) => client.push_block(peer, block).await,
        PropagateCommand::Transaction(tx) => client.push_transaction(peer, tx).await,
        PropagateCommand::PeerList(peers) => client.push_peer_list(peer, peers).await,
    }
}
