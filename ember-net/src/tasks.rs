//! Connection management and the node's periodic overlay workers.
//!
//! Every loop observes the shared shutdown flag and exits on the next
//! tick after it flips. Overlay locks are held only across
//! non-suspending sections; connection caps are therefore re-checked on
//! both sides of every ping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::interval;
use tracing::{debug, info, warn};

use ember_core::{group_of, PeerEntry};

use crate::overlay::GroupKind;
use crate::protocol::RegisterResponse;
use crate::snapshot::write_peer_snapshot;
use crate::{
    Identity, NetClient, NetContext, SharedInventory, SharedOverlay, CLEANUP_INTERVAL,
    INVENTORY_SYNC_INTERVAL, MAX_PEER_RETRIES, PEER_EXCHANGE_INTERVAL, PEER_SHARE_INTERVAL,
    PEER_TIMEOUT, SNAPSHOT_INTERVAL,
};

/// Spawn every periodic overlay worker.
pub fn spawn_tasks(ctx: NetContext) {
    tokio::spawn(peer_exchange_loop(ctx.clone()));
    tokio::spawn(cleanup_loop(ctx.clone(), CLEANUP_INTERVAL));
    tokio::spawn(cleanup_loop(ctx.clone(), PEER_TIMEOUT));
    tokio::spawn(peer_share_loop(ctx.clone()));
    tokio::spawn(inventory_sync_loop(ctx.clone()));
    if ctx.peer_store.is_some() {
        tokio::spawn(snapshot_loop(ctx));
    }
}

/// Verify caps, ping the candidate, verify caps again and promote it.
pub async fn try_establish_connection(
    client: &NetClient,
    overlay: &SharedOverlay,
    entry: PeerEntry,
) -> bool {
    let Ok(group) = group_of(&entry.node_id) else {
        return false;
    };
    {
        let guard = overlay.lock().unwrap();
        if guard.is_active(&entry.node_id) || !guard.has_capacity(group) {
            return false;
        }
    }
    if let Err(err) = client.ping(&entry).await {
        debug!(node_id = %entry.node_id, %err, "connection probe failed");
        return false;
    }
    let established = overlay.lock().unwrap().activate(entry.clone());
    if established {
        info!(node_id = %entry.node_id, ip = %entry.ip, port = entry.port, "connection established");
    }
    established
}

/// Search known-but-not-active peers of the same group type for a
/// replacement connection.
pub async fn try_replace_disconnected_peer(
    client: &NetClient,
    overlay: &SharedOverlay,
    kind: GroupKind,
) {
    let candidates = overlay.lock().unwrap().replacement_candidates(kind);
    for candidate in candidates {
        if try_establish_connection(client, overlay, candidate).await {
            return;
        }
    }
}

/// Drop a failing peer and look for a stand-in of the same group type.
pub(crate) async fn evict_and_replace(
    client: &NetClient,
    overlay: &SharedOverlay,
    node_id: &str,
) {
    let kind = overlay.lock().unwrap().evict(node_id);
    if let Some(kind) = kind {
        warn!(node_id, "peer evicted after repeated failures");
        try_replace_disconnected_peer(client, overlay, kind).await;
    }
}

/// Register with each bootstrap address and absorb the responses.
/// Individual failures are logged; the node continues standalone when
/// every bootstrap peer is unreachable.
pub async fn bootstrap(
    client: &NetClient,
    overlay: &SharedOverlay,
    inventory: &SharedInventory,
    identity: &Identity,
    addrs: &[String],
) {
    let me = identity.entry();
    let mut reached = 0usize;
    for addr in addrs {
        match client.register(addr, &me).await {
            Ok(response) => {
                reached += 1;
                absorb_register_response(client, overlay, inventory, response).await;
            }
            Err(err) => warn!(%addr, %err, "bootstrap registration failed"),
        }
    }
    if !addrs.is_empty() && reached == 0 {
        warn!("all bootstrap peers unreachable; continuing standalone");
    }
}

async fn absorb_register_response(
    client: &NetClient,
    overlay: &SharedOverlay,
    inventory: &SharedInventory,
    response: RegisterResponse,
) {
    let responder = PeerEntry {
        node_id: response.node_id,
        ip: response.ip,
        port: response.port,
    };
    {
        let mut guard = overlay.lock().unwrap();
        guard.learn(responder.clone());
        guard.activate(responder);
    }

    // Advertised peers, randomized, up to the caps.
    let mut candidates = response.peers;
    candidates.shuffle(&mut rand::thread_rng());
    for candidate in candidates {
        if overlay.lock().unwrap().saturated() {
            break;
        }
        try_establish_connection(client, overlay, candidate).await;
    }

    // Any inventory carried in the response goes through the regular
    // acceptance pipeline; the orphan queue absorbs arrival order.
    let mut guard = inventory.lock().unwrap();
    for block in response.blocks {
        if let Err(err) = guard.add_block(block) {
            debug!(%err, "bootstrap block rejected");
        }
    }
    for tx in response.transactions {
        if let Err(err) = guard.add_transaction(tx) {
            debug!(%err, "bootstrap transaction rejected");
        }
    }
}

/// Learn a batch of advertised peers and fill unsaturated caps from it,
/// partitioned by group and attempted in randomized order.
pub async fn merge_candidates(client: &NetClient, overlay: &SharedOverlay, peers: Vec<PeerEntry>) {
    let (internal, external) = {
        let mut guard = overlay.lock().unwrap();
        let mut internal = Vec::new();
        let mut external = Vec::new();
        for peer in peers {
            let Ok(group) = group_of(&peer.node_id) else {
                continue;
            };
            guard.learn(peer.clone());
            if guard.is_active(&peer.node_id) {
                continue;
            }
            match guard.group_kind(group) {
                GroupKind::Internal => internal.push(peer),
                GroupKind::External => external.push(peer),
            }
        }
        (internal, external)
    };

    for (kind, mut candidates) in [
        (GroupKind::Internal, internal),
        (GroupKind::External, external),
    ] {
        candidates.shuffle(&mut rand::thread_rng());
        for candidate in candidates {
            if !overlay.lock().unwrap().has_capacity_kind(kind) {
                break;
            }
            try_establish_connection(client, overlay, candidate).await;
        }
    }
}

/// Peer exchange: every 30 s, ask each healthy active peer for its
/// connections and fill unsaturated caps from the answers. A
/// single-flight guard skips the tick when the previous round is still
/// in flight.
async fn peer_exchange_loop(ctx: NetContext) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = interval(PEER_EXCHANGE_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        if in_flight.swap(true, Ordering::SeqCst) {
            debug!("previous peer-exchange round still running; skipping tick");
            continue;
        }
        let ctx = ctx.clone();
        let guard = in_flight.clone();
        tokio::spawn(async move {
            peer_exchange_round(&ctx).await;
            guard.store(false, Ordering::SeqCst);
        });
    }
}

async fn peer_exchange_round(ctx: &NetContext) {
    if ctx.overlay.lock().unwrap().saturated() {
        return;
    }
    let targets = ctx.overlay.lock().unwrap().exchange_targets(MAX_PEER_RETRIES);
    for target in targets {
        if ctx.overlay.lock().unwrap().saturated() {
            break;
        }
        match ctx.client.fetch_peers(&target).await {
            Ok(peers) => {
                ctx.overlay.lock().unwrap().touch(&target.node_id);
                merge_candidates(&ctx.client, &ctx.overlay, peers).await;
            }
            Err(err) => {
                debug!(node_id = %target.node_id, %err, "peer exchange failed");
                let retries = ctx.overlay.lock().unwrap().record_failure(&target.node_id);
                if retries > MAX_PEER_RETRIES {
                    evict_and_replace(&ctx.client, &ctx.overlay, &target.node_id).await;
                }
            }
        }
    }
}

/// Drop peers not heard from within the timeout. Runs on two timers: a
/// coarse one at the timeout itself and a fine-grained one every 30 s.
async fn cleanup_loop(ctx: NetContext, period: Duration) {
    let mut ticker = interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        let removed = ctx.overlay.lock().unwrap().cleanup_stale();
        if removed > 0 {
            info!(removed, "dropped peers past the contact timeout");
        }
    }
}

/// Share our active peer list with the network every 45 s.
async fn peer_share_loop(ctx: NetContext) {
    let mut ticker = interval(PEER_SHARE_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        let peers = ctx.overlay.lock().unwrap().snapshot_active();
        if !peers.is_empty() {
            ctx.propagator.peer_list(peers);
        }
    }
}

/// Push our blocks and pending transactions to each active peer every
/// 30 s, so nodes that missed a flood converge anyway.
async fn inventory_sync_loop(ctx: NetContext) {
    let mut ticker = interval(INVENTORY_SYNC_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        let (blocks, transactions) = {
            let guard = ctx.inventory.lock().unwrap();
            (guard.all_blocks(), guard.pending_transactions())
        };
        if blocks.is_empty() && transactions.is_empty() {
            continue;
        }
        let peers = ctx.overlay.lock().unwrap().snapshot_active();
        for peer in peers {
            match ctx.client.push_inventory(&peer, &blocks, &transactions).await {
                Ok(_) => ctx.overlay.lock().unwrap().touch(&peer.node_id),
                Err(err) => {
                    debug!(node_id = %peer.node_id, %err, "inventory sync failed");
                    let retries = ctx.overlay.lock().unwrap().record_failure(&peer.node_id);
                    if retries > MAX_PEER_RETRIES {
                        evict_and_replace(&ctx.client, &ctx.overlay, &peer.node_id).await;
                    }
                }
            }
        }
    }
}

/// Rewrite the known-peer snapshot file every 60 s.
async fn snapshot_loop(ctx: NetContext) {
    let Some(path) = ctx.peer_store.clone() else {
        return;
    };
    let mut ticker = interval(SNAPSHOT_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        let peers = ctx.overlay.lock().unwrap().known_entries();
        if let Err(err) = write_peer_snapshot(&path, &peers) {
            warn!(path = %path.display(), %err, "failed to write peer snapshot");
        }
    }
}
