//! Overlay-facing endpoints: liveness, peer discovery and sync.

use axum::extract::State;
use axum::Json;
use tracing::{debug, info};

use ember_core::PeerEntry;
use ember_net::protocol::{PingResponse, RegisterResponse, SyncRequest, SyncResponse};
use ember_net::{merge_candidates, try_establish_connection};

use crate::types::StatusResponse;
use crate::ApiContext;

/// `GET /status`
pub async fn status(State(ctx): State<ApiContext>) -> Json<StatusResponse> {
    let (total_peers, active_connections, connections_by_group, connections, all_peers) = {
        let guard = ctx.overlay.lock().unwrap();
        (
            guard.known_count(),
            guard.active_count(),
            guard.counts_by_group(),
            guard.active_details(),
            guard.known_details(),
        )
    };
    let blocks = ctx.inventory.lock().unwrap().consensus_view().total_blocks;
    Json(StatusResponse {
        node_id: ctx.identity.node_id.clone(),
        ip: ctx.identity.ip.clone(),
        port: ctx.identity.port,
        blocks,
        total_peers,
        active_connections,
        connections_by_group,
        connections,
        all_peers,
    })
}

/// `GET /peers` — our active connections.
pub async fn peers(State(ctx): State<ApiContext>) -> Json<Vec<PeerEntry>> {
    Json(ctx.overlay.lock().unwrap().snapshot_active())
}

/// `GET /ping`
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "alive".to_string(),
    })
}

/// `POST /register` — record the caller as a known peer, attempt a
/// reverse connection in the background and hand back our peers and
/// inventory so the caller can bootstrap from them.
pub async fn register(
    State(ctx): State<ApiContext>,
    Json(caller): Json<PeerEntry>,
) -> Json<RegisterResponse> {
    info!(node_id = %caller.node_id, ip = %caller.ip, port = caller.port, "peer registered");
    ctx.overlay.lock().unwrap().learn(caller.clone());
    {
        let client = ctx.client.clone();
        let overlay = ctx.overlay.clone();
        tokio::spawn(async move {
            try_establish_connection(&client, &overlay, caller).await;
        });
    }

    let peers = ctx.overlay.lock().unwrap().snapshot_active();
    let (blocks, transactions) = {
        let guard = ctx.inventory.lock().unwrap();
        (guard.all_blocks(), guard.pending_transactions())
    };
    Json(RegisterResponse {
        status: "registered".to_string(),
        peers,
        node_id: ctx.identity.node_id.clone(),
        ip: ctx.identity.ip.clone(),
        port: ctx.identity.port,
        blocks,
        transactions,
    })
}

/// `POST /sync` — accept a peer list or an inventory payload.
///
/// Sync is the catch-up path, not the flooding path: absorbed blocks and
/// transactions are not re-propagated, since every node receives the
/// same periodic pushes from its own connections.
pub async fn sync(
    State(ctx): State<ApiContext>,
    Json(request): Json<SyncRequest>,
) -> Json<SyncResponse> {
    match request {
        SyncRequest::Peers { peers } => {
            let added = {
                let mut guard = ctx.overlay.lock().unwrap();
                peers
                    .iter()
                    .filter(|peer| guard.learn((*peer).clone()))
                    .count()
            };
            let client = ctx.client.clone();
            let overlay = ctx.overlay.clone();
            tokio::spawn(async move {
                merge_candidates(&client, &overlay, peers).await;
            });
            Json(SyncResponse::Peers {
                status: "ok".to_string(),
                added,
            })
        }
        SyncRequest::Inventory {
            blocks,
            transactions,
        } => {
            let mut added_blocks = 0;
            let mut added_transactions = 0;
            {
                let mut guard = ctx.inventory.lock().unwrap();
                for block in blocks {
                    match guard.add_block(block) {
                        Ok(outcome) if outcome.is_new() => added_blocks += 1,
                        Ok(_) => {}
                        Err(err) => debug!(%err, "sync block rejected"),
                    }
                }
                for tx in transactions {
                    match guard.add_transaction(tx) {
                        Ok(outcome) if outcome.is_new() => added_transactions += 1,
                        Ok(_) => {}
                        Err(err) => debug!(%err, "sync transaction rejected"),
                    }
                }
            }
            Json(SyncResponse::Inventory {
                added_blocks,
                added_transactions,
            })
        }
    }
}
