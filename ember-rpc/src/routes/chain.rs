//! Chain-facing endpoints: inventory queries and block/transaction
//! submission.

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use tracing::info;

use ember_core::{random_hex_id, Block, Transaction};
use ember_net::protocol::AddStatus;
use ember_store::InventoryView;

use crate::error::ApiError;
use crate::types::{BalancesResponse, ConsensusResponse, GetBlocksQuery, SubmitTransaction};
use crate::ApiContext;

/// `GET /inventory`
pub async fn inventory(State(ctx): State<ApiContext>) -> Json<InventoryView> {
    Json(ctx.inventory.lock().unwrap().inventory_view())
}

/// `GET /getblocks` — one block by hash, the main chain, or everything.
pub async fn get_blocks(
    State(ctx): State<ApiContext>,
    Query(query): Query<GetBlocksQuery>,
) -> Result<Json<Vec<Block>>, ApiError> {
    let guard = ctx.inventory.lock().unwrap();
    if let Some(hash) = query.hash {
        let block = guard.block(&hash).cloned().ok_or(ApiError::BlockNotFound)?;
        return Ok(Json(vec![block]));
    }
    if query.mainchain.unwrap_or(false) {
        return Ok(Json(guard.main_chain()));
    }
    Ok(Json(guard.all_blocks()))
}

/// `GET /balance`
pub async fn balances(State(ctx): State<ApiContext>) -> Json<BalancesResponse> {
    Json(BalancesResponse {
        balances: ctx.inventory.lock().unwrap().balances(),
    })
}

/// `GET /consensus`
pub async fn consensus(State(ctx): State<ApiContext>) -> Json<ConsensusResponse> {
    let guard = ctx.inventory.lock().unwrap();
    let view = guard.consensus_view();
    let head_block = view
        .current_head
        .as_deref()
        .and_then(|hash| guard.block(hash).cloned());
    Json(ConsensusResponse {
        current_head: view.current_head,
        chain_height: view.chain_height,
        head_block,
        total_blocks: view.total_blocks,
        forked_blocks: view.forked_blocks,
    })
}

/// `POST /inv` — submit a transaction. New transactions enter the
/// pending pool and are flooded; duplicates are a quiet no-op.
pub async fn submit_transaction(
    State(ctx): State<ApiContext>,
    Json(submission): Json<SubmitTransaction>,
) -> Result<Json<AddStatus>, ApiError> {
    let tx = Transaction {
        id: submission.id.unwrap_or_else(random_hex_id),
        sender: submission.sender,
        receiver: submission.receiver,
        amount: submission.amount,
        timestamp: submission
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis() as u64),
    };

    let outcome = ctx.inventory.lock().unwrap().add_transaction(tx.clone())?;
    if outcome.is_new() {
        info!(id = %tx.id, sender = %tx.sender, receiver = %tx.receiver, amount = tx.amount, "transaction accepted");
        ctx.propagator.transaction(tx);
        return Ok(Json(AddStatus {
            status: "added".to_string(),
        }));
    }
    Ok(Json(AddStatus {
        status: "already_exists".to_string(),
    }))
}

/// `POST /block` — submit a block. Accepted blocks (including queued
/// orphans) are flooded; duplicates are a quiet no-op.
pub async fn submit_block(
    State(ctx): State<ApiContext>,
    Json(block): Json<Block>,
) -> Result<Json<AddStatus>, ApiError> {
    let outcome = ctx.inventory.lock().unwrap().add_block(block.clone())?;
    if outcome.is_new() {
        info!(hash = %block.hash, txs = block.transactions.len(), "block accepted");
        ctx.propagator.block(block);
        return Ok(Json(AddStatus {
            status: "added".to_string(),
        }));
    }
    Ok(Json(AddStatus {
        status: "already_exists".to_string(),
    }))
}
