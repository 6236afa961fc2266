//! Request and response bodies specific to the HTTP surface.
//!
//! Shapes shared with the outbound client (`/register`, `/sync`, ping
//! and add statuses) live in `ember_net::protocol`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ember_core::Block;
use ember_net::{GroupCounts, PeerDetail};

/// Response to `GET /status`: identity plus a peer-table summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub node_id: String,
    pub ip: String,
    pub port: u16,
    pub blocks: usize,
    pub total_peers: usize,
    pub active_connections: usize,
    pub connections_by_group: GroupCounts,
    pub connections: Vec<PeerDetail>,
    pub all_peers: Vec<PeerDetail>,
}

/// Response to `GET /balance`.
#[derive(Debug, Clone, Serialize)]
pub struct BalancesResponse {
    pub balances: BTreeMap<String, i64>,
}

/// Response to `GET /consensus`: head metadata including the head block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResponse {
    pub current_head: Option<String>,
    pub chain_height: u64,
    pub head_block: Option<Block>,
    pub total_blocks: usize,
    pub forked_blocks: usize,
}

/// Query parameters of `GET /getblocks`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBlocksQuery {
    pub hash: Option<String>,
    pub mainchain: Option<bool>,
}

/// Body of `POST /inv`. Clients may omit `id` and `timestamp`; the node
/// fills them in before the transaction enters the pool.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTransaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub timestamp: Option<u64>,
}
