//! Overlay networking for the ember node.
//!
//! This crate provides:
//! - The known-peer / active-connection tables with group-balanced caps
//! - Bootstrap registration and the peer-exchange, cleanup and sync loops
//! - Best-effort flooding of blocks, transactions and peer lists
//! - The shared outbound HTTP client and the wire protocol types
//!
//! The overlay speaks plain HTTP/JSON; peers are addressed as `ip:port`
//! and probed with `GET /ping` before they count against a cap.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use ember_core::{group_of, PeerEntry};
use ember_store::Inventory;

mod client;
mod overlay;
mod propagate;
mod snapshot;
mod tasks;

pub use client::{NetClient, CONNECT_TIMEOUT, REQUEST_TIMEOUT};
pub use overlay::{GroupCounts, GroupKind, Overlay, PeerDetail};
pub use propagate::{spawn_propagator, PropagateCommand, PropagatorHandle};
pub use snapshot::{load_peer_snapshot, write_peer_snapshot};
pub use tasks::{
    bootstrap, merge_candidates, spawn_tasks, try_establish_connection,
    try_replace_disconnected_peer,
};

/// Outgoing connection cap for peers sharing our group.
pub const MAX_INTERNAL_CONNECTIONS: usize = 4;

/// Outgoing connection cap for peers of other groups.
pub const MAX_EXTERNAL_CONNECTIONS: usize = 4;

/// Consecutive failures a peer may accrue before eviction.
pub const MAX_PEER_RETRIES: u32 = 3;

/// Peer-exchange loop period.
pub const PEER_EXCHANGE_INTERVAL: Duration = Duration::from_secs(30);

/// Contact timeout after which a silent peer is dropped.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(600);

/// Fine-grained cleanup period (the coarse timer runs at [`PEER_TIMEOUT`]).
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Peer-list propagation period.
pub const PEER_SHARE_INTERVAL: Duration = Duration::from_secs(45);

/// Inventory push period.
pub const INVENTORY_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Known-peer snapshot rewrite period.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

/// Delay before the single bulk propagation retry.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Chain state shared between the server, the overlay and the miner.
pub type SharedInventory = Arc<Mutex<Inventory>>;

/// Peer tables shared between the server and the overlay workers.
pub type SharedOverlay = Arc<Mutex<Overlay>>;

/// Network errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("public IP lookup returned an empty response")]
    PublicIpUnavailable,
    #[error("malformed node id: {0}")]
    InvalidNodeId(String),
}

/// The local node's stable identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub node_id: String,
    /// First hex character of the node id; drives connection balancing.
    pub group: char,
    pub ip: String,
    pub port: u16,
}

impl Identity {
    pub fn new(node_id: String, ip: String, port: u16) -> Result<Self, NetError> {
        let group = group_of(&node_id).map_err(|_| NetError::InvalidNodeId(node_id.clone()))?;
        Ok(Self {
            node_id,
            group,
            ip,
            port,
        })
    }

    /// Our own wire address, as sent with `/register`.
    pub fn entry(&self) -> PeerEntry {
        PeerEntry {
            node_id: self.node_id.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }
}

/// Everything the overlay workers need, cheap to clone into tasks.
#[derive(Clone)]
pub struct NetContext {
    pub client: NetClient,
    pub overlay: SharedOverlay,
    pub inventory: SharedInventory,
    pub propagator: PropagatorHandle,
    pub shutdown: Arc<AtomicBool>,
    /// Known-peer snapshot file; `None` disables the snapshot loop.
    pub peer_store: Option<PathBuf>,
}

/// Wire protocol types shared by the server and the outbound client.
pub mod protocol {
    use serde::{Deserialize, Serialize};

    use ember_core::{Block, PeerEntry, Transaction};

    /// Response to `POST /register`: our identity, peers and inventory.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RegisterResponse {
        pub status: String,
        pub peers: Vec<PeerEntry>,
        pub node_id: String,
        pub ip: String,
        pub port: u16,
        #[serde(default)]
        pub blocks: Vec<Block>,
        #[serde(default)]
        pub transactions: Vec<Transaction>,
    }

    /// `POST /sync` carries either a peer list or an inventory payload;
    /// the variants are distinguished by their fields.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(untagged, rename_all = "camelCase")]
    pub enum SyncRequest {
        #[serde(rename_all = "camelCase")]
        Inventory {
            blocks: Vec<Block>,
            transactions: Vec<Transaction>,
        },
        #[serde(rename_all = "camelCase")]
        Peers {
            peers: Vec<PeerEntry>,
        },
    }

    /// Response shapes matching the two [`SyncRequest`] variants.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(untagged, rename_all = "camelCase")]
    pub enum SyncResponse {
        #[serde(rename_all = "camelCase")]
        Inventory {
            added_blocks: usize,
            added_transactions: usize,
        },
        #[serde(rename_all = "camelCase")]
        Peers {
            status: String,
            added: usize,
        },
    }

    /// Response to `GET /ping`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PingResponse {
        pub status: String,
    }

    /// Response to `POST /inv` and `POST /block`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AddStatus {
        pub status: String,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn sync_request_variants_deserialize_by_shape() {
            let peers: SyncRequest =
                serde_json::from_str(r#"{"peers":[{"nodeId":"a0","ip":"127.0.0.1","port":7001}]}"#)
                    .unwrap();
            assert!(matches!(peers, SyncRequest::Peers { .. }));

            let inventory: SyncRequest =
                serde_json::from_str(r#"{"blocks":[],"transactions":[]}"#).unwrap();
            assert!(matches!(inventory, SyncRequest::Inventory { .. }));
        }

        #[test]
        fn sync_response_round_trip() {
            let response = SyncResponse::Inventory {
                added_blocks: 2,
                added_transactions: 3,
            };
            let encoded = serde_json::to_string(&response).unwrap();
            assert_eq!(encoded, r#"{"addedBlocks":2,"addedTransactions":3}"#);
        }
    }
}
