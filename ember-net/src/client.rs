//! Outbound HTTP client for peer communication.
//!
//! One shared [`reqwest::Client`] with a hard per-request deadline; every
//! call site treats a timeout as an ordinary peer failure.

use std::time::Duration;

use reqwest::Client;

use ember_core::{Block, PeerEntry, Transaction};
use ember_store::InventoryView;

use crate::protocol::{RegisterResponse, SyncRequest, SyncResponse};
use crate::NetError;

/// Per-request deadline for every outbound call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-establishment deadline, kept shorter than the request
/// deadline so dead peers fail fast.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared outbound HTTP client. Cloning is cheap.
#[derive(Clone)]
pub struct NetClient {
    http: Client,
}

impl NetClient {
    pub fn new() -> Result<Self, NetError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    fn peer_url(peer: &PeerEntry, path: &str) -> String {
        format!("http://{}:{}{}", peer.ip, peer.port, path)
    }

    /// Liveness probe. Success is any 2xx response to `GET /ping`.
    pub async fn ping(&self, peer: &PeerEntry) -> Result<(), NetError> {
        self.http
            .get(Self::peer_url(peer, "/ping"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Introduce ourselves to a bootstrap address (`ip:port`) and collect
    /// the responder's identity, peers and inventory.
    pub async fn register(
        &self,
        addr: &str,
        identity: &PeerEntry,
    ) -> Result<RegisterResponse, NetError> {
        let response = self
            .http
            .post(format!("http://{addr}/register"))
            .json(identity)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Fetch a peer's `/status` document. Callers pick out the fields
    /// they need; the miner uses it to learn the local node's id.
    pub async fn fetch_status(&self, peer: &PeerEntry) -> Result<serde_json::Value, NetError> {
        let response = self
            .http
            .get(Self::peer_url(peer, "/status"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Fetch a peer's active connections.
    pub async fn fetch_peers(&self, peer: &PeerEntry) -> Result<Vec<PeerEntry>, NetError> {
        let response = self
            .http
            .get(Self::peer_url(peer, "/peers"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Fetch a peer's full inventory snapshot.
    pub async fn fetch_inventory(&self, peer: &PeerEntry) -> Result<InventoryView, NetError> {
        let response = self
            .http
            .get(Self::peer_url(peer, "/inventory"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Fetch a peer's main chain in genesis-to-head order.
    pub async fn fetch_main_chain(&self, peer: &PeerEntry) -> Result<Vec<Block>, NetError> {
        let response = self
            .http
            .get(Self::peer_url(peer, "/getblocks?mainchain=true"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Forward a block to a peer.
    pub async fn push_block(&self, peer: &PeerEntry, block: &Block) -> Result<(), NetError> {
        self.http
            .post(Self::peer_url(peer, "/block"))
            .json(block)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Forward a transaction to a peer.
    pub async fn push_transaction(
        &self,
        peer: &PeerEntry,
        tx: &Transaction,
    ) -> Result<(), NetError> {
        self.http
            .post(Self::peer_url(peer, "/inv"))
            .json(tx)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Share a peer list via `/sync`.
    pub async fn push_peer_list(
        &self,
        peer: &PeerEntry,
        peers: &[PeerEntry],
    ) -> Result<(), NetError> {
        self.push_sync(peer, &SyncRequest::Peers { peers: peers.to_vec() })
            .await?;
        Ok(())
    }

    /// Push our blocks and pending transactions via `/sync`.
    pub async fn push_inventory(
        &self,
        peer: &PeerEntry,
        blocks: &[Block],
        transactions: &[Transaction],
    ) -> Result<SyncResponse, NetError> {
        self.push_sync(
            peer,
            &SyncRequest::Inventory {
                blocks: blocks.to_vec(),
                transactions: transactions.to_vec(),
            },
        )
        .await
    }

    async fn push_sync(
        &self,
        peer: &PeerEntry,
        request: &SyncRequest,
    ) -> Result<SyncResponse, NetError> {
        let response = self
            .http
            .post(Self::peer_url(peer, "/sync"))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Resolve the node's public IP via an external lookup service.
    pub async fn public_ip(&self) -> Result<String, NetError> {
        let ip = self
            .http
            .get("https://api.ipify.org")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let ip = ip.trim().to_string();
        if ip.is_empty() {
            return Err(NetError::PublicIpUnavailable);
        }
        Ok(ip)
    }
}
