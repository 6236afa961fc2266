//! On-demand proof-of-work miner.
//!
//! The miner is an HTTP client of a local node: it snapshots the pending
//! pool via `/inventory`, searches a nonce for a candidate block and
//! submits the result back through `/block`, then polls briefly to see
//! whether the block made it in. A lost race or rejection rolls nothing
//! back; the block simply did not win.

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info};

use ember_core::{block_hash, meets_difficulty, merkle_root, Block, PeerEntry, ZERO_HASH};
use ember_net::NetClient;

/// Upper bound on transactions pulled from the pending pool per block.
pub const MAX_TX_PER_BLOCK: usize = 10;

const VERIFY_ATTEMPTS: usize = 5;
const VERIFY_DELAY: Duration = Duration::from_millis(300);

/// What a mining run produced.
#[derive(Debug)]
pub struct MineReport {
    pub hash: String,
    pub nonce: String,
    pub transactions: usize,
    pub elapsed: Duration,
    /// Whether the block showed up in the node's inventory afterwards.
    pub confirmed: bool,
}

/// Mine one block against the node listening on `port`.
///
/// `creator` defaults to the target node's own id, `prev_hash` to its
/// current chain head (or the all-zero hash on an empty chain).
pub async fn mine_once(
    port: u16,
    creator: Option<String>,
    prev_hash: Option<String>,
    difficulty: usize,
) -> Result<MineReport> {
    let client = NetClient::new()?;
    let local = PeerEntry {
        node_id: String::new(),
        ip: "127.0.0.1".to_string(),
        port,
    };

    let creator = match creator {
        Some(id) => id,
        None => {
            let status = client
                .fetch_status(&local)
                .await
                .context("cannot reach the local node")?;
            status["nodeId"]
                .as_str()
                .ok_or_else(|| anyhow!("node status carries no nodeId"))?
                .to_string()
        }
    };

    let inventory = client.fetch_inventory(&local).await?;
    let mut transactions = inventory.transactions;
    transactions.truncate(MAX_TX_PER_BLOCK);
    if transactions.is_empty() {
        bail!("pending pool is empty; nothing to mine");
    }

    let previous_hash = match prev_hash {
        Some(hash) => hash,
        None => client
            .fetch_main_chain(&local)
            .await?
            .last()
            .map(|block| block.hash.clone())
            .unwrap_or_else(|| ZERO_HASH.to_string()),
    };

    let candidate = Block {
        is_genesis: false,
        previous_hash,
        timestamp: Utc::now().timestamp_millis().to_string(),
        nonce: "0".to_string(),
        creator,
        merkle_root: merkle_root(&transactions),
        count: transactions.len() as u64,
        transactions,
        hash: String::new(),
    };

    info!(
        txs = candidate.count,
        parent = %candidate.previous_hash,
        difficulty,
        "starting nonce search"
    );
    let started = Instant::now();
    let block = tokio::task::spawn_blocking(move || search_nonce(candidate, difficulty))
        .await
        .context("nonce search aborted")?;
    let elapsed = started.elapsed();
    info!(hash = %block.hash, nonce = %block.nonce, ?elapsed, "block sealed");

    client
        .push_block(&local, &block)
        .await
        .context("block submission rejected")?;

    let mut confirmed = false;
    for _ in 0..VERIFY_ATTEMPTS {
        sleep(VERIFY_DELAY).await;
        match client.fetch_inventory(&local).await {
            Ok(view) => {
                if view.blocks.iter().any(|hash| *hash == block.hash) {
                    confirmed = true;
                    break;
                }
            }
            Err(err) => debug!(%err, "inventory poll failed"),
        }
    }

    Ok(MineReport {
        hash: block.hash,
        nonce: block.nonce,
        transactions: block.count as usize,
        elapsed,
        confirmed,
    })
}

/// Iterate nonces from 1 until the block hash carries the required
/// leading zeros, then seal the block. CPU-bound; runs off the async
/// runtime.
fn search_nonce(mut block: Block, difficulty: usize) -> Block {
    let mut nonce: u64 = 1;
    loop {
        let candidate = nonce.to_string();
        let hash = block_hash(&block, &candidate);
        if meets_difficulty(&hash, difficulty) {
            block.nonce = candidate;
            block.hash = hash;
            return block;
        }
        nonce += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{validate_block_pow, Transaction};

    #[test]
    fn nonce_search_seals_a_valid_block() {
        let tx = Transaction {
            id: "t1".to_string(),
            sender: "a0".to_string(),
            receiver: "b1".to_string(),
            amount: 5,
            timestamp: 1_700_000_000_000,
        };
        let candidate = Block {
            is_genesis: false,
            previous_hash: ZERO_HASH.to_string(),
            timestamp: "1700000000000".to_string(),
            nonce: "0".to_string(),
            creator: "a0".to_string(),
            merkle_root: merkle_root(std::slice::from_ref(&tx)),
            count: 1,
            transactions: vec![tx],
            hash: String::new(),
        };

        // One leading zero keeps the expected search around 16 attempts.
        let block = search_nonce(candidate, 1);
        assert!(meets_difficulty(&block.hash, 1));
        assert!(validate_block_pow(&block, 1).is_ok());
        assert_eq!(block.hash, block_hash(&block, &block.nonce));
    }
}
