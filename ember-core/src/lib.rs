//! Core data structures and validation logic for the ember blockchain.
//!
//! This crate provides:
//! - Transaction and block structures with their wire (JSON) encodings
//! - Cryptographic hashing (SHA-256)
//! - Canonical serialization used for block and transaction identity
//! - Proof-of-work and structural validation
//! - Merkle tree computation

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hex-encoded all-zero hash, the `previousHash` of a chain's first block.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Default proof-of-work difficulty: leading zero hex characters required
/// of a block hash.
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Coins credited to the creator of a genesis block. The only mint event
/// in the system.
pub const GENESIS_ENDOWMENT: i64 = 100;

/// A value transfer between two node identities.
///
/// Immutable once accepted into the pending pool; its canonical JSON
/// encoding is the Merkle leaf preimage, so field order here is
/// load-bearing and pinned by a fixture test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Opaque unique identifier.
    pub id: String,
    /// Sending node id.
    pub sender: String,
    /// Receiving node id.
    pub receiver: String,
    /// Transferred amount; must be strictly positive.
    pub amount: u64,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A block of transactions chained by `previous_hash`.
///
/// A block's identity is its `hash`: SHA-256 over the canonical JSON
/// encoding of every other field, concatenated with the decimal nonce
/// string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// True only for the chain's endowment block.
    pub is_genesis: bool,
    /// Hash of the parent block, or [`ZERO_HASH`] for genesis.
    pub previous_hash: String,
    /// Creation time, milliseconds since the Unix epoch as a decimal string.
    pub timestamp: String,
    /// Proof-of-work nonce as a decimal string.
    pub nonce: String,
    /// Node id of the block producer.
    pub creator: String,
    /// Merkle root over the canonical transaction encodings.
    pub merkle_root: String,
    /// Number of transactions in the block.
    pub count: u64,
    /// Ordered transaction sequence.
    pub transactions: Vec<Transaction>,
    /// SHA-256 identity, hex-encoded.
    pub hash: String,
}

/// Wire form of a peer address, as exchanged via `/peers`, `/register`
/// and `/sync`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    /// Stable node identifier (32 hex chars).
    pub node_id: String,
    /// Observed IP address.
    pub ip: String,
    /// Listening port.
    pub port: u16,
}

/// Validation errors for blocks and transactions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing transaction field: {0}")]
    MissingField(&'static str),
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("insufficient balance for sender {0}")]
    InsufficientBalance(String),
    #[error("declared hash does not match block contents")]
    HashMismatch,
    #[error("block hash does not meet difficulty")]
    InsufficientPow,
    #[error("malformed node id")]
    MalformedNodeId,
}

/// SHA-256 over raw bytes, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical JSON encoding of a transaction: fixed field order, no
/// whitespace. Byte-exact across peers.
pub fn canonical_transaction(tx: &Transaction) -> String {
    serde_json::to_string(tx).expect("transaction serialize")
}

/// The hashable portion of a block: every field except `hash`, in the
/// canonical order. Serialization of this view plus the appended nonce
/// string is the block-hash preimage.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashableBlock<'a> {
    is_genesis: bool,
    previous_hash: &'a str,
    timestamp: &'a str,
    nonce: &'a str,
    creator: &'a str,
    merkle_root: &'a str,
    count: u64,
    transactions: &'a [Transaction],
}

/// Compute the hash a block would have with the given nonce.
///
/// The preimage is the canonical encoding of the block with the `hash`
/// field omitted and the `nonce` field set to `nonce`, concatenated with
/// the decimal nonce string itself.
pub fn block_hash(block: &Block, nonce: &str) -> String {
    let view = HashableBlock {
        is_genesis: block.is_genesis,
        previous_hash: &block.previous_hash,
        timestamp: &block.timestamp,
        nonce,
        creator: &block.creator,
        merkle_root: &block.merkle_root,
        count: block.count,
        transactions: &block.transactions,
    };
    let mut preimage = serde_json::to_string(&view).expect("block serialize");
    preimage.push_str(nonce);
    sha256_hex(preimage.as_bytes())
}

/// Compute the Merkle root of an ordered transaction sequence.
///
/// Leaves are SHA-256 hashes of the canonical transaction encodings.
/// While more than one node remains, an odd layer duplicates its last
/// element, and adjacent pairs are hashed over the concatenation of
/// their hex strings. An empty sequence yields the empty string.
pub fn merkle_root(txs: &[Transaction]) -> String {
    if txs.is_empty() {
        return String::new();
    }

    let mut layer: Vec<String> = txs
        .iter()
        .map(|tx| sha256_hex(canonical_transaction(tx).as_bytes()))
        .collect();
    while layer.len() > 1 {
        if layer.len() % 2 == 1 {
            let last = layer[layer.len() - 1].clone();
            layer.push(last);
        }
        layer = layer
            .chunks(2)
            .map(|pair| sha256_hex(format!("{}{}", pair[0], pair[1]).as_bytes()))
            .collect();
    }
    layer.remove(0)
}

/// Check whether a hex hash starts with at least `difficulty` zero
/// characters.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.chars().take(difficulty).filter(|c| *c == '0').count() == difficulty
}

/// Generate an opaque identifier: 16 random bytes, hex-encoded. Used
/// for node identities and server-assigned transaction ids.
pub fn random_hex_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The group a node id belongs to: its first hex character.
pub fn group_of(node_id: &str) -> Result<char, ValidationError> {
    node_id
        .chars()
        .next()
        .filter(char::is_ascii_hexdigit)
        .ok_or(ValidationError::MalformedNodeId)
}

/// Validate the required fields of a transaction: non-empty identifiers
/// and a strictly positive amount. Balance checks happen at a higher
/// level where chain state is available.
pub fn validate_transaction_fields(tx: &Transaction) -> Result<(), ValidationError> {
    if tx.id.is_empty() {
        return Err(ValidationError::MissingField("id"));
    }
    if tx.sender.is_empty() {
        return Err(ValidationError::MissingField("sender"));
    }
    if tx.receiver.is_empty() {
        return Err(ValidationError::MissingField("receiver"));
    }
    if tx.amount == 0 {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(())
}

/// Validate a regular block's identity and proof-of-work.
///
/// The recomputed hash must equal the declared one (a mismatch means the
/// declared identity is unrelated to the contents) and must carry at
/// least `difficulty` leading zero hex characters. Genesis blocks are
/// accepted unconditionally and never pass through here.
pub fn validate_block_pow(block: &Block, difficulty: usize) -> Result<(), ValidationError> {
    let recomputed = block_hash(block, &block.nonce);
    if recomputed != block.hash {
        return Err(ValidationError::HashMismatch);
    }
    if !meets_difficulty(&block.hash, difficulty) {
        return Err(ValidationError::InsufficientPow);
    }
    Ok(())
}
