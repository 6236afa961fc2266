//! In-memory inventory store and consensus engine for the ember node.
//!
//! This crate owns the chain state:
//! - Blocks by hash, block heights and the current chain head
//! - The pending transaction pool and the monotonic `seen` set
//! - The balance ledger
//! - Fork-aware head selection and chain reorganization
//!
//! State is process-local only; durable storage is out of scope.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use ember_core::{
    block_hash, merkle_root, validate_block_pow, validate_transaction_fields, Block, Transaction,
    ValidationError, GENESIS_ENDOWMENT, ZERO_HASH,
};

/// Store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("a genesis block is already present")]
    GenesisExists,
    #[error("chain already has a root block")]
    RootExists,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of feeding a block or transaction into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Accepted and applied (or stored as a side branch).
    Added,
    /// Queued until its parent block arrives.
    Orphaned,
    /// Deduplicated via the `seen` set; no state change.
    AlreadyKnown,
}

impl AddOutcome {
    /// Whether the message is new to this node and should be flooded.
    pub fn is_new(&self) -> bool {
        !matches!(self, AddOutcome::AlreadyKnown)
    }
}

/// Consensus summary as reported by `/consensus` and `/inventory`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusView {
    pub current_head: Option<String>,
    pub chain_height: u64,
    pub total_blocks: usize,
    pub forked_blocks: usize,
}

/// Snapshot of the full inventory as reported by `/inventory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryView {
    pub blocks: Vec<String>,
    pub transactions: Vec<Transaction>,
    pub balances: BTreeMap<String, i64>,
    pub consensus: ConsensusView,
}

/// In-memory chain state with fork-aware consensus.
///
/// `balances` and `pending` always reflect exactly the main chain: a
/// block extending the head applies its transactions on acceptance, a
/// side-branch block is stored untouched, and branch switches go through
/// [`Inventory::reorg`] so every main-chain block is applied exactly once.
pub struct Inventory {
    difficulty: usize,
    blocks: HashMap<String, Block>,
    heights: HashMap<String, u64>,
    head: Option<String>,
    pending: BTreeMap<String, Transaction>,
    seen: HashSet<String>,
    balances: BTreeMap<String, i64>,
    /// Blocks waiting for an ancestor, keyed by `previous_hash`.
    orphans: HashMap<String, Vec<Block>>,
}

impl Inventory {
    /// Create an empty store enforcing the given proof-of-work difficulty.
    pub fn new(difficulty: usize) -> Self {
        Self {
            difficulty,
            blocks: HashMap::new(),
            heights: HashMap::new(),
            head: None,
            pending: BTreeMap::new(),
            seen: HashSet::new(),
            balances: BTreeMap::new(),
            orphans: HashMap::new(),
        }
    }

    /// Build the endowment block for a fresh chain. The caller feeds it
    /// through [`Inventory::add_block`] like any other block.
    pub fn genesis_block(creator: &str, timestamp_millis: u64) -> Block {
        let mut block = Block {
            is_genesis: true,
            previous_hash: ZERO_HASH.to_string(),
            timestamp: timestamp_millis.to_string(),
            nonce: "0".to_string(),
            creator: creator.to_string(),
            merkle_root: merkle_root(&[]),
            count: 0,
            transactions: vec![],
            hash: String::new(),
        };
        block.hash = block_hash(&block, "0");
        block
    }

    /// Feed a block into the store.
    ///
    /// Duplicates are no-ops, genesis blocks are accepted unconditionally
    /// when no genesis exists, regular blocks must pass hash and
    /// proof-of-work validation, and blocks with an unknown parent are
    /// queued until the ancestor arrives. A regular block with the
    /// all-zero parent roots an empty chain at height 0. Connecting a
    /// block may trigger a reorganization and may connect queued
    /// descendants.
    pub fn add_block(&mut self, block: Block) -> Result<AddOutcome> {
        if self.seen.contains(&block.hash) {
            return Ok(AddOutcome::AlreadyKnown);
        }

        if block.is_genesis {
            if self.has_genesis() {
                return Err(StoreError::GenesisExists);
            }
            let hash = block.hash.clone();
            let creator = block.creator.clone();
            self.seen.insert(hash.clone());
            self.heights.insert(hash.clone(), 0);
            self.blocks.insert(hash.clone(), block);
            self.head = Some(hash.clone());
            *self.balances.entry(creator.clone()).or_default() += GENESIS_ENDOWMENT;
            info!(hash = %hash, creator = %creator, "genesis block accepted");
            self.connect_descendants(&hash);
            return Ok(AddOutcome::Added);
        }

        validate_block_pow(&block, self.difficulty)?;

        // A regular block carrying the all-zero parent roots an empty
        // chain (a miner may run before any genesis exists). No block is
        // ever stored under the all-zero hash, so the generic orphan
        // path would queue it forever; once any root is present such a
        // block conflicts and is rejected instead.
        if block.previous_hash == ZERO_HASH {
            if !self.blocks.is_empty() {
                return Err(StoreError::RootExists);
            }
            self.validate_block_transactions(&block)?;
            let hash = block.hash.clone();
            self.seen.insert(hash.clone());
            self.heights.insert(hash.clone(), 0);
            self.apply_block_transactions(&block);
            self.blocks.insert(hash.clone(), block);
            self.head = Some(hash.clone());
            info!(hash = %hash, "rooted empty chain at a mined block");
            self.connect_descendants(&hash);
            return Ok(AddOutcome::Added);
        }

        if !self.blocks.contains_key(&block.previous_hash) {
            debug!(hash = %block.hash, parent = %block.previous_hash, "queueing orphan block");
            self.seen.insert(block.hash.clone());
            self.orphans
                .entry(block.previous_hash.clone())
                .or_default()
                .push(block);
            return Ok(AddOutcome::Orphaned);
        }

        let hash = block.hash.clone();
        self.connect_block(block)?;
        self.connect_descendants(&hash);
        Ok(AddOutcome::Added)
    }

    /// Feed a transaction into the pending pool.
    ///
    /// Validates required fields, a strictly positive amount and the
    /// sender's balance against the current chain state (not against
    /// pending-pool projections).
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<AddOutcome> {
        if self.seen.contains(&tx.id) {
            return Ok(AddOutcome::AlreadyKnown);
        }
        validate_transaction_fields(&tx)?;
        let funds = self.balances.get(&tx.sender).copied().unwrap_or(0);
        if funds < tx.amount as i64 {
            return Err(ValidationError::InsufficientBalance(tx.sender).into());
        }
        self.seen.insert(tx.id.clone());
        self.pending.insert(tx.id.clone(), tx);
        Ok(AddOutcome::Added)
    }

    /// Insert a block whose parent is present, then run consensus.
    fn connect_block(&mut self, block: Block) -> Result<()> {
        self.validate_block_transactions(&block)?;

        let hash = block.hash.clone();
        let parent_height = self.heights[&block.previous_hash];
        let height = parent_height + 1;
        self.seen.insert(hash.clone());
        self.heights.insert(hash.clone(), height);

        match self.head.clone() {
            None => {
                // Unreachable in practice: a known parent implies a
                // connected genesis, which implies a head.
                self.apply_block_transactions(&block);
                self.head = Some(hash.clone());
                self.blocks.insert(hash, block);
            }
            Some(head) if block.previous_hash == head => {
                self.apply_block_transactions(&block);
                self.head = Some(hash.clone());
                self.blocks.insert(hash.clone(), block);
                debug!(hash = %hash, height, "chain head advanced");
            }
            Some(head) => {
                self.blocks.insert(hash.clone(), block);
                let head_height = self.heights[&head];
                if height > head_height || (height == head_height && hash < head) {
                    self.reorg(&head, &hash);
                } else {
                    debug!(hash = %hash, height, "block stored on side branch");
                }
            }
        }
        Ok(())
    }

    /// Connect any queued orphans that were waiting on `hash`, depth-first.
    /// A descendant that fails validation is dropped with a warning; it
    /// cannot fail the block that unblocked it.
    fn connect_descendants(&mut self, hash: &str) {
        let mut parents = vec![hash.to_string()];
        while let Some(parent) = parents.pop() {
            let Some(children) = self.orphans.remove(&parent) else {
                continue;
            };
            for child in children {
                let child_hash = child.hash.clone();
                match self.connect_block(child) {
                    Ok(()) => {
                        info!(hash = %child_hash, parent = %parent, "orphan block connected");
                        parents.push(child_hash);
                    }
                    Err(err) => {
                        warn!(hash = %child_hash, %err, "dropping invalid orphan block");
                    }
                }
            }
        }
    }

    /// Simulate a block's transactions in order against a shadow copy of
    /// the balance ledger. Any invalid transaction rejects the block.
    fn validate_block_transactions(&self, block: &Block) -> Result<()> {
        let mut shadow = self.balances.clone();
        for tx in &block.transactions {
            validate_transaction_fields(tx)?;
            let funds = shadow.get(&tx.sender).copied().unwrap_or(0);
            if funds < tx.amount as i64 {
                return Err(ValidationError::InsufficientBalance(tx.sender.clone()).into());
            }
            *shadow.entry(tx.sender.clone()).or_default() -= tx.amount as i64;
            *shadow.entry(tx.receiver.clone()).or_default() += tx.amount as i64;
        }
        Ok(())
    }

    /// Apply a block's transactions to the ledger and drop them from the
    /// pending pool.
    fn apply_block_transactions(&mut self, block: &Block) {
        for tx in &block.transactions {
            *self.balances.entry(tx.sender.clone()).or_default() -= tx.amount as i64;
            *self.balances.entry(tx.receiver.clone()).or_default() += tx.amount as i64;
            self.pending.remove(&tx.id);
        }
    }

    /// Switch the main chain from `old_head` to `new_head`.
    ///
    /// Walks both ancestor chains, finds their common prefix, reverses
    /// the abandoned suffix in reverse order (restoring its transactions
    /// to the pending pool) and applies the adopted suffix in order.
    fn reorg(&mut self, old_head: &str, new_head: &str) {
        let old_chain = self.ancestor_chain(old_head);
        let new_chain = self.ancestor_chain(new_head);
        let mut prefix = 0;
        while prefix < old_chain.len()
            && prefix < new_chain.len()
            && old_chain[prefix] == new_chain[prefix]
        {
            prefix += 1;
        }

        for hash in old_chain[prefix..].iter().rev() {
            let block = self.blocks[hash].clone();
            for tx in block.transactions.iter().rev() {
                *self.balances.entry(tx.sender.clone()).or_default() += tx.amount as i64;
                *self.balances.entry(tx.receiver.clone()).or_default() -= tx.amount as i64;
                self.pending.insert(tx.id.clone(), tx.clone());
            }
        }
        for hash in &new_chain[prefix..] {
            let block = self.blocks[hash].clone();
            self.apply_block_transactions(&block);
        }

        info!(
            from = %old_head,
            to = %new_head,
            reversed = old_chain.len() - prefix,
            applied = new_chain.len() - prefix,
            "chain reorganized"
        );
        self.head = Some(new_head.to_string());
    }

    /// The hashes from genesis to `tip`, in chain order.
    fn ancestor_chain(&self, tip: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = tip.to_string();
        while let Some(block) = self.blocks.get(&current) {
            chain.push(current.clone());
            if block.is_genesis {
                break;
            }
            current = block.previous_hash.clone();
        }
        chain.reverse();
        chain
    }

    /// Whether any genesis block has been accepted.
    pub fn has_genesis(&self) -> bool {
        self.blocks.values().any(|b| b.is_genesis)
    }

    /// Look up a block by hash.
    pub fn block(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    /// Every stored block, side branches included.
    pub fn all_blocks(&self) -> Vec<Block> {
        self.blocks.values().cloned().collect()
    }

    /// The main chain from genesis to the current head.
    pub fn main_chain(&self) -> Vec<Block> {
        match &self.head {
            Some(head) => self
                .ancestor_chain(head)
                .iter()
                .map(|h| self.blocks[h].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Current chain head hash, if any block exists.
    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    /// Height of the current head (genesis is 0).
    pub fn chain_height(&self) -> u64 {
        self.head
            .as_ref()
            .and_then(|h| self.heights.get(h))
            .copied()
            .unwrap_or(0)
    }

    /// Pending transactions in stable (id) order.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.values().cloned().collect()
    }

    /// Snapshot of the balance ledger.
    pub fn balances(&self) -> BTreeMap<String, i64> {
        self.balances.clone()
    }

    /// Consensus summary: head, height, block and fork counts.
    pub fn consensus_view(&self) -> ConsensusView {
        let chain_height = self.chain_height();
        let total_blocks = self.blocks.len();
        let forked_blocks = match &self.head {
            Some(_) => total_blocks.saturating_sub(chain_height as usize + 1),
            None => total_blocks,
        };
        ConsensusView {
            current_head: self.head.clone(),
            chain_height,
            total_blocks,
            forked_blocks,
        }
    }

    /// Full inventory snapshot for `/inventory` and `/register`.
    pub fn inventory_view(&self) -> InventoryView {
        InventoryView {
            blocks: self.blocks.keys().cloned().collect(),
            transactions: self.pending_transactions(),
            balances: self.balances(),
            consensus: self.consensus_view(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N1: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";
    const N2: &str = "b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2";
    const N3: &str = "c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3";

    fn tx(id: &str, sender: &str, receiver: &str, amount: u64) -> Transaction {
        Transaction {
            id: id.to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            timestamp: 1_700_000_000_000,
        }
    }

    /// Build a sealed block on the given parent. Tests run at difficulty
    /// zero, so no nonce search is needed.
    fn block_on(prev: &str, creator: &str, nonce: &str, txs: Vec<Transaction>) -> Block {
        let mut block = Block {
            is_genesis: false,
            previous_hash: prev.to_string(),
            timestamp: "1700000000001".to_string(),
            nonce: nonce.to_string(),
            creator: creator.to_string(),
            merkle_root: merkle_root(&txs),
            count: txs.len() as u64,
            transactions: txs,
            hash: String::new(),
        };
        block.hash = block_hash(&block, nonce);
        block
    }

    fn store_with_genesis() -> (Inventory, String) {
        let mut store = Inventory::new(0);
        let genesis = Inventory::genesis_block(N1, 1_700_000_000_000);
        let hash = genesis.hash.clone();
        assert_eq!(store.add_block(genesis).unwrap(), AddOutcome::Added);
        (store, hash)
    }

    fn total_balance(store: &Inventory) -> i64 {
        store.balances().values().sum()
    }

    #[test]
    fn genesis_endows_creator() {
        let (store, _) = store_with_genesis();
        assert_eq!(store.balances().get(N1), Some(&100));
        assert_eq!(store.chain_height(), 0);
        assert_eq!(store.inventory_view().blocks.len(), 1);
    }

    #[test]
    fn second_genesis_is_rejected() {
        let (mut store, _) = store_with_genesis();
        let other = Inventory::genesis_block(N2, 1_700_000_000_999);
        assert_eq!(store.add_block(other).unwrap_err(), StoreError::GenesisExists);
        assert_eq!(total_balance(&store), 100);
    }

    #[test]
    fn transaction_dedup_and_pool_growth() {
        let (mut store, _) = store_with_genesis();
        let t = tx("t1", N1, N2, 30);
        assert_eq!(store.add_transaction(t.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(
            store.add_transaction(t).unwrap(),
            AddOutcome::AlreadyKnown
        );
        assert_eq!(store.pending_transactions().len(), 1);
    }

    #[test]
    fn overdraft_transaction_rejected() {
        let (mut store, _) = store_with_genesis();
        let err = store.add_transaction(tx("t1", N1, N3, 200)).unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation(ValidationError::InsufficientBalance(N1.to_string()))
        );
        assert!(store.pending_transactions().is_empty());
        assert_eq!(store.balances().get(N1), Some(&100));
    }

    #[test]
    fn unknown_sender_has_zero_balance() {
        let (mut store, _) = store_with_genesis();
        let err = store.add_transaction(tx("t1", N2, N1, 1)).unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation(ValidationError::InsufficientBalance(N2.to_string()))
        );
    }

    #[test]
    fn extending_block_applies_transfer_and_drains_pool() {
        let (mut store, genesis) = store_with_genesis();
        let t = tx("t1", N1, N2, 30);
        store.add_transaction(t.clone()).unwrap();

        let block = block_on(&genesis, N1, "1", vec![t]);
        assert_eq!(store.add_block(block.clone()).unwrap(), AddOutcome::Added);

        assert_eq!(store.balances().get(N1), Some(&70));
        assert_eq!(store.balances().get(N2), Some(&30));
        assert!(store.pending_transactions().is_empty());
        assert_eq!(store.chain_height(), 1);
        assert_eq!(store.head(), Some(block.hash.as_str()));
        assert_eq!(total_balance(&store), 100);
    }

    #[test]
    fn duplicate_block_is_a_no_op() {
        let (mut store, genesis) = store_with_genesis();
        let block = block_on(&genesis, N1, "1", vec![tx("t1", N1, N2, 30)]);
        store.add_block(block.clone()).unwrap();
        let balances = store.balances();
        let head = store.head().map(str::to_string);

        assert_eq!(store.add_block(block).unwrap(), AddOutcome::AlreadyKnown);
        assert_eq!(store.balances(), balances);
        assert_eq!(store.head().map(str::to_string), head);
    }

    #[test]
    fn block_with_overdraft_transaction_rejected() {
        let (mut store, genesis) = store_with_genesis();
        let block = block_on(&genesis, N1, "1", vec![tx("t1", N1, N2, 500)]);
        assert!(store.add_block(block).is_err());
        assert_eq!(store.chain_height(), 0);
        assert_eq!(store.balances().get(N1), Some(&100));
    }

    #[test]
    fn block_ordering_within_block_is_respected() {
        // N2 has nothing until the first transaction lands, then spends it.
        let (mut store, genesis) = store_with_genesis();
        let block = block_on(
            &genesis,
            N1,
            "1",
            vec![tx("t1", N1, N2, 40), tx("t2", N2, N3, 25)],
        );
        store.add_block(block).unwrap();
        assert_eq!(store.balances().get(N1), Some(&60));
        assert_eq!(store.balances().get(N2), Some(&15));
        assert_eq!(store.balances().get(N3), Some(&25));
    }

    #[test]
    fn tampered_block_hash_rejected() {
        let (mut store, genesis) = store_with_genesis();
        let mut block = block_on(&genesis, N1, "1", vec![]);
        block.hash = ember_core::ZERO_HASH.to_string();
        assert_eq!(
            store.add_block(block).unwrap_err(),
            StoreError::Validation(ValidationError::HashMismatch)
        );
    }

    #[test]
    fn pow_difficulty_enforced() {
        let mut store = Inventory::new(4);
        let genesis = Inventory::genesis_block(N1, 1_700_000_000_000);
        let parent = genesis.hash.clone();
        store.add_block(genesis).unwrap();

        // An honest hash that almost certainly lacks four leading zeros.
        let block = block_on(&parent, N1, "1", vec![]);
        if !ember_core::meets_difficulty(&block.hash, 4) {
            assert_eq!(
                store.add_block(block).unwrap_err(),
                StoreError::Validation(ValidationError::InsufficientPow)
            );
        }
    }

    #[test]
    fn equal_height_fork_resolves_to_lexicographic_minimum() {
        let (mut store, genesis) = store_with_genesis();
        let a = block_on(&genesis, N1, "1", vec![tx("ta", N1, N2, 10)]);
        let b = block_on(&genesis, N2, "2", vec![tx("tb", N1, N3, 20)]);
        let winner = if a.hash < b.hash { a.clone() } else { b.clone() };
        let loser = if a.hash < b.hash { b.clone() } else { a.clone() };

        store.add_block(a).unwrap();
        store.add_block(b).unwrap();

        assert_eq!(store.head(), Some(winner.hash.as_str()));
        assert!(store.block(&loser.hash).is_some());
        let chain: Vec<String> = store.main_chain().iter().map(|b| b.hash.clone()).collect();
        assert!(!chain.contains(&loser.hash));
        assert_eq!(store.consensus_view().forked_blocks, 1);

        // Balances reflect only the winning branch.
        let spent = winner.transactions[0].amount as i64;
        let to = winner.transactions[0].receiver.clone();
        assert_eq!(store.balances().get(N1), Some(&(100 - spent)));
        assert_eq!(store.balances().get(&to), Some(&spent));
        assert_eq!(total_balance(&store), 100);
    }

    #[test]
    fn longer_branch_wins_and_restores_pending() {
        let (mut store, genesis) = store_with_genesis();

        // Branch A: one block spending t1.
        let t1 = tx("t1", N1, N2, 30);
        store.add_transaction(t1.clone()).unwrap();
        let a1 = block_on(&genesis, N1, "10", vec![t1.clone()]);
        store.add_block(a1.clone()).unwrap();
        assert_eq!(store.head(), Some(a1.hash.as_str()));

        // Branch B: two empty blocks off genesis.
        let b1 = block_on(&genesis, N2, "20", vec![]);
        let b2 = block_on(&b1.hash, N2, "21", vec![]);
        store.add_block(b1).unwrap();
        store.add_block(b2.clone()).unwrap();

        assert_eq!(store.head(), Some(b2.hash.as_str()));
        assert_eq!(store.chain_height(), 2);
        // The abandoned transfer is rolled back and returned to the pool.
        assert_eq!(store.balances().get(N1), Some(&100));
        assert_eq!(store.balances().get(N2).copied().unwrap_or(0), 0);
        assert_eq!(store.pending_transactions(), vec![t1]);
        assert_eq!(total_balance(&store), 100);
    }

    #[test]
    fn reorg_does_not_restore_transactions_present_on_new_branch() {
        let (mut store, genesis) = store_with_genesis();
        let t1 = tx("t1", N1, N2, 30);

        let a1 = block_on(&genesis, N1, "10", vec![t1.clone()]);
        store.add_block(a1).unwrap();

        // The competing branch also includes t1 and grows longer.
        let b1 = block_on(&genesis, N2, "20", vec![t1.clone()]);
        let b2 = block_on(&b1.hash, N2, "21", vec![]);
        store.add_block(b1).unwrap();
        store.add_block(b2.clone()).unwrap();

        assert_eq!(store.head(), Some(b2.hash.as_str()));
        assert!(store.pending_transactions().is_empty());
        assert_eq!(store.balances().get(N1), Some(&70));
        assert_eq!(store.balances().get(N2), Some(&30));
        assert_eq!(total_balance(&store), 100);
    }

    #[test]
    fn zero_parent_block_roots_an_empty_chain() {
        let mut store = Inventory::new(0);
        let root = block_on(ZERO_HASH, N1, "1", vec![]);
        assert_eq!(store.add_block(root.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(store.head(), Some(root.hash.as_str()));
        assert_eq!(store.chain_height(), 0);

        // The root extends like any other chain tip.
        let child = block_on(&root.hash, N1, "2", vec![]);
        store.add_block(child.clone()).unwrap();
        assert_eq!(store.head(), Some(child.hash.as_str()));
        assert_eq!(store.chain_height(), 1);
    }

    #[test]
    fn zero_parent_orphan_connects_when_rooting_block_arrives() {
        // Descendants queued before the root arrives still flush.
        let mut store = Inventory::new(0);
        let root = block_on(ZERO_HASH, N1, "1", vec![]);
        let child = block_on(&root.hash, N1, "2", vec![]);

        assert_eq!(store.add_block(child.clone()).unwrap(), AddOutcome::Orphaned);
        assert_eq!(store.add_block(root).unwrap(), AddOutcome::Added);
        assert_eq!(store.head(), Some(child.hash.as_str()));
        assert_eq!(store.chain_height(), 1);
    }

    #[test]
    fn zero_parent_block_rejected_once_rooted() {
        let (mut store, _) = store_with_genesis();
        let stray = block_on(ZERO_HASH, N2, "9", vec![]);
        assert_eq!(store.add_block(stray).unwrap_err(), StoreError::RootExists);
        assert_eq!(store.chain_height(), 0);
        assert_eq!(store.consensus_view().total_blocks, 1);
    }

    #[test]
    fn orphan_connects_when_parent_arrives() {
        let (mut store, genesis) = store_with_genesis();
        let parent = block_on(&genesis, N1, "1", vec![]);
        let child = block_on(&parent.hash, N1, "2", vec![]);

        assert_eq!(store.add_block(child.clone()).unwrap(), AddOutcome::Orphaned);
        assert!(store.block(&child.hash).is_none());
        assert_eq!(store.chain_height(), 0);

        assert_eq!(store.add_block(parent.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(store.head(), Some(child.hash.as_str()));
        assert_eq!(store.chain_height(), 2);
    }

    #[test]
    fn orphan_chain_connects_recursively() {
        let (mut store, genesis) = store_with_genesis();
        let b1 = block_on(&genesis, N1, "1", vec![]);
        let b2 = block_on(&b1.hash, N1, "2", vec![]);
        let b3 = block_on(&b2.hash, N1, "3", vec![]);

        store.add_block(b3.clone()).unwrap();
        store.add_block(b2).unwrap();
        assert_eq!(store.chain_height(), 0);
        store.add_block(b1).unwrap();
        assert_eq!(store.head(), Some(b3.hash.as_str()));
        assert_eq!(store.chain_height(), 3);
    }

    #[test]
    fn consensus_view_counts_forks() {
        let (mut store, genesis) = store_with_genesis();
        let a = block_on(&genesis, N1, "1", vec![]);
        let b = block_on(&genesis, N2, "2", vec![]);
        store.add_block(a).unwrap();
        store.add_block(b).unwrap();

        let view = store.consensus_view();
        assert_eq!(view.chain_height, 1);
        assert_eq!(view.total_blocks, 3);
        assert_eq!(view.forked_blocks, 1);
    }

    #[test]
    fn main_chain_walks_from_genesis_to_head() {
        let (mut store, genesis) = store_with_genesis();
        let b1 = block_on(&genesis, N1, "1", vec![]);
        let b2 = block_on(&b1.hash, N1, "2", vec![]);
        store.add_block(b1.clone()).unwrap();
        store.add_block(b2.clone()).unwrap();

        let chain: Vec<String> = store.main_chain().iter().map(|b| b.hash.clone()).collect();
        assert_eq!(chain, vec![genesis, b1.hash, b2.hash]);
    }
}
