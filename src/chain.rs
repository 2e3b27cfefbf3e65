//! # Chain Index
//!
//! The façade through which the rest of a node reads and appends
//! blocks. [`Chain`] layers a fork-aware data model over the flat
//! key-value store: every stored block is reachable by id, while a
//! secondary "trunk" index maps block numbers to the canonical chain
//! and `tx id -> location` rows cover exactly the trunk's transactions.
//!
//! ## Trunk and reorgs
//!
//! Appending a block with `is_trunk = false` just persists it as a
//! side-branch leaf. Appending with `is_trunk = true` walks both heads
//! back to their common ancestor and atomically rewrites the trunk
//! segment above it: trunk entries and transaction locations of the
//! detached blocks are erased, those of the attached blocks written,
//! and the best-block pointer swapped, all in one batch. The
//! transactions that fell off the trunk (and did not reappear on the
//! new one) are returned to the caller, which typically feeds them back
//! into its transaction pool.
//!
//! ## Concurrency
//!
//! One reader-writer lock serialises writers against readers; its
//! guarded value is the in-memory best-block. The four LRU caches are
//! internally synchronised and never written ahead of a batch commit,
//! so a reader that observes a new best-block also observes everything
//! that commit wrote.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::block::{
    number_of, Block, BlockHeader, BlockId, Body, Receipt, Receipts, Transaction, TxId,
};
use crate::cache::Cache;
use crate::error::{ChainError, Result};
use crate::kv::{Batch, Store};
use crate::persist::{self, TxLocation};
use crate::traverser::Traverser;

const HEADER_CACHE_LIMIT: usize = 512;
const BODY_CACHE_LIMIT: usize = 512;
const BLOCK_TX_IDS_CACHE_LIMIT: usize = 1024;
const RECEIPTS_CACHE_LIMIT: usize = 512;

/// The four read caches, one per value family.
struct Caches {
    header: Cache<BlockId, BlockHeader>,
    body: Cache<BlockId, Body>,
    block_tx_ids: Cache<BlockId, HashMap<TxId, usize>>,
    receipts: Cache<BlockId, Receipts>,
}

impl Caches {
    fn new() -> Self {
        Self {
            header: Cache::new(HEADER_CACHE_LIMIT),
            body: Cache::new(BODY_CACHE_LIMIT),
            block_tx_ids: Cache::new(BLOCK_TX_IDS_CACHE_LIMIT),
            receipts: Cache::new(RECEIPTS_CACHE_LIMIT),
        }
    }
}

/// A persistent, thread-safe block chain index.
///
/// All public mutating operations hold the writer lock for their whole
/// duration, batch commit included; all public reads hold the reader
/// lock. The store is a borrowed collaborator: `Chain` neither opens
/// nor closes it.
pub struct Chain<S: Store> {
    store: S,
    cached: Caches,
    /// The single chain lock. The guarded value is the in-memory trunk
    /// head, `None` only while the store holds no genesis yet.
    best: RwLock<Option<Arc<Block>>>,
}

impl<S: Store> Chain<S> {
    /// Create a chain index over `store`.
    ///
    /// The best-block pointer is materialised eagerly here so read
    /// paths never have to mutate it: an empty (pre-genesis) store is
    /// fine, anything else failing to load is an error.
    pub fn new(store: S) -> Result<Self> {
        let chain = Chain {
            store,
            cached: Caches::new(),
            best: RwLock::new(None),
        };
        match persist::load_best_block_id(&chain.store) {
            Ok(id) => {
                let best = chain.block_inner(&id)?;
                *chain.best.write() = Some(Arc::new(best));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        Ok(chain)
    }

    // -- Write path ---------------------------------------------------------

    /// Write the genesis block.
    ///
    /// Compares the given genesis with the stored one if present: an
    /// identical genesis succeeds (idempotent), a different one fails
    /// with [`ChainError::GenesisMismatch`]. On first write the block,
    /// its transaction locations, the trunk entry at number 0 and the
    /// best-block pointer commit in one batch.
    pub fn write_genesis(&self, genesis: &Block) -> Result<()> {
        let mut best = self.best.write();

        match self.block_by_number_inner(0) {
            Ok(existing) => {
                if existing.id() == genesis.id() {
                    Ok(())
                } else {
                    Err(ChainError::GenesisMismatch)
                }
            }
            Err(err) if err.is_not_found() => {
                let mut batch = Batch::new();
                persist::save_block(&mut batch, genesis)?;
                persist::save_tx_locations(&mut batch, genesis.transactions(), &genesis.id())?;
                persist::save_trunk_block_id(&mut batch, &genesis.id());
                persist::save_best_block_id(&mut batch, &genesis.id());
                self.store.write(batch)?;

                *best = Some(Arc::new(genesis.clone()));
                info!(id = %genesis.header.id_hex(), "genesis block written");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Add a new block to the chain.
    ///
    /// Returns immediately with an empty list if the block is already
    /// stored (idempotent). Fails with [`ChainError::ParentMissing`]
    /// when the parent is unknown. With `is_trunk = false` the block is
    /// persisted as a side-branch leaf; with `is_trunk = true` the
    /// trunk is switched over to the new head and the transactions that
    /// dropped off the old trunk are returned.
    pub fn add_block(&self, new_block: &Block, is_trunk: bool) -> Result<Vec<Transaction>> {
        let mut best = self.best.write();

        if persist::has_block_header(&self.store, &new_block.id())? {
            // Block already there.
            return Ok(Vec::new());
        }
        match self.header_inner(&new_block.parent_id()) {
            Ok(_) => {}
            Err(err) if err.is_not_found() => return Err(ChainError::ParentMissing),
            Err(err) => return Err(err),
        }

        let mut batch = Batch::new();
        persist::save_block(&mut batch, new_block)?;

        let mut diff: HashMap<TxId, Transaction> = HashMap::new();
        if is_trunk {
            let old_head = self.best_block_inner(&best)?;
            let (ancestor, old_segment, new_segment) =
                self.trace_back_to_common_ancestor((*old_head).clone(), new_block.clone())?;

            for ob in &old_segment {
                persist::erase_trunk_block_id(&mut batch, &ob.id());
                persist::erase_tx_locations(&mut batch, ob.transactions());
                for tx in ob.transactions() {
                    diff.insert(tx.id, tx.clone());
                }
            }
            for nb in &new_segment {
                persist::save_trunk_block_id(&mut batch, &nb.id());
                persist::save_tx_locations(&mut batch, nb.transactions(), &nb.id())?;
                for tx in nb.transactions() {
                    // Reappearing on the new trunk means the tx never
                    // left the chain, so it is not part of the diff.
                    diff.remove(&tx.id);
                }
            }
            persist::save_best_block_id(&mut batch, &new_block.id());

            if !old_segment.is_empty() {
                info!(
                    ancestor = ancestor.number(),
                    detached = old_segment.len(),
                    attached = new_segment.len(),
                    head = %new_block.header.id_hex(),
                    "trunk reorganized"
                );
            }
        }

        self.store.write(batch)?;

        // Caches and the in-memory head change only after the commit.
        self.cached
            .header
            .insert(new_block.id(), new_block.header.clone());
        self.cached.body.insert(new_block.id(), new_block.body.clone());
        if is_trunk {
            *best = Some(Arc::new(new_block.clone()));
        }
        debug!(
            number = new_block.number(),
            id = %new_block.header.id_hex(),
            trunk = is_trunk,
            "block added"
        );

        Ok(diff.into_values().collect())
    }

    /// Persist the receipt vector of a block.
    ///
    /// The vector must be index-aligned with the block body; a length
    /// mismatch is rejected before anything is written. The receipts
    /// cache is only touched after the store write succeeds, so the
    /// cache can never run ahead of storage.
    pub fn set_block_receipts(&self, block_id: &BlockId, receipts: Receipts) -> Result<()> {
        let _best = self.best.write();

        let body = self.body_inner(block_id)?;
        if body.transactions.len() != receipts.len() {
            return Err(ChainError::ReceiptsMismatch {
                block: hex::encode(block_id),
                expected: body.transactions.len(),
                got: receipts.len(),
            });
        }

        let mut batch = Batch::new();
        persist::save_block_receipts(&mut batch, block_id, &receipts)?;
        self.store.write(batch)?;

        self.cached.receipts.insert(*block_id, receipts);
        debug!(block = %hex::encode(block_id), "block receipts persisted");
        Ok(())
    }

    // -- Read path ----------------------------------------------------------

    /// Get a block header by block id.
    pub fn get_block_header(&self, id: &BlockId) -> Result<Arc<BlockHeader>> {
        let _best = self.best.read();
        self.header_inner(id)
    }

    /// Get a block body by block id.
    pub fn get_block_body(&self, id: &BlockId) -> Result<Arc<Body>> {
        let _best = self.best.read();
        self.body_inner(id)
    }

    /// Get a full block by id, trunk or side branch alike.
    pub fn get_block(&self, id: &BlockId) -> Result<Block> {
        let _best = self.best.read();
        self.block_inner(id)
    }

    /// Get the id of the trunk block at the given number.
    pub fn get_block_id_by_number(&self, number: u32) -> Result<BlockId> {
        let _best = self.best.read();
        persist::load_trunk_block_id(&self.store, number)
    }

    /// Get the trunk block at the given number.
    pub fn get_block_by_number(&self, number: u32) -> Result<Block> {
        let _best = self.best.read();
        self.block_by_number_inner(number)
    }

    /// Get the newest block on the trunk.
    pub fn get_best_block(&self) -> Result<Arc<Block>> {
        let best = self.best.read();
        self.best_block_inner(&best)
    }

    /// Get a transaction on the trunk, together with its location.
    pub fn get_transaction(&self, tx_id: &TxId) -> Result<(Transaction, TxLocation)> {
        let _best = self.best.read();
        self.transaction_inner(tx_id)
    }

    /// Get the receipt vector of a block.
    pub fn get_block_receipts(&self, block_id: &BlockId) -> Result<Arc<Receipts>> {
        let _best = self.best.read();
        self.receipts_inner(block_id)
    }

    /// Get the receipt of a trunk transaction.
    pub fn get_transaction_receipt(&self, tx_id: &TxId) -> Result<Receipt> {
        let _best = self.best.read();

        let (_, loc) = self.transaction_inner(tx_id)?;
        let receipts = self.receipts_inner(&loc.block_id)?;
        let body = self.body_inner(&loc.block_id)?;
        if receipts.len() != body.transactions.len() {
            return Err(ChainError::ReceiptsMismatch {
                block: hex::encode(loc.block_id),
                expected: body.transactions.len(),
                got: receipts.len(),
            });
        }
        Ok(receipts[loc.index as usize].clone())
    }

    /// Find the location of a transaction on the chain ending at
    /// `head_id`, which may be a side branch.
    ///
    /// Blocks on the branch above the common ancestor with the trunk
    /// are searched through their per-block tx-id indexes; below the
    /// ancestor the shared history is the trunk itself, so the
    /// persisted location is authoritative.
    pub fn lookup_transaction(&self, head_id: &BlockId, tx_id: &TxId) -> Result<TxLocation> {
        let best = self.best.read();

        let best_block = self.best_block_inner(&best)?;
        let from = self.block_inner(head_id)?;
        let (ancestor, branch, _) =
            self.trace_back_to_common_ancestor(from, (*best_block).clone())?;

        for block in &branch {
            let ids = self.block_tx_ids_inner(&block.id())?;
            if let Some(&index) = ids.get(tx_id) {
                return Ok(TxLocation {
                    block_id: block.id(),
                    index: index as u64,
                });
            }
        }

        let loc = persist::load_tx_location(&self.store, tx_id)?;
        if number_of(&loc.block_id) <= ancestor.number() {
            return Ok(loc);
        }
        Err(ChainError::NotFound)
    }

    /// Classify an error as "entity absent", unifying the store's
    /// missing-key signal with the indexer's own `NotFound`.
    pub fn is_not_found(&self, err: &ChainError) -> bool {
        err.is_not_found()
    }

    /// Create a cursor walking parent links from `head_id` back toward
    /// genesis.
    pub fn new_traverser(&self, head_id: BlockId) -> Traverser<'_, S> {
        Traverser::new(self, head_id)
    }

    // -- Internals ----------------------------------------------------------
    //
    // The helpers below assume the caller already holds the chain lock
    // in the appropriate mode.

    fn header_inner(&self, id: &BlockId) -> Result<Arc<BlockHeader>> {
        self.cached
            .header
            .get_or_load(id, || persist::load_block_header(&self.store, id))
    }

    fn body_inner(&self, id: &BlockId) -> Result<Arc<Body>> {
        self.cached
            .body
            .get_or_load(id, || persist::load_block_body(&self.store, id))
    }

    fn block_inner(&self, id: &BlockId) -> Result<Block> {
        let header = self.header_inner(id)?;
        let body = self.body_inner(id)?;
        Ok(Block::compose(
            (*header).clone(),
            body.transactions.clone(),
        ))
    }

    fn block_by_number_inner(&self, number: u32) -> Result<Block> {
        let id = persist::load_trunk_block_id(&self.store, number)?;
        self.block_inner(&id)
    }

    /// Resolve the trunk head from the in-memory pointer, falling back
    /// to storage when the pointer is still unset (pre-genesis store at
    /// construction time). The fallback does not populate the pointer:
    /// that would mutate state under a reader lock.
    fn best_block_inner(&self, cached: &Option<Arc<Block>>) -> Result<Arc<Block>> {
        if let Some(best) = cached {
            return Ok(best.clone());
        }
        let id = persist::load_best_block_id(&self.store)?;
        Ok(Arc::new(self.block_inner(&id)?))
    }

    fn transaction_inner(&self, tx_id: &TxId) -> Result<(Transaction, TxLocation)> {
        let loc = persist::load_tx_location(&self.store, tx_id)?;
        let body = self.body_inner(&loc.block_id)?;
        let tx = body
            .transactions
            .get(loc.index as usize)
            .cloned()
            .ok_or_else(|| {
                ChainError::Codec(format!(
                    "tx location index {} out of range for block {}",
                    loc.index,
                    hex::encode(loc.block_id)
                ))
            })?;
        Ok((tx, loc))
    }

    fn block_tx_ids_inner(&self, block_id: &BlockId) -> Result<Arc<HashMap<TxId, usize>>> {
        self.cached.block_tx_ids.get_or_load(block_id, || {
            let body = self.body_inner(block_id)?;
            let mut ids = HashMap::with_capacity(body.transactions.len());
            for (index, tx) in body.transactions.iter().enumerate() {
                ids.insert(tx.id, index);
            }
            Ok(ids)
        })
    }

    fn receipts_inner(&self, block_id: &BlockId) -> Result<Arc<Receipts>> {
        self.cached
            .receipts
            .get_or_load(block_id, || persist::load_block_receipts(&self.store, block_id))
    }

    /// Walk two heads back to their common ancestor.
    ///
    /// ```text
    ///   B1--B2--B3--B4--B5--B6
    ///             \
    ///              b4--b5
    /// ```
    ///
    /// For `(B6, b5)` this returns `(B3, [B6, B5, B4], [b5, b4])`: both
    /// side lists are head-first and exclude the ancestor. A missing
    /// parent link is a fatal integrity error and is surfaced as-is.
    fn trace_back_to_common_ancestor(
        &self,
        mut a: Block,
        mut b: Block,
    ) -> Result<(Block, Vec<Block>, Vec<Block>)> {
        let mut side_a = Vec::new();
        let mut side_b = Vec::new();

        loop {
            if a.number() > b.number() {
                let parent = self.block_inner(&a.parent_id())?;
                side_a.push(std::mem::replace(&mut a, parent));
                continue;
            }
            if a.number() < b.number() {
                let parent = self.block_inner(&b.parent_id())?;
                side_b.push(std::mem::replace(&mut b, parent));
                continue;
            }
            if a.id() == b.id() {
                return Ok((a, side_a, side_b));
            }

            let parent_a = self.block_inner(&a.parent_id())?;
            let parent_b = self.block_inner(&b.parent_id())?;
            side_a.push(std::mem::replace(&mut a, parent_a));
            side_b.push(std::mem::replace(&mut b, parent_b));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
