// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Chain Index
//!
//! The persistent, thread-safe block-chain indexer for NOVA nodes. This
//! crate is the subsystem through which the rest of a node reads and
//! appends blocks, looks up transactions, and persists receipts; it
//! layers a fork-aware data model over a flat key-value store and keeps
//! the canonical chain ("trunk") bookkeeping honest across
//! reorganizations.
//!
//! ## Architecture
//!
//! The modules mirror the dependency order, leaves first:
//!
//! - **kv** -- the key-value store contract the index consumes, plus the
//!   sled-backed production implementation. Atomicity lives here:
//!   every logical mutation is one [`kv::Batch`].
//! - **block** -- blocks, transactions, receipts, and the id scheme
//!   (block numbers are embedded in the first 4 id bytes).
//! - **persist** -- key layout and record codec over the store.
//! - **cache** -- bounded LRU read caches with single-flight loads.
//! - **chain** -- the façade: genesis init, append and reorg, reads,
//!   receipts, all behind one reader-writer lock.
//! - **traverser** -- a parent-link cursor over any chain head.
//!
//! ## What this crate is not
//!
//! No consensus, no transaction validation, no state trie, no
//! networking, no pruning. Those live in their own subsystems; this
//! one only promises that what was committed can be found again, on
//! whichever branch it lives.

pub mod block;
pub mod cache;
pub mod chain;
pub mod error;
pub mod kv;
pub mod persist;
pub mod traverser;

pub use block::{
    compute_tx_root, number_of, Block, BlockHeader, BlockId, Body, Receipt, Receipts,
    Transaction, TxId,
};
pub use chain::Chain;
pub use error::{ChainError, Result};
pub use kv::{Batch, BatchOp, SledStore, Store, StoreError};
pub use persist::TxLocation;
pub use traverser::Traverser;
