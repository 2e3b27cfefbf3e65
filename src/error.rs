//! Error types for the chain indexer.
//!
//! Every fallible operation in this crate returns a [`ChainError`].
//! Callers should classify "missing entity" outcomes through
//! [`ChainError::is_not_found`] (or [`crate::chain::Chain::is_not_found`])
//! rather than matching variants directly: the predicate unifies the
//! store's native missing-key signal with the indexer's own `NotFound`.

use thiserror::Error;

use crate::kv::StoreError;

/// Errors that can occur while reading or mutating the chain index.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The requested entity (block, transaction, receipt, location) is
    /// not present in the index.
    #[error("not found")]
    NotFound,

    /// `add_block` was given a block whose parent is not stored.
    #[error("parent missing")]
    ParentMissing,

    /// `write_genesis` was given a genesis block different from the one
    /// already persisted.
    #[error("genesis mismatch")]
    GenesisMismatch,

    /// The underlying key-value store failed. The store's own
    /// not-found sentinel also travels through this variant.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A persisted record failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// A stored receipt vector does not line up with its block body.
    #[error("corrupt receipts for block {block}: {expected} transactions, {got} receipts")]
    ReceiptsMismatch {
        /// Hex-encoded id of the offending block.
        block: String,
        /// Transaction count of the block body.
        expected: usize,
        /// Length of the stored receipt vector.
        got: usize,
    },
}

impl ChainError {
    /// Returns `true` if this error means "the requested entity does
    /// not exist", whether it was raised by the indexer or by the
    /// underlying store.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChainError::NotFound | ChainError::Store(StoreError::NotFound)
        )
    }
}

impl From<bincode::Error> for ChainError {
    fn from(err: bincode::Error) -> Self {
        ChainError::Codec(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChainError>;
