//! # Key-Value Store Contract
//!
//! The chain index runs over a flat key-value store it does not own.
//! This module defines the contract the index consumes ([`Store`],
//! [`Batch`], [`StoreError`]) and the production backend ([`SledStore`]).
//!
//! ## Atomicity
//!
//! Mutations from a single logical operation (genesis write, block
//! append, reorg) are collected into one [`Batch`] and handed to
//! [`Store::write`]. Either every op in the batch lands or none does.
//! The batch is an ordered op list owned by this crate, so a backend
//! only has to know how to apply puts and deletes atomically.
//!
//! ## Not-found
//!
//! An absent key is an error, not an `Option`: [`StoreError::NotFound`]
//! travels up unchanged and is classified by
//! [`ChainError::is_not_found`](crate::error::ChainError::is_not_found).
//! This keeps the load paths straight-line `?` chains.

use std::path::Path;

use thiserror::Error;

/// Errors produced by a key-value store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key is not present.
    #[error("key not found")]
    NotFound,

    /// The backend failed (I/O, corruption, out of space, ...).
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` if this error is the missing-key sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// One mutation inside a [`Batch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or overwrite `key` with `value`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key` if present.
    Delete { key: Vec<u8> },
}

/// An ordered group of mutations applied atomically by [`Store::write`].
///
/// Later ops win over earlier ones on the same key, matching the
/// behaviour of every batch-capable store this crate targets.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Record a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Number of recorded ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// `true` when no ops have been recorded.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch and return its ops, in insertion order.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The key-value store surface the chain index consumes.
///
/// `put` and `delete` are individually atomic; [`Store::write`] applies
/// a whole [`Batch`] atomically. Implementations must be safe to share
/// across threads; the index serialises its writers above this layer.
pub trait Store: Send + Sync {
    /// Fetch the value at `key`, or `Err(StoreError::NotFound)`.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Insert or overwrite a single key.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Remove a single key. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Apply all ops in `batch` atomically.
    fn write(&self, batch: Batch) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Production [`Store`] backend over sled's default keyspace.
///
/// The chain index tags each key family with a one-byte prefix (see
/// [`crate::persist`]), so a single keyspace is enough; no named trees.
/// Batches map directly onto `sled::Batch`, and every batch write is
/// followed by a flush so a committed reorg survives a crash.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Create a temporary database cleaned up on drop. Ideal for tests:
    /// no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl Store for SledStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self.db.get(key)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StoreError::NotFound),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn write(&self, batch: Batch) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => sled_batch.insert(key, value),
                BatchOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
