//! # Block Structure
//!
//! The data model the indexer stores: blocks, their transactions, and
//! the receipts produced when those transactions execute. A block is an
//! immutable `(header, body)` pair linked to its parent by id, forming
//! the chain.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  BlockHeader                                │
//! │  ├── number: u32                            │
//! │  ├── id: [u8; 32]       (see "Block Ids")   │
//! │  ├── parent_id: [u8; 32]                    │
//! │  ├── timestamp: u64                         │
//! │  ├── validator: String                      │
//! │  └── tx_root: [u8; 32]  (Merkle root)       │
//! ├─────────────────────────────────────────────┤
//! │  Body                                       │
//! │  └── transactions: Vec<Transaction>         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Block Ids
//!
//! A block id is 32 bytes: the first 4 bytes are the big-endian block
//! number, the remaining 28 come from the BLAKE3 hash of the header
//! fields. Embedding the number means [`number_of`] can answer "how deep
//! is this block" from the id alone, without touching storage. The
//! common-ancestor walk leans on this constantly.

use serde::{Deserialize, Serialize};

/// 32-byte block identifier. First 4 bytes carry the big-endian number.
pub type BlockId = [u8; 32];

/// 32-byte transaction identifier (BLAKE3 of the signable bytes).
pub type TxId = [u8; 32];

/// Derive the block number from an id without a storage lookup.
pub fn number_of(id: &BlockId) -> u32 {
    u32::from_be_bytes([id[0], id[1], id[2], id[3]])
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Block metadata and chain linkage, everything except the transaction
/// list. The `id` is computed once at construction and never changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number (0-indexed, genesis = 0).
    pub number: u32,
    /// Content id of this block. See the module docs for the layout.
    pub id: BlockId,
    /// Id of the parent block. All zeros for genesis.
    pub parent_id: BlockId,
    /// Unix timestamp (milliseconds) when this block was produced.
    pub timestamp: u64,
    /// NOVA address of the validator that proposed this block.
    pub validator: String,
    /// Merkle root over the transaction ids in the body.
    pub tx_root: [u8; 32],
}

impl BlockHeader {
    /// Return the block id as a hex string.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

/// Compute a block id from its header fields.
///
/// BLAKE3 over `number || parent_id || timestamp || validator ||
/// tx_root`, with the first 4 bytes of the digest overwritten by the
/// big-endian number so [`number_of`] holds.
fn compute_block_id(
    number: u32,
    parent_id: &BlockId,
    timestamp: u64,
    validator: &str,
    tx_root: &[u8; 32],
) -> BlockId {
    let mut preimage = Vec::with_capacity(96);
    preimage.extend_from_slice(&number.to_be_bytes());
    preimage.extend_from_slice(parent_id);
    preimage.extend_from_slice(&timestamp.to_le_bytes());
    preimage.extend_from_slice(validator.as_bytes());
    preimage.extend_from_slice(tx_root);

    let mut id: BlockId = *blake3::hash(&preimage).as_bytes();
    id[..4].copy_from_slice(&number.to_be_bytes());
    id
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A transfer recorded on chain. The id is BLAKE3 over the signable
/// bytes and is fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id: `blake3(sender || receiver || amount || nonce || payload)`.
    pub id: TxId,
    /// Sender's NOVA address.
    pub sender: String,
    /// Receiver's NOVA address.
    pub receiver: String,
    /// Transfer amount in photons (NOVA smallest unit).
    pub amount: u64,
    /// Per-sender sequence number.
    pub nonce: u64,
    /// Optional application payload.
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Build a transaction and compute its id.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: u64,
        nonce: u64,
    ) -> Self {
        Self::with_payload(sender, receiver, amount, nonce, Vec::new())
    }

    /// Build a transaction carrying an application payload.
    pub fn with_payload(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: u64,
        nonce: u64,
        payload: Vec<u8>,
    ) -> Self {
        let sender = sender.into();
        let receiver = receiver.into();

        let mut preimage = Vec::with_capacity(64 + payload.len());
        preimage.extend_from_slice(sender.as_bytes());
        preimage.extend_from_slice(receiver.as_bytes());
        preimage.extend_from_slice(&amount.to_le_bytes());
        preimage.extend_from_slice(&nonce.to_le_bytes());
        preimage.extend_from_slice(&payload);
        let id = *blake3::hash(&preimage).as_bytes();

        Self {
            id,
            sender,
            receiver,
            amount,
            nonce,
            payload,
        }
    }

    /// Return the transaction id as a hex string.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// Execution receipt for one transaction. Receipts are stored per block
/// as a vector aligned by index with the body's transaction list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Id of the transaction this receipt belongs to.
    pub tx_id: TxId,
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas consumed by execution.
    pub gas_used: u64,
    /// Raw execution output.
    pub output: Vec<u8>,
}

/// Per-block receipt vector, index-aligned with the body.
pub type Receipts = Vec<Receipt>;

// ---------------------------------------------------------------------------
// Body / Block
// ---------------------------------------------------------------------------

/// The transaction list of a block. Stored and cached separately from
/// the header so header-only consumers never pay for body decoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Ordered transactions included in the block.
    pub transactions: Vec<Transaction>,
}

/// A full block: header + ordered transaction list. Immutable after
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block metadata and chain linkage.
    pub header: BlockHeader,
    /// Ordered list of transactions included in this block.
    pub body: Body,
}

impl Block {
    /// Construct the genesis block: number 0, zeroed parent id, no
    /// transactions, epoch-zero timestamp.
    pub fn genesis(validator: impl Into<String>) -> Self {
        Self::build(0, [0u8; 32], 0, validator.into(), Vec::new())
    }

    /// Construct a block linked to a parent.
    ///
    /// The timestamp is explicit so construction stays deterministic;
    /// block production, not this crate, decides wall-clock time.
    pub fn new(
        parent: &Block,
        transactions: Vec<Transaction>,
        validator: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self::build(
            parent.header.number + 1,
            parent.header.id,
            timestamp,
            validator.into(),
            transactions,
        )
    }

    fn build(
        number: u32,
        parent_id: BlockId,
        timestamp: u64,
        validator: String,
        transactions: Vec<Transaction>,
    ) -> Self {
        let tx_root = compute_tx_root(&transactions);
        let id = compute_block_id(number, &parent_id, timestamp, &validator, &tx_root);
        Block {
            header: BlockHeader {
                number,
                id,
                parent_id,
                timestamp,
                validator,
                tx_root,
            },
            body: Body { transactions },
        }
    }

    /// Recombine a header and transaction list loaded separately from
    /// storage. The caller vouches that they belong together.
    pub fn compose(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            body: Body { transactions },
        }
    }

    /// Return the block id.
    pub fn id(&self) -> BlockId {
        self.header.id
    }

    /// Return the block number.
    pub fn number(&self) -> u32 {
        self.header.number
    }

    /// Return the parent block id.
    pub fn parent_id(&self) -> BlockId {
        self.header.parent_id
    }

    /// Ordered transactions of this block.
    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }
}

// ---------------------------------------------------------------------------
// Merkle Root
// ---------------------------------------------------------------------------

/// Binary Merkle root over the transaction ids.
///
/// Leaves are the transaction ids (already BLAKE3 digests), internal
/// nodes are `BLAKE3(left || right)` with the duplicate-left strategy
/// for odd levels. An empty list produces an all-zero root.
pub fn compute_tx_root(transactions: &[Transaction]) -> [u8; 32] {
    if transactions.is_empty() {
        return [0u8; 32];
    }

    let mut hashes: Vec<[u8; 32]> = transactions.iter().map(|tx| tx.id).collect();
    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity((hashes.len() + 1) / 2);
        for chunk in hashes.chunks(2) {
            let right = if chunk.len() == 2 { chunk[1] } else { chunk[0] };
            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(&chunk[0]);
            combined.extend_from_slice(&right);
            next_level.push(*blake3::hash(&combined).as_bytes());
        }
        hashes = next_level;
    }
    hashes[0]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_tx(nonce: u64) -> Transaction {
        Transaction::new("nova:alice", "nova:bob", 100, nonce)
    }

    #[test]
    fn genesis_block_properties() {
        let genesis = Block::genesis("nova:v0");
        assert_eq!(genesis.number(), 0);
        assert_eq!(genesis.parent_id(), [0u8; 32]);
        assert_eq!(genesis.header.timestamp, 0);
        assert!(genesis.transactions().is_empty());
    }

    #[test]
    fn genesis_is_deterministic() {
        let g1 = Block::genesis("nova:v0");
        let g2 = Block::genesis("nova:v0");
        assert_eq!(g1.id(), g2.id());
    }

    #[test]
    fn id_embeds_block_number() {
        let genesis = Block::genesis("nova:v0");
        let b1 = Block::new(&genesis, vec![make_test_tx(1)], "nova:v1", 1_000);
        let b2 = Block::new(&b1, vec![], "nova:v2", 2_000);

        assert_eq!(number_of(&genesis.id()), 0);
        assert_eq!(number_of(&b1.id()), 1);
        assert_eq!(number_of(&b2.id()), 2);
        assert_eq!(&b2.id()[..4], &2u32.to_be_bytes());
    }

    #[test]
    fn new_block_links_to_parent() {
        let genesis = Block::genesis("nova:v0");
        let b1 = Block::new(&genesis, vec![], "nova:v1", 1_000);
        assert_eq!(b1.number(), 1);
        assert_eq!(b1.parent_id(), genesis.id());
    }

    #[test]
    fn sibling_blocks_get_distinct_ids() {
        let genesis = Block::genesis("nova:v0");
        let a = Block::new(&genesis, vec![make_test_tx(1)], "nova:v1", 1_000);
        let b = Block::new(&genesis, vec![make_test_tx(2)], "nova:v1", 1_000);
        assert_ne!(a.id(), b.id());
        assert_eq!(number_of(&a.id()), number_of(&b.id()));
    }

    #[test]
    fn transaction_id_is_deterministic() {
        let t1 = make_test_tx(7);
        let t2 = make_test_tx(7);
        assert_eq!(t1.id, t2.id);
        assert_ne!(t1.id, make_test_tx(8).id);
    }

    #[test]
    fn tx_root_empty_is_zero() {
        assert_eq!(compute_tx_root(&[]), [0u8; 32]);
    }

    #[test]
    fn tx_root_order_sensitive() {
        let t1 = make_test_tx(1);
        let t2 = make_test_tx(2);
        let root_12 = compute_tx_root(&[t1.clone(), t2.clone()]);
        let root_21 = compute_tx_root(&[t2, t1]);
        assert_ne!(root_12, root_21);
    }

    #[test]
    fn compose_rebuilds_the_block() {
        let genesis = Block::genesis("nova:v0");
        let block = Block::new(&genesis, vec![make_test_tx(1)], "nova:v1", 1_000);

        let recomposed = Block::compose(block.header.clone(), block.body.transactions.clone());
        assert_eq!(recomposed, block);
    }

    #[test]
    fn bincode_roundtrip() {
        let genesis = Block::genesis("nova:v0");
        let block = Block::new(&genesis, vec![make_test_tx(1), make_test_tx(2)], "nova:v1", 1_000);

        let bytes = bincode::serialize(&block).expect("serialize");
        let recovered: Block = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(recovered, block);
    }
}
