//! # Persistence Codec
//!
//! Key layout and record encoding for everything the chain index puts
//! into the key-value store. Each key family gets a one-byte prefix
//! followed by its natural key bytes; numbers inside keys are
//! big-endian so lexicographic order equals numeric order.
//!
//! ## Key Layout
//!
//! | Prefix | Key              | Value                      |
//! |--------|------------------|----------------------------|
//! | `h`    | block id (32B)   | `bincode(BlockHeader)`     |
//! | `b`    | block id (32B)   | `bincode(Body)`            |
//! | `r`    | block id (32B)   | `bincode(Vec<Receipt>)`    |
//! | `t`    | tx id (32B)      | `bincode(TxLocation)`      |
//! | `n`    | number (4B BE)   | block id (32B raw)         |
//! | `B`    | (none)           | best block id (32B raw)    |
//!
//! Mutating operations record into a [`Batch`]; the chain layer decides
//! when the batch commits. Loads surface the store's not-found signal
//! unchanged so the caller's `is_not_found` classification works.

use serde::{Deserialize, Serialize};

use crate::block::{number_of, Block, BlockHeader, BlockId, Body, Receipts, Transaction, TxId};
use crate::error::Result;
use crate::kv::{Batch, Store, StoreError};

const HEADER_PREFIX: u8 = b'h';
const BODY_PREFIX: u8 = b'b';
const RECEIPTS_PREFIX: u8 = b'r';
const TX_LOCATION_PREFIX: u8 = b't';
const TRUNK_PREFIX: u8 = b'n';
const BEST_BLOCK_KEY: &[u8] = b"B";

// ---------------------------------------------------------------------------
// TxLocation
// ---------------------------------------------------------------------------

/// Where a transaction lives on the trunk: the containing block and the
/// transaction's position inside that block's body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    /// Id of the containing block.
    pub block_id: BlockId,
    /// Position within the block body.
    pub index: u64,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

fn id_key(prefix: u8, id: &[u8; 32]) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = prefix;
    key[1..].copy_from_slice(id);
    key
}

fn trunk_key(number: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = TRUNK_PREFIX;
    key[1..].copy_from_slice(&number.to_be_bytes());
    key
}

fn decode_id(raw: &[u8]) -> Result<[u8; 32]> {
    raw.try_into()
        .map_err(|_| crate::error::ChainError::Codec(format!("expected 32-byte id, got {} bytes", raw.len())))
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Record a block's header and body into the batch. The two records
/// share the batch so they commit together; a header without its body
/// (or the reverse) can never be observed.
pub fn save_block(batch: &mut Batch, block: &Block) -> Result<()> {
    let id = block.id();
    batch.put(id_key(HEADER_PREFIX, &id), bincode::serialize(&block.header)?);
    batch.put(id_key(BODY_PREFIX, &id), bincode::serialize(&block.body)?);
    Ok(())
}

/// Load a block header by id.
pub fn load_block_header<S: Store>(store: &S, id: &BlockId) -> Result<BlockHeader> {
    let raw = store.get(&id_key(HEADER_PREFIX, id))?;
    Ok(bincode::deserialize(&raw)?)
}

/// Load a block body by id.
pub fn load_block_body<S: Store>(store: &S, id: &BlockId) -> Result<Body> {
    let raw = store.get(&id_key(BODY_PREFIX, id))?;
    Ok(bincode::deserialize(&raw)?)
}

// ---------------------------------------------------------------------------
// Transaction locations
// ---------------------------------------------------------------------------

/// Record a trunk location for every transaction of a block.
pub fn save_tx_locations(batch: &mut Batch, txs: &[Transaction], block_id: &BlockId) -> Result<()> {
    for (index, tx) in txs.iter().enumerate() {
        let loc = TxLocation {
            block_id: *block_id,
            index: index as u64,
        };
        batch.put(id_key(TX_LOCATION_PREFIX, &tx.id), bincode::serialize(&loc)?);
    }
    Ok(())
}

/// Erase the trunk locations of the given transactions.
pub fn erase_tx_locations(batch: &mut Batch, txs: &[Transaction]) {
    for tx in txs {
        batch.delete(id_key(TX_LOCATION_PREFIX, &tx.id));
    }
}

/// Load the trunk location of a transaction.
pub fn load_tx_location<S: Store>(store: &S, tx_id: &TxId) -> Result<TxLocation> {
    let raw = store.get(&id_key(TX_LOCATION_PREFIX, tx_id))?;
    Ok(bincode::deserialize(&raw)?)
}

// ---------------------------------------------------------------------------
// Trunk index
// ---------------------------------------------------------------------------

/// Record a trunk entry for the block id. The number is derived from
/// the id itself, so the caller cannot file a block under the wrong
/// height.
pub fn save_trunk_block_id(batch: &mut Batch, id: &BlockId) {
    batch.put(trunk_key(number_of(id)), id.to_vec());
}

/// Erase the trunk entry held by the block id's number.
pub fn erase_trunk_block_id(batch: &mut Batch, id: &BlockId) {
    batch.delete(trunk_key(number_of(id)));
}

/// Load the trunk block id at the given number.
pub fn load_trunk_block_id<S: Store>(store: &S, number: u32) -> Result<BlockId> {
    let raw = store.get(&trunk_key(number))?;
    decode_id(&raw)
}

// ---------------------------------------------------------------------------
// Best block pointer
// ---------------------------------------------------------------------------

/// Record the trunk head pointer.
pub fn save_best_block_id(batch: &mut Batch, id: &BlockId) {
    batch.put(BEST_BLOCK_KEY.to_vec(), id.to_vec());
}

/// Load the trunk head pointer.
pub fn load_best_block_id<S: Store>(store: &S) -> Result<BlockId> {
    let raw = store.get(BEST_BLOCK_KEY)?;
    decode_id(&raw)
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Record a block's receipt vector into the batch.
pub fn save_block_receipts(batch: &mut Batch, block_id: &BlockId, receipts: &Receipts) -> Result<()> {
    batch.put(id_key(RECEIPTS_PREFIX, block_id), bincode::serialize(receipts)?);
    Ok(())
}

/// Load a block's receipt vector.
pub fn load_block_receipts<S: Store>(store: &S, block_id: &BlockId) -> Result<Receipts> {
    let raw = store.get(&id_key(RECEIPTS_PREFIX, block_id))?;
    Ok(bincode::deserialize(&raw)?)
}

/// Probe whether a key family has an entry without decoding it.
pub(crate) fn has_block_header<S: Store>(store: &S, id: &BlockId) -> Result<bool> {
    match store.get(&id_key(HEADER_PREFIX, id)) {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Receipt;
    use crate::kv::SledStore;

    fn make_test_tx(nonce: u64) -> Transaction {
        Transaction::new("nova:alice", "nova:bob", 100, nonce)
    }

    fn make_block(txs: Vec<Transaction>) -> Block {
        let genesis = Block::genesis("nova:v0");
        Block::new(&genesis, txs, "nova:v1", 1_000)
    }

    #[test]
    fn block_roundtrip_is_bit_for_bit() {
        let store = SledStore::open_temporary().unwrap();
        let block = make_block(vec![make_test_tx(1), make_test_tx(2)]);

        let mut batch = Batch::new();
        save_block(&mut batch, &block).unwrap();
        store.write(batch).unwrap();

        let header = load_block_header(&store, &block.id()).unwrap();
        let body = load_block_body(&store, &block.id()).unwrap();
        assert_eq!(Block::compose(header, body.transactions), block);
    }

    #[test]
    fn header_and_body_are_separate_records() {
        let store = SledStore::open_temporary().unwrap();
        let block = make_block(vec![make_test_tx(1)]);

        let mut batch = Batch::new();
        save_block(&mut batch, &block).unwrap();
        store.write(batch).unwrap();

        // Header loads alone, without decoding the body.
        let header = load_block_header(&store, &block.id()).unwrap();
        assert_eq!(header, block.header);
    }

    #[test]
    fn missing_block_surfaces_not_found() {
        let store = SledStore::open_temporary().unwrap();
        let err = load_block_header(&store, &[9u8; 32]).unwrap_err();
        assert!(err.is_not_found());
        let err = load_block_body(&store, &[9u8; 32]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn tx_location_roundtrip() {
        let store = SledStore::open_temporary().unwrap();
        let txs = vec![make_test_tx(1), make_test_tx(2), make_test_tx(3)];
        let block = make_block(txs.clone());

        let mut batch = Batch::new();
        save_tx_locations(&mut batch, &txs, &block.id()).unwrap();
        store.write(batch).unwrap();

        for (index, tx) in txs.iter().enumerate() {
            let loc = load_tx_location(&store, &tx.id).unwrap();
            assert_eq!(loc.block_id, block.id());
            assert_eq!(loc.index, index as u64);
        }
    }

    #[test]
    fn erase_tx_locations_deletes_rows() {
        let store = SledStore::open_temporary().unwrap();
        let txs = vec![make_test_tx(1), make_test_tx(2)];
        let block = make_block(txs.clone());

        let mut batch = Batch::new();
        save_tx_locations(&mut batch, &txs, &block.id()).unwrap();
        store.write(batch).unwrap();

        let mut batch = Batch::new();
        erase_tx_locations(&mut batch, &txs);
        store.write(batch).unwrap();

        for tx in &txs {
            assert!(load_tx_location(&store, &tx.id).unwrap_err().is_not_found());
        }
    }

    #[test]
    fn trunk_entry_derives_number_from_id() {
        let store = SledStore::open_temporary().unwrap();
        let block = make_block(vec![]);

        let mut batch = Batch::new();
        save_trunk_block_id(&mut batch, &block.id());
        store.write(batch).unwrap();

        assert_eq!(load_trunk_block_id(&store, 1).unwrap(), block.id());
        assert!(load_trunk_block_id(&store, 2).unwrap_err().is_not_found());

        let mut batch = Batch::new();
        erase_trunk_block_id(&mut batch, &block.id());
        store.write(batch).unwrap();
        assert!(load_trunk_block_id(&store, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn best_block_pointer_roundtrip() {
        let store = SledStore::open_temporary().unwrap();
        assert!(load_best_block_id(&store).unwrap_err().is_not_found());

        let block = make_block(vec![]);
        let mut batch = Batch::new();
        save_best_block_id(&mut batch, &block.id());
        store.write(batch).unwrap();

        assert_eq!(load_best_block_id(&store).unwrap(), block.id());
    }

    #[test]
    fn receipts_roundtrip() {
        let store = SledStore::open_temporary().unwrap();
        let txs = vec![make_test_tx(1), make_test_tx(2)];
        let block = make_block(txs.clone());
        let receipts: Receipts = txs
            .iter()
            .map(|tx| Receipt {
                tx_id: tx.id,
                success: true,
                gas_used: 21_000,
                output: vec![0xAA],
            })
            .collect();

        let mut batch = Batch::new();
        save_block_receipts(&mut batch, &block.id(), &receipts).unwrap();
        store.write(batch).unwrap();

        assert_eq!(load_block_receipts(&store, &block.id()).unwrap(), receipts);
    }

    #[test]
    fn key_families_do_not_collide() {
        let store = SledStore::open_temporary().unwrap();
        let block = make_block(vec![make_test_tx(1)]);
        let id = block.id();

        let mut batch = Batch::new();
        save_block(&mut batch, &block).unwrap();
        save_block_receipts(&mut batch, &id, &Vec::new()).unwrap();
        store.write(batch).unwrap();

        // Same 32-byte id under three prefixes, three distinct records.
        assert!(load_block_header(&store, &id).is_ok());
        assert!(load_block_body(&store, &id).is_ok());
        assert!(load_block_receipts(&store, &id).is_ok());
        // And no tx-location row appeared for that id.
        assert!(load_tx_location(&store, &id).unwrap_err().is_not_found());
    }
}
