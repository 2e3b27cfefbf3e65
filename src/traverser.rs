//! # Traverser
//!
//! A stateful cursor walking parent links from a chosen head back
//! toward genesis. It is a thin convenience over the chain's read path
//! (every hop goes through the header cache) and carries no persistent
//! state of its own.
//!
//! The head header is loaded lazily on first use. Any load failure is
//! latched: once the cursor hits an error it stays terminal, and the
//! error is available through [`Traverser::error`].

use std::sync::Arc;

use crate::block::{BlockHeader, BlockId};
use crate::chain::Chain;
use crate::error::ChainError;
use crate::kv::Store;

/// Cursor over the ancestor chain of `head_id`.
pub struct Traverser<'a, S: Store> {
    chain: &'a Chain<S>,
    head_id: BlockId,
    current: Option<Arc<BlockHeader>>,
    error: Option<ChainError>,
}

impl<'a, S: Store> Traverser<'a, S> {
    pub(crate) fn new(chain: &'a Chain<S>, head_id: BlockId) -> Self {
        Self {
            chain,
            head_id,
            current: None,
            error: None,
        }
    }

    /// The most recently visited header, the head on first call.
    /// `None` once an error has latched.
    pub fn current(&mut self) -> Option<&BlockHeader> {
        self.ensure_current();
        self.current.as_deref()
    }

    /// `true` while the current block is not genesis and its parent is
    /// loadable. Probing the parent goes through the header cache, so
    /// a following [`Traverser::next`] is a hit.
    pub fn has_next(&mut self) -> bool {
        self.ensure_current();
        if self.error.is_some() {
            return false;
        }
        let parent_id = match &self.current {
            Some(header) if header.number > 0 => header.parent_id,
            _ => return false,
        };
        match self.chain.get_block_header(&parent_id) {
            Ok(_) => true,
            Err(err) => {
                self.error = Some(err);
                false
            }
        }
    }

    /// Advance one parent link and return the new current header, or
    /// `None` at genesis or once an error has latched.
    pub fn next(&mut self) -> Option<Arc<BlockHeader>> {
        self.ensure_current();
        if self.error.is_some() {
            return None;
        }
        let parent_id = match &self.current {
            Some(header) if header.number > 0 => header.parent_id,
            _ => return None,
        };
        match self.chain.get_block_header(&parent_id) {
            Ok(header) => {
                self.current = Some(header.clone());
                Some(header)
            }
            Err(err) => {
                self.error = Some(err);
                None
            }
        }
    }

    /// The latched error, if any hop failed.
    pub fn error(&self) -> Option<&ChainError> {
        self.error.as_ref()
    }

    fn ensure_current(&mut self) {
        if self.current.is_some() || self.error.is_some() {
            return;
        }
        match self.chain.get_block_header(&self.head_id) {
            Ok(header) => self.current = Some(header),
            Err(err) => self.error = Some(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Transaction};
    use crate::kv::SledStore;

    fn make_block(parent: &Block, nonce: u64) -> Block {
        let txs = vec![Transaction::new("nova:alice", "nova:bob", 100, nonce)];
        Block::new(parent, txs, "nova:validator", parent.header.timestamp + 10_000)
    }

    fn chain_with_trunk(len: u64) -> (Chain<SledStore>, Vec<Block>) {
        let chain = Chain::new(SledStore::open_temporary().unwrap()).unwrap();
        let genesis = Block::genesis("nova:v0");
        chain.write_genesis(&genesis).unwrap();

        let mut blocks = vec![genesis];
        for n in 1..=len {
            let block = make_block(blocks.last().unwrap(), n);
            chain.add_block(&block, true).unwrap();
            blocks.push(block);
        }
        (chain, blocks)
    }

    #[test]
    fn walks_head_to_genesis() {
        let (chain, blocks) = chain_with_trunk(3);

        let mut traverser = chain.new_traverser(blocks[3].id());
        assert_eq!(traverser.current().unwrap().id, blocks[3].id());

        let mut visited = vec![traverser.current().unwrap().number];
        while traverser.has_next() {
            let header = traverser.next().unwrap();
            visited.push(header.number);
        }
        assert_eq!(visited, vec![3, 2, 1, 0]);
        assert!(traverser.error().is_none());

        // At genesis the cursor is exhausted.
        assert!(!traverser.has_next());
        assert!(traverser.next().is_none());
        assert_eq!(traverser.current().unwrap().number, 0);
    }

    #[test]
    fn walks_a_side_branch_onto_shared_history() {
        let (chain, blocks) = chain_with_trunk(2);

        let b2_prime = make_block(&blocks[1], 20);
        chain.add_block(&b2_prime, false).unwrap();

        let mut traverser = chain.new_traverser(b2_prime.id());
        assert_eq!(traverser.current().unwrap().id, b2_prime.id());
        assert_eq!(traverser.next().unwrap().id, blocks[1].id());
        assert_eq!(traverser.next().unwrap().id, blocks[0].id());
        assert!(traverser.next().is_none());
    }

    #[test]
    fn unknown_head_latches_an_error() {
        let (chain, _) = chain_with_trunk(1);

        let mut traverser = chain.new_traverser([9u8; 32]);
        assert!(traverser.current().is_none());
        assert!(!traverser.has_next());
        assert!(traverser.next().is_none());
        assert!(traverser.error().unwrap().is_not_found());
    }
}
