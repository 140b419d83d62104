//! Block descriptors and the client-side write staging buffer.
//!
//! A file is an ordered list of blocks. Every block lives on a replica chain of
//! chunk servers; index 0 is the chain head that receives client writes and
//! forwards them to the rest of the chain.
//!
//! Submodules:
//! - `buffer`: fixed-capacity staging buffer used by write handles

pub mod buffer;

pub use buffer::WriteBuffer;

use serde::{Deserialize, Serialize};

/// One block of a file together with the chunk servers holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedBlock {
    pub block_id: i64,
    /// Bytes acknowledged by the chain so far; the next chunk starts here.
    pub block_size: i64,
    /// Replica chain, head first.
    pub chains: Vec<String>,
}

impl LocatedBlock {
    pub fn new(block_id: i64, chains: Vec<String>) -> Self {
        Self {
            block_id,
            block_size: 0,
            chains,
        }
    }

    pub fn chain_head(&self) -> Option<&str> {
        self.chains.first().map(String::as_str)
    }

    /// Chain members after the head, in forwarding order.
    pub fn downstream(&self) -> &[String] {
        self.chains.get(1..).unwrap_or(&[])
    }

    /// Record `written` bytes as acknowledged by the chain.
    pub fn advance(&mut self, written: usize) {
        self.block_size += written as i64;
    }
}

/// Block layout of a file as resolved by the name server at open time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatedBlocks {
    pub file_length: i64,
    pub blocks: Vec<LocatedBlock>,
}

impl LocatedBlocks {
    pub fn new(file_length: i64, blocks: Vec<LocatedBlock>) -> Self {
        Self {
            file_length,
            blocks,
        }
    }

    /// The block reads are served from.
    ///
    /// Reads only ever address the first block of the set, and only when that block
    /// has at least one replica. Writers never allocate more than one block per
    /// handle, so every file produced by this client fits.
    pub fn first_readable(&self) -> Option<&LocatedBlock> {
        self.blocks.first().filter(|b| !b.chains.is_empty())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("cs{i}:8825")).collect()
    }

    #[test]
    fn test_downstream_skips_head() {
        let block = LocatedBlock::new(3, chain(3));
        assert_eq!(block.chain_head(), Some("cs0:8825"));
        assert_eq!(block.downstream(), &chain(3)[1..]);

        let single = LocatedBlock::new(4, chain(1));
        assert!(single.downstream().is_empty());

        let empty = LocatedBlock::new(5, Vec::new());
        assert_eq!(empty.chain_head(), None);
        assert!(empty.downstream().is_empty());
    }

    #[test]
    fn test_advance_accumulates() {
        let mut block = LocatedBlock::new(1, chain(2));
        block.advance(256 * 1024);
        block.advance(44 * 1024);
        assert_eq!(block.block_size, 300 * 1024);
    }

    #[test]
    fn test_first_readable_requires_replicas() {
        assert!(LocatedBlocks::default().first_readable().is_none());

        let no_replicas = LocatedBlocks::new(10, vec![LocatedBlock::new(1, Vec::new())]);
        assert!(no_replicas.first_readable().is_none());

        let located = LocatedBlocks::new(
            10,
            vec![
                LocatedBlock::new(1, chain(2)),
                LocatedBlock::new(2, chain(2)),
            ],
        );
        assert_eq!(located.first_readable().map(|b| b.block_id), Some(1));
        assert_eq!(located.len(), 2);
    }
}
