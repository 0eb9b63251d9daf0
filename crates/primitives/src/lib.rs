#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Commonly used types for the hearth header-processing pipeline.
//!
//! This crate contains the block header primitives, the raw (undecoded) block
//! body, and the chain configuration knobs that decide the Proof-of-Work to
//! Proof-of-Stake transition.

mod block;
mod chain;
mod header;

pub use block::{RawBody, SealedBlock};
pub use chain::ChainConfig;
pub use header::{Header, SealedHeader};

pub use alloy_primitives::{keccak256, Bytes, B256, U256};

/// A block number.
pub type BlockNumber = u64;

/// A block hash.
pub type BlockHash = B256;

/// The number of a block paired with its hash.
///
/// This is the composite key used by the header, total-difficulty and body
/// tables: sorting by the encoded form orders entries by block number first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockNumHash(pub BlockNumber, pub BlockHash);

impl BlockNumHash {
    /// Returns the block number.
    pub const fn number(&self) -> BlockNumber {
        self.0
    }

    /// Returns the block hash.
    pub const fn hash(&self) -> BlockHash {
        self.1
    }
}

impl From<(BlockNumber, BlockHash)> for BlockNumHash {
    fn from((number, hash): (BlockNumber, BlockHash)) -> Self {
        Self(number, hash)
    }
}
