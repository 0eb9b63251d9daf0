use hearth_primitives::{BlockNumber, SealedHeader, B256};

/// Consensus is a protocol that chooses the canonical chain.
///
/// After the Proof-of-Stake transition the seal check is replaced by the PoS
/// structural rules; both live behind this trait so the stage does not care
/// which regime a header belongs to.
#[auto_impl::auto_impl(&, Arc)]
pub trait Consensus: std::fmt::Debug + Send + Sync {
    /// Validates that a standalone header is structurally correct.
    fn validate_header(&self, header: &SealedHeader) -> Result<(), ConsensusError>;

    /// Validates the header against its parent: block number, timestamp and
    /// gas limit increments.
    fn validate_header_against_parent(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError>;
}

/// Consensus errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    /// The block number does not follow the parent.
    #[error("block number {number} does not follow parent number {parent_number}")]
    NumberNotSequential {
        /// The block number of the validated header.
        number: BlockNumber,
        /// The block number of the parent header.
        parent_number: BlockNumber,
    },

    /// The timestamp is not after the parent timestamp.
    #[error("block timestamp {timestamp} is not past the parent timestamp {parent_timestamp}")]
    TimestampIsInPast {
        /// The timestamp of the validated header.
        timestamp: u64,
        /// The timestamp of the parent header.
        parent_timestamp: u64,
    },

    /// The gas used exceeds the gas limit.
    #[error("block used gas ({gas_used}) is greater than the gas limit ({gas_limit})")]
    HeaderGasUsedExceedsGasLimit {
        /// The gas used by the block.
        gas_used: u64,
        /// The gas limit of the block.
        gas_limit: u64,
    },

    /// The difficulty of a post-merge header is not zero.
    #[error("difficulty after the merge is not zero")]
    TheMergeDifficultyIsNotZero,

    /// The nonce of a post-merge header is not zero.
    #[error("nonce after the merge is not zero")]
    TheMergeNonceIsNotZero,

    /// The parent of the header is unknown.
    #[error("block parent [hash={hash}] is not known")]
    ParentUnknown {
        /// Hash of the unknown parent.
        hash: B256,
    },

    /// Catch-all for consensus rules enforced by an external engine.
    #[error("{0}")]
    Other(String),
}
