use hearth_db::DatabaseError;
use hearth_engine::{EngineApiError, ForkValidatorError};
use hearth_interfaces::ConsensusError;
use hearth_primitives::{BlockNumber, B256};

/// A stage execution error.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The stage encountered a header that violates consensus rules.
    #[error("stage encountered invalid block {block}: {error}")]
    Validation {
        /// The block that failed validation.
        block: BlockNumber,
        /// The underlying consensus error.
        #[source]
        error: ConsensusError,
    },

    /// The database is missing data the stage relies on.
    #[error(transparent)]
    DatabaseIntegrity(#[from] DatabaseIntegrityError),

    /// The database failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The fork validator hit a critical failure.
    #[error(transparent)]
    ForkValidator(#[from] ForkValidatorError),

    /// The engine reply channel failed.
    #[error(transparent)]
    Engine(#[from] EngineApiError),

    /// The header collector failed.
    #[error("header collector error: {0}")]
    Io(#[from] std::io::Error),

    /// The node received the stopping interrupt.
    #[error("server is stopping")]
    Stopping,
}

/// An inconsistency between tables that should always agree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseIntegrityError {
    /// The canonical hash for a height is missing.
    #[error("no canonical hash for block #{number}")]
    CanonicalHash {
        /// The missing height.
        number: BlockNumber,
    },
    /// A header row is missing.
    #[error("no header for block #{number} ({hash})")]
    Header {
        /// Height of the missing header.
        number: BlockNumber,
        /// Hash of the missing header.
        hash: B256,
    },
    /// A total difficulty row is missing.
    #[error("no total difficulty for block #{number} ({hash})")]
    TotalDifficulty {
        /// Height of the missing row.
        number: BlockNumber,
        /// Hash of the missing row.
        hash: B256,
    },
    /// An ancestor vanished while rewriting the canonical index.
    #[error("ancestor is missing at height #{number} ({hash})")]
    AncestorMissing {
        /// Height of the missing ancestor.
        number: BlockNumber,
        /// Hash of the missing ancestor.
        hash: B256,
    },
}
