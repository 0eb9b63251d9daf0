use hearth_primitives::{SealedBlock, B256};

/// The state of the fork choice supplied by the consensus layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForkchoiceState {
    /// Hash of the head block.
    pub head_block_hash: B256,
    /// Hash of the safe block. Zero when the consensus layer has none.
    pub safe_block_hash: B256,
    /// Hash of the finalized block. Zero when the consensus layer has none.
    pub finalized_block_hash: B256,
}

/// The outcome of processing a payload or forkchoice update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadStatusEnum {
    /// The payload is valid and its state is (or will become) durable.
    Valid,
    /// The payload is invalid; its descendants are poisoned.
    Invalid {
        /// The error that invalidated the payload.
        validation_error: String,
    },
    /// Required data is missing; the node is syncing towards it.
    Syncing,
    /// Not enough information to validate; possibly valid.
    Accepted,
}

impl PayloadStatusEnum {
    /// Returns `true` for [`PayloadStatusEnum::Valid`].
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns `true` for [`PayloadStatusEnum::Invalid`].
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    /// Returns `true` for [`PayloadStatusEnum::Syncing`].
    pub const fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing)
    }

    /// Returns `true` for [`PayloadStatusEnum::Accepted`].
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl std::fmt::Display for PayloadStatusEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => f.write_str("VALID"),
            Self::Invalid { validation_error } => {
                write!(f, "INVALID: {validation_error}")
            }
            Self::Syncing => f.write_str("SYNCING"),
            Self::Accepted => f.write_str("ACCEPTED"),
        }
    }
}

/// The status of a payload, as reported back to the consensus layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadStatus {
    /// The status of the payload.
    pub status: PayloadStatusEnum,
    /// Hash of the most recent valid block in the branch, when known.
    pub latest_valid_hash: Option<B256>,
}

impl PayloadStatus {
    /// Creates a new payload status.
    pub const fn new(status: PayloadStatusEnum, latest_valid_hash: Option<B256>) -> Self {
        Self { status, latest_valid_hash }
    }

    /// Creates a payload status without a latest valid hash.
    pub const fn from_status(status: PayloadStatusEnum) -> Self {
        Self { status, latest_valid_hash: None }
    }

    /// Sets the latest valid hash.
    pub fn with_latest_valid_hash(mut self, hash: B256) -> Self {
        self.latest_valid_hash = Some(hash);
        self
    }
}

/// Errors reported to the consensus layer instead of a payload status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineApiError {
    /// The safe or finalized hash of a forkchoice update does not belong to
    /// the canonical chain.
    #[error("invalid forkchoice state")]
    InvalidForkchoiceState,
    /// The stage failed while handling the request.
    #[error("critical error while handling the request: {0}")]
    Critical(String),
    /// The reply channel consumer is gone.
    #[error("engine reply channel closed")]
    ChannelClosed,
}

/// What the stage sends back through the reply channel.
pub type EngineReply = Result<PayloadStatus, EngineApiError>;

/// A consensus-layer request.
#[derive(Debug, Clone)]
pub enum BeaconMessage {
    /// `engine_forkchoiceUpdated`: choose the chain head.
    ForkChoice(ForkchoiceState),
    /// `engine_newPayload`: validate a candidate block.
    NewPayload(Box<SealedBlock>),
}

/// Whether a queued request is seen for the first time or was put back after
/// data it needed had to be downloaded first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// The request has not been answered yet.
    New,
    /// The request was already answered with `SYNCING`; it stays queued so
    /// the stage retries it once the downloaded data has landed.
    DataWasMissing,
}

/// A [`BeaconMessage`] paired with its processing status.
#[derive(Debug, Clone)]
pub struct BeaconRequest {
    /// The queued message.
    pub message: BeaconMessage,
    /// The processing status.
    pub status: RequestStatus,
}

/// Out-of-band event delivered through the request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interrupt {
    /// No interrupt.
    #[default]
    None,
    /// The node is shutting down.
    Stopping,
    /// The PoS downloader finished fetching headers.
    Synced,
}
