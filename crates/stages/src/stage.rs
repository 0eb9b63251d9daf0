use crate::{db::StageTx, StageError};
use hearth_db::{tables, Database, DatabaseError, DbTx, DbTxMut};
use hearth_primitives::{BlockNumber, B256};

/// The ID of a stage, unique within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(pub &'static str);

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StageId {
    /// Reads the last committed progress of this stage.
    pub fn get_progress<Tx: DbTx>(&self, tx: &Tx) -> Result<Option<BlockNumber>, DatabaseError> {
        tx.get::<tables::SyncStage>(self.0.as_bytes().to_vec())
    }

    /// Saves the progress of this stage.
    pub fn save_progress<Tx: DbTxMut>(
        &self,
        tx: &Tx,
        progress: BlockNumber,
    ) -> Result<(), DatabaseError> {
        tx.put::<tables::SyncStage>(self.0.as_bytes().to_vec(), progress)
    }
}

/// Stage execution input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecInput {
    /// The stage that ran before this one and its progress.
    pub previous_stage: Option<(StageId, BlockNumber)>,
    /// The progress of this stage as of the last run.
    pub stage_progress: Option<BlockNumber>,
}

impl ExecInput {
    /// The progress of the preceding stage, zero if there is none.
    pub fn previous_stage_progress(&self) -> BlockNumber {
        self.previous_stage.map(|(_, progress)| progress).unwrap_or_default()
    }
}

/// An unwind requested by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindTo {
    /// The height to retreat to.
    pub block: BlockNumber,
    /// The block that caused the unwind, when it was a bad block.
    pub bad_block: Option<B256>,
}

/// Stage execution output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutput {
    /// The new progress of the stage.
    pub stage_progress: BlockNumber,
    /// Whether the stage is done for this cycle.
    pub done: bool,
    /// Set when the pipeline must unwind before this stage can continue.
    pub unwind_to: Option<UnwindTo>,
}

impl ExecOutput {
    /// Output of a completed cycle at the given progress.
    pub const fn done(stage_progress: BlockNumber) -> Self {
        Self { stage_progress, done: true, unwind_to: None }
    }
}

/// Stage unwind input.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnwindInput {
    /// The current progress of the stage.
    pub stage_progress: BlockNumber,
    /// The height to unwind to.
    pub unwind_to: BlockNumber,
    /// The bad block that triggered the unwind, if any.
    pub bad_block: Option<B256>,
}

/// Stage unwind output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindOutput {
    /// The progress of the stage after the unwind.
    pub stage_progress: BlockNumber,
}

/// A stage is a segmented part of the syncing process of the node.
///
/// Each stage takes care of a well-defined task and persists its results to
/// the database, rolling forward with [`Stage::execute`] and back with
/// [`Stage::unwind`]. Stages run serially as part of a pipeline; the headers
/// stage additionally blocks on the consensus-layer request queue while in
/// PoS mode, which is why execution is asynchronous.
#[async_trait::async_trait]
pub trait Stage<DB: Database>: Send + Sync {
    /// The unique ID of the stage.
    fn id(&self) -> StageId;

    /// Execute the stage.
    async fn execute(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError>;

    /// Unwind the stage.
    async fn unwind(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        input: UnwindInput,
    ) -> Result<UnwindOutput, StageError>;
}
