use crate::{
    db::StageTx,
    stage::{ExecInput, ExecOutput, Stage, StageId, UnwindInput, UnwindOutput},
    StageError,
};
use hearth_db::{cursor::DbCursorRO, rawdb, tables, Database, DbTx, DbTxMut};
use hearth_engine::ForkValidator;
use hearth_interfaces::HeadersNotifier;
use hearth_primitives::{BlockNumHash, BlockNumber, Bytes, SealedHeader, B256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, trace};

/// The [`StageId`] of the finish stage.
pub const FINISH: StageId = StageId("Finish");

/// The [`StageId`] of the execution stage, whose progress marks the height up
/// to which blocks are fully processed.
pub const EXECUTION: StageId = StageId("Execution");

/// New canonical headers are announced in ranges of at most this many blocks.
const MAX_NOTIFY_SPAN: u64 = 1024;

/// The finish stage.
///
/// Runs at the end of a sync cycle: it copies the head-header pointer to the
/// head-block pointer once execution has caught up, tells the fork validator
/// the new processed height, and publishes the committed head to subscribers
/// (RPC, body downloader).
pub struct FinishStage<DB: Database> {
    fork_validator: Option<Arc<ForkValidator<DB::TXMut>>>,
    head_sender: Option<mpsc::Sender<SealedHeader>>,
    notifier: Option<Arc<dyn HeadersNotifier>>,
    /// The target of the last unwind, so the next announcement restarts from
    /// there instead of only covering the newly advanced range.
    last_unwind_to: Option<BlockNumber>,
}

impl<DB: Database> std::fmt::Debug for FinishStage<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinishStage").finish()
    }
}

impl<DB: Database> Default for FinishStage<DB> {
    fn default() -> Self {
        Self { fork_validator: None, head_sender: None, notifier: None, last_unwind_to: None }
    }
}

impl<DB: Database> FinishStage<DB> {
    /// Creates the finish stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the fork validator to notify of the processed height.
    pub fn with_fork_validator(mut self, fork_validator: Arc<ForkValidator<DB::TXMut>>) -> Self {
        self.fork_validator = Some(fork_validator);
        self
    }

    /// Attaches the channel on which the new head is published. Sends are
    /// non-blocking; a slow subscriber misses heads rather than stalling the
    /// sync loop.
    pub fn with_head_sender(mut self, head_sender: mpsc::Sender<SealedHeader>) -> Self {
        self.head_sender = Some(head_sender);
        self
    }

    /// Attaches the subscriber notified of newly canonical headers.
    pub fn with_notifier(mut self, notifier: Arc<dyn HeadersNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

#[async_trait::async_trait]
impl<DB: Database> Stage<DB> for FinishStage<DB> {
    fn id(&self) -> StageId {
        FINISH
    }

    async fn execute(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        let stage_progress = input.stage_progress.unwrap_or_default();
        let executed_at = EXECUTION.get_progress(&**tx)?.unwrap_or_default();
        if executed_at <= stage_progress {
            return Ok(ExecOutput::done(stage_progress))
        }

        let head_hash = rawdb::read_head_header_hash(&**tx)?.unwrap_or_default();
        rawdb::write_head_block_hash(&**tx, head_hash)?;
        FINISH.save_progress(&**tx, executed_at)?;

        if let Some(fork_validator) = &self.fork_validator {
            fork_validator.notify_current_height(executed_at);
        }

        let head = rawdb::read_header_by_hash(&**tx, head_hash)?;
        if let Some(head) = &head {
            info!(
                target: "sync::stages::finish",
                number = head.number,
                hash = %head.hash(),
                "Sync loop completed"
            );
        }

        if let Some(notifier) = &self.notifier {
            notify_new_headers(
                &**tx,
                stage_progress,
                executed_at,
                self.last_unwind_to.take(),
                notifier.as_ref(),
            )?;
        }

        tx.commit()?;

        if let (Some(sender), Some(head)) = (&self.head_sender, head) {
            // non-blocking on purpose
            let _ = sender.try_send(head);
        }

        Ok(ExecOutput::done(executed_at))
    }

    async fn unwind(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        input: UnwindInput,
    ) -> Result<UnwindOutput, StageError> {
        FINISH.save_progress(&**tx, input.unwind_to)?;
        self.last_unwind_to = Some(input.unwind_to);
        tx.commit()?;
        Ok(UnwindOutput { stage_progress: input.unwind_to })
    }
}

/// Hands the RLP encoding of every header that became canonical during this
/// cycle to the subscriber.
///
/// The announced range spans at most [`MAX_NOTIFY_SPAN`] blocks; after an
/// unwind it restarts from the unwind point so subscribers see the replaced
/// chain.
fn notify_new_headers<Tx: DbTx + DbTxMut>(
    tx: &Tx,
    finish_before: BlockNumber,
    finish_after: BlockNumber,
    unwind_to: Option<BlockNumber>,
    notifier: &dyn HeadersNotifier,
) -> Result<(), StageError> {
    let mut notify_from = match unwind_to {
        Some(unwind_to) if unwind_to != 0 && unwind_to < finish_before => unwind_to,
        _ => finish_after - (finish_after - finish_before).min(MAX_NOTIFY_SPAN),
    };
    notify_from += 1;

    let mut headers_rlp = Vec::new();
    let mut cursor = tx.cursor_read::<tables::Headers>()?;
    let mut entry = cursor.seek(BlockNumHash(notify_from, B256::ZERO))?;
    while let Some((key, header)) = entry {
        if rawdb::read_canonical_hash(tx, key.number())? == Some(key.hash()) {
            headers_rlp.push(Bytes::from(alloy_rlp::encode(&header)));
        }
        entry = cursor.next()?;
    }

    trace!(
        target: "sync::stages::finish",
        from = notify_from,
        count = headers_rlp.len(),
        "Notifying subscribers of new canonical headers"
    );
    notifier.on_new_headers(headers_rlp);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use alloy_rlp::Decodable;
    use hearth_db::MemDb;
    use hearth_primitives::Header;
    use hearth_interfaces::test_utils::TestHeadersNotifier;

    fn finish_stage(env: &TestEnv) -> FinishStage<MemDb> {
        FinishStage::new().with_fork_validator(env.fork_validator.clone())
    }

    #[tokio::test]
    async fn noop_when_execution_has_not_advanced() {
        let env = TestEnv::new(10);
        env.seed_chain(10);
        env.db.update(|tx| EXECUTION.save_progress(tx, 10).unwrap()).unwrap();

        let mut stage = finish_stage(&env);
        let mut tx = env.stage_tx();
        let out = stage
            .execute(&mut tx, ExecInput { previous_stage: None, stage_progress: Some(10) })
            .await
            .unwrap();
        assert_eq!(out, ExecOutput::done(10));

        env.db
            .view(|tx| assert_eq!(rawdb::read_head_block_hash(tx).unwrap(), None))
            .unwrap();
    }

    #[tokio::test]
    async fn publishes_head_and_notifies_subscribers() {
        let env = TestEnv::new(10);
        let chain = env.seed_chain(10);
        let tip = chain.last().unwrap().clone();
        env.db.update(|tx| EXECUTION.save_progress(tx, 10).unwrap()).unwrap();

        let notifier = Arc::new(TestHeadersNotifier::default());
        let (head_sender, mut head_rx) = mpsc::channel(1);
        let mut stage = finish_stage(&env)
            .with_notifier(notifier.clone())
            .with_head_sender(head_sender);

        let mut tx = env.stage_tx();
        let out = stage
            .execute(&mut tx, ExecInput { previous_stage: None, stage_progress: Some(5) })
            .await
            .unwrap();
        assert_eq!(out, ExecOutput::done(10));

        env.db
            .view(|tx| {
                assert_eq!(rawdb::read_head_block_hash(tx).unwrap(), Some(tip.hash()));
                assert_eq!(FINISH.get_progress(tx).unwrap(), Some(10));
            })
            .unwrap();

        // the head was published without blocking
        assert_eq!(head_rx.try_recv().unwrap().hash(), tip.hash());

        // headers 6..=10 were announced in order
        let announced = notifier.announced();
        assert_eq!(announced.len(), 1);
        let decoded: Vec<Header> = announced[0]
            .iter()
            .map(|rlp| Header::decode(&mut rlp.as_ref()).unwrap())
            .collect();
        let numbers: Vec<_> = decoded.iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![6, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn announcement_restarts_from_the_unwind_point() {
        let env = TestEnv::new(10);
        env.seed_chain(10);
        env.db.update(|tx| EXECUTION.save_progress(tx, 10).unwrap()).unwrap();

        let notifier = Arc::new(TestHeadersNotifier::default());
        let mut stage = finish_stage(&env).with_notifier(notifier.clone());

        let mut tx = env.stage_tx();
        stage
            .unwind(&mut tx, UnwindInput { stage_progress: 9, unwind_to: 3, bad_block: None })
            .await
            .unwrap();
        let out = stage
            .execute(&mut tx, ExecInput { previous_stage: None, stage_progress: Some(9) })
            .await
            .unwrap();
        assert_eq!(out, ExecOutput::done(10));

        let announced = notifier.announced();
        assert_eq!(announced.len(), 1);
        // headers 4..=10: everything above the unwind point is re-announced
        assert_eq!(announced[0].len(), 7);
    }

    #[tokio::test]
    async fn resets_the_fork_validator_staging_state() {
        let env = TestEnv::new(10);
        let chain = env.seed_chain(10);
        env.db.update(|tx| EXECUTION.save_progress(tx, 10).unwrap()).unwrap();

        // stage a speculative head, then let the cycle finish
        let payload =
            hearth_interfaces::test_utils::generators::random_header(11, Some(chain[10].hash()));
        let tx = env.db.tx_mut().unwrap();
        env.fork_validator
            .validate_payload(&tx, &payload, Some(&Default::default()), true)
            .unwrap();
        tx.abort();
        assert_ne!(env.fork_validator.extending_fork_head_hash(), B256::ZERO);

        let mut stage = finish_stage(&env);
        let mut tx = env.stage_tx();
        stage
            .execute(&mut tx, ExecInput { previous_stage: None, stage_progress: Some(5) })
            .await
            .unwrap();

        assert_eq!(env.fork_validator.extending_fork_head_hash(), B256::ZERO);
    }
}
