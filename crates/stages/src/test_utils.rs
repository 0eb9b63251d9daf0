//! Shared harness for stage tests.

use crate::{db::StageTx, stages::HEADERS};
use hearth_db::{mem::MemTx, rawdb, Database, MemDb};
use hearth_engine::{EngineReply, ForkValidator, HeaderDownload, ValidationError};
use hearth_interfaces::test_utils::{generators::random_header_range, TestConsensus};
use hearth_primitives::{BlockNumber, SealedHeader, B256, U256};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// Everything a headers-stage test needs: an in-memory database, the shared
/// downloader state with its reply channel, a scripted state-transition
/// capability and a toggleable consensus.
pub(crate) struct TestEnv {
    pub(crate) db: MemDb,
    pub(crate) hd: Arc<HeaderDownload>,
    pub(crate) reply_rx: mpsc::Receiver<EngineReply>,
    pub(crate) consensus: Arc<TestConsensus>,
    pub(crate) fork_validator: Arc<ForkValidator<MemTx>>,
    /// Number of times the state-transition capability ran.
    pub(crate) validate_calls: Arc<AtomicUsize>,
    /// Makes the state-transition capability fail when set.
    pub(crate) fail_state_validation: Arc<AtomicBool>,
}

impl TestEnv {
    pub(crate) fn new(current_height: BlockNumber) -> Self {
        let (hd, reply_rx) = HeaderDownload::new();
        let validate_calls = Arc::new(AtomicUsize::new(0));
        let fail_state_validation = Arc::new(AtomicBool::new(false));

        let calls = validate_calls.clone();
        let fail = fail_state_validation.clone();
        let fork_validator = Arc::new(ForkValidator::<MemTx>::new(
            current_height,
            Box::new(move |view, header, body, _, _, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail.load(Ordering::SeqCst) {
                    return Err(ValidationError("mismatched state root".into()))
                }
                // behave like the execution: persist the body so replay and
                // recovery can read it back
                let body = body.cloned().unwrap_or_default();
                rawdb::write_body(view, header.hash(), header.number, &body)
                    .map_err(|err| ValidationError(err.to_string()))
            }),
        ));

        Self {
            db: MemDb::new(),
            hd: Arc::new(hd),
            reply_rx,
            consensus: Arc::new(TestConsensus::default()),
            fork_validator,
            validate_calls,
            fail_state_validation,
        }
    }

    /// Seeds a canonical chain `0..=count`, pointing the head and the stage
    /// progress at the tip. Returns the headers.
    pub(crate) fn seed_chain(&self, count: BlockNumber) -> Vec<SealedHeader> {
        let headers = random_header_range(0..count + 1, B256::ZERO);
        self.db
            .update(|tx| {
                let mut td = U256::ZERO;
                for header in &headers {
                    td += header.difficulty;
                    rawdb::write_header(tx, header).unwrap();
                    rawdb::write_td(tx, header.hash(), header.number, td).unwrap();
                    rawdb::write_canonical_hash(tx, header.number, header.hash()).unwrap();
                }
                rawdb::write_head_header_hash(tx, headers.last().unwrap().hash()).unwrap();
                HEADERS.save_progress(tx, count).unwrap();
            })
            .unwrap();
        headers
    }

    /// Seeds an already-built chain the same way.
    pub(crate) fn seed_headers(&self, headers: &[SealedHeader]) {
        self.db
            .update(|tx| {
                for header in headers {
                    rawdb::write_header(tx, header).unwrap();
                }
            })
            .unwrap();
    }

    pub(crate) fn stage_tx(&self) -> StageTx<'_, MemDb> {
        StageTx::new(&self.db).unwrap()
    }

    /// The committed progress of the headers stage.
    pub(crate) fn progress(&self) -> Option<BlockNumber> {
        self.db.view(|tx| HEADERS.get_progress(tx).unwrap()).unwrap()
    }

    /// Takes the reply waiting in the channel, if any.
    pub(crate) fn take_reply(&mut self) -> Option<EngineReply> {
        self.reply_rx.try_recv().ok()
    }
}
