use crate::{
    db::StageTx,
    header_inserter::HeaderInserter,
    stage::{ExecInput, ExecOutput, Stage, StageId, UnwindInput, UnwindOutput, UnwindTo},
    DatabaseIntegrityError, HeadersConfig, StageError,
};
use hearth_db::{cursor::DbCursorRO, rawdb, tables, Database, DbTx, DbTxMut};
use hearth_engine::{
    BeaconMessage, EngineApiError, EngineReply, ForkValidator, ForkchoiceState, HeaderCollector,
    HeaderDownload, Interrupt, PayloadStatus, PayloadStatusEnum, PosDownloadTarget, PosStatus,
    RequestId, RequestStatus,
};
use hearth_etl::decode_entry;
use hearth_interfaces::{BodyDownloader, Consensus, StateChangeAccumulator};
use hearth_primitives::{
    BlockNumHash, BlockNumber, ChainConfig, Header, SealedBlock, SealedHeader, B256, U256,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// The [`StageId`] of the headers stage.
pub const HEADERS: StageId = StageId("Headers");

/// The number of blocks we should be able to re-org sub-second on commodity
/// hardware.
pub const SHORT_POS_REORG_THRESHOLD_BLOCKS: u64 = 10;

/// Payloads closer to the head than this wait briefly for a scheduled
/// download instead of replying `SYNCING` right away.
const CLOSE_TO_HEAD_GAP: u64 = 32;

/// What a request handler produced: an optional reply for the consensus
/// layer and an optional unwind the pipeline must run before the stage can
/// continue.
#[derive(Debug)]
struct Dispatched {
    reply: Option<EngineReply>,
    unwind_to: Option<BlockNumber>,
}

impl Dispatched {
    fn reply(reply: EngineReply) -> Self {
        Self { reply: Some(reply), unwind_to: None }
    }

    fn syncing() -> Self {
        Self::reply(Ok(PayloadStatus::from_status(PayloadStatusEnum::Syncing)))
    }
}

/// The headers stage.
///
/// In PoS mode it drains the consensus-layer request queue: `newPayload`
/// requests are validated (speculatively through the fork validator when the
/// memory overlay is enabled) and `forkchoiceUpdated` requests pick the
/// canonical head, unwinding the pipeline when the chosen head is on a side
/// chain. In PoW mode it drains header batches from the opaque fetcher and
/// follows the heaviest chain until the terminal total difficulty is passed.
///
/// Replies leave the stage in request order, and a `VALID` reply is only
/// released once the state backing it has been committed.
#[derive(Debug)]
pub struct HeadersStage<DB: Database, C: Consensus> {
    hd: Arc<HeaderDownload>,
    consensus: Arc<C>,
    fork_validator: Arc<ForkValidator<DB::TXMut>>,
    body_downloader: Option<Arc<dyn BodyDownloader>>,
    accumulator: Option<Arc<dyn StateChangeAccumulator>>,
    chain_config: ChainConfig,
    config: HeadersConfig,
    /// True until the first cycle completes; the PoS loop lets other stages
    /// drain first and the PoW loop may skip waiting for peers.
    initial_cycle: bool,
    /// Bounded waits and eager head election, for tests.
    test_mode: bool,
}

impl<DB: Database, C: Consensus> HeadersStage<DB, C> {
    /// Creates the headers stage.
    pub fn new(
        hd: Arc<HeaderDownload>,
        consensus: Arc<C>,
        fork_validator: Arc<ForkValidator<DB::TXMut>>,
        chain_config: ChainConfig,
        config: HeadersConfig,
    ) -> Self {
        Self {
            hd,
            consensus,
            fork_validator,
            body_downloader: None,
            accumulator: None,
            chain_config,
            config,
            initial_cycle: true,
            test_mode: false,
        }
    }

    /// Attaches the body-downloader prefetch sink.
    pub fn with_body_downloader(mut self, body_downloader: Arc<dyn BodyDownloader>) -> Self {
        self.body_downloader = Some(body_downloader);
        self
    }

    /// Attaches the txpool accumulator notified of discarded side forks.
    pub fn with_accumulator(mut self, accumulator: Arc<dyn StateChangeAccumulator>) -> Self {
        self.accumulator = Some(accumulator);
        self
    }

    /// Enables test mode: waits are bounded and a bad-block unwind elects the
    /// heaviest tip immediately.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Marks the initial cycle as already done.
    pub fn skip_initial_cycle(mut self) -> Self {
        self.initial_cycle = false;
        self
    }

    async fn execute_inner(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        stage_progress: BlockNumber,
    ) -> Result<ExecOutput, StageError> {
        // some work may be left over from before an unwind
        if let Some((forkchoice, head_height)) = self.hd.unsettled_forkchoice() {
            return self.finish_handling_fork_choice(tx, forkchoice, head_height).await
        }

        let transitioned = self.chain_config.terminal_total_difficulty_passed ||
            match self.chain_config.terminal_total_difficulty {
                Some(ttd) => rawdb::transitioned(&**tx, stage_progress, ttd)?,
                None => false,
            };

        if transitioned {
            self.hd.close_pow_mining();
            self.headers_pos(tx, stage_progress).await
        } else {
            self.headers_pow(tx, stage_progress).await
        }
    }

    /// Processes Proof-of-Stake requests (`newPayload`, `forkchoiceUpdated`)
    /// and saves headers fetched by the PoS downloader.
    async fn headers_pos(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        stage_progress: BlockNumber,
    ) -> Result<ExecOutput, StageError> {
        if self.initial_cycle {
            // let execution and the other stages finish before waiting on the
            // consensus layer
            return Ok(ExecOutput::done(stage_progress))
        }

        if self.hd.pos_status() == PosStatus::Idle {
            info!(target: "sync::stages::headers", "Waiting for Consensus Layer...");
        }
        let (interrupt, request_id, request) = if self.test_mode {
            self.hd.requests.wait_for_request_with_timeout(Duration::from_millis(100)).await
        } else {
            self.hd.requests.wait_for_request().await
        };

        let mut inserter = HeaderInserter::new(stage_progress);

        match interrupt {
            Interrupt::Stopping => {
                self.hd.signal_shutdown();
                return Err(StageError::Stopping)
            }
            Interrupt::Synced => {
                if self.hd.has_collector() {
                    self.verify_and_save_downloaded_pos_headers(tx, &mut inserter)?;
                }
                let progress = self.progress_or(tx, stage_progress)?;
                tx.commit()?;
                return Ok(ExecOutput::done(progress))
            }
            Interrupt::None => {}
        }

        let Some(request) = request else {
            // only happens on the bounded wait in tests
            return Ok(ExecOutput::done(stage_progress))
        };

        self.hd.clear_pending_payload_hash();
        self.hd.set_pending_payload_status(None);

        let request_status = request.status;
        let dispatched = match request.message {
            BeaconMessage::ForkChoice(forkchoice) => {
                self.start_handling_fork_choice(forkchoice, request_status, request_id, tx, &mut inserter)
                    .await
            }
            BeaconMessage::NewPayload(block) => {
                self.handle_new_payload(&block, request_status, request_id, tx, &mut inserter).await
            }
        };
        let dispatched = match dispatched {
            Ok(dispatched) => dispatched,
            Err(err) => {
                if request_status == RequestStatus::New {
                    let _ =
                        self.hd.send_reply(Err(EngineApiError::Critical(err.to_string()))).await;
                }
                return Err(err)
            }
        };

        if request_status == RequestStatus::New {
            if let Some(reply) = dispatched.reply {
                let immediate = match &reply {
                    Ok(status) => status.status.is_syncing() || status.status.is_accepted(),
                    Err(_) => true,
                };
                if immediate {
                    self.hd.send_reply(reply).await?;
                } else {
                    // the reply must not reference uncommitted state
                    self.hd.set_pending_payload_status(Some(reply));
                }
            }
        }

        let progress = self.progress_or(tx, stage_progress)?;
        tx.commit()?;

        if request_status == RequestStatus::New {
            if let Some(reply) = self.hd.take_pending_payload_status() {
                self.hd.send_reply(reply).await?;
            } else if dispatched.unwind_to.is_none() {
                // re-orgs keep their pending hash across the unwind; it is
                // released by finish_handling_fork_choice instead
                if let Some(hash) = self.hd.pending_payload_hash() {
                    self.hd
                        .send_reply(Ok(PayloadStatus::from_status(PayloadStatusEnum::Valid)
                            .with_latest_valid_hash(hash)))
                        .await?;
                    self.hd.clear_pending_payload_hash();
                }
            }
        }

        Ok(ExecOutput {
            stage_progress: progress,
            done: dispatched.unwind_to.is_none(),
            unwind_to: dispatched
                .unwind_to
                .map(|block| UnwindTo { block, bad_block: None }),
        })
    }

    async fn start_handling_fork_choice(
        &mut self,
        forkchoice: ForkchoiceState,
        request_status: RequestStatus,
        request_id: RequestId,
        tx: &StageTx<'_, DB>,
        inserter: &mut HeaderInserter,
    ) -> Result<Dispatched, StageError> {
        let result =
            self.fork_choice_inner(forkchoice, request_status, request_id, tx, inserter).await;
        if self.config.memory_overlay {
            // the forkchoice decided what the head is; any staged fork that
            // was not chosen is obsolete now
            self.fork_validator.clear_with_unwind(&**tx, self.accumulator.as_deref());
        }
        result
    }

    async fn fork_choice_inner(
        &mut self,
        forkchoice: ForkchoiceState,
        request_status: RequestStatus,
        request_id: RequestId,
        tx: &StageTx<'_, DB>,
        inserter: &mut HeaderInserter,
    ) -> Result<Dispatched, StageError> {
        let header_hash = forkchoice.head_block_hash;
        debug!(target: "sync::stages::headers", head = %header_hash, "Handling fork choice");

        let current_head_hash = rawdb::read_head_header_hash(&**tx)?.unwrap_or_default();
        if current_head_hash == header_hash {
            debug!(target: "sync::stages::headers", "Fork choice no-op");
            self.hd.requests.remove(request_id);
            let canonical = write_fork_choice_hashes(&forkchoice, &**tx)?;
            let reply = if canonical {
                Ok(PayloadStatus::from_status(PayloadStatusEnum::Valid)
                    .with_latest_valid_hash(current_head_hash))
            } else {
                Err(EngineApiError::InvalidForkchoiceState)
            };
            return Ok(Dispatched::reply(reply))
        }

        let Some(header) = rawdb::read_header_by_hash(&**tx, header_hash)? else {
            info!(target: "sync::stages::headers", hash = %header_hash, "Fork choice: need to download header");
            self.hd.requests.remove(request_id);
            // header height is unknown, setting it to zero
            self.schedule_pos_download(request_id, header_hash, 0, header_hash)?;
            return Ok(Dispatched::syncing())
        };

        self.hd.requests.remove(request_id);
        let header_number = header.number;

        if self.config.memory_overlay &&
            header_hash == self.fork_validator.extending_fork_head_hash()
        {
            info!(target: "sync::stages::headers", "Flushing in-memory state");
            self.fork_validator.flush_extending_fork(&**tx)?;
            let canonical = write_fork_choice_hashes(&forkchoice, &**tx)?;
            if !canonical {
                return Ok(Dispatched::reply(Err(EngineApiError::InvalidForkchoiceState)))
            }
            fix_canonical_chain(header_number, header_hash, &**tx)?;
            rawdb::write_head_header_hash(&**tx, header_hash)?;
            HEADERS.save_progress(&**tx, header_number)?;
            self.hd.set_pending_payload_hash(header_hash);
            // reply deferred until the commit
            return Ok(Dispatched { reply: None, unwind_to: None })
        }

        let forking_point = inserter.forking_point(&**tx, &header)?;
        info!(
            target: "sync::stages::headers",
            header_number,
            forking_point,
            "Fork choice re-org"
        );

        if request_status == RequestStatus::New {
            if header_number - forking_point <= SHORT_POS_REORG_THRESHOLD_BLOCKS {
                // short re-org: the loop re-enters after the unwind and
                // releases the reply from finish_handling_fork_choice
                self.hd.set_pending_payload_hash(header_hash);
            } else {
                self.hd
                    .send_reply(Ok(PayloadStatus::from_status(PayloadStatusEnum::Syncing)))
                    .await?;
            }
        }

        self.hd.set_unsettled_forkchoice(forkchoice, header_number);
        Ok(Dispatched { reply: None, unwind_to: Some(forking_point) })
    }

    /// Invoked on the next stage entry after the unwind a re-org requested.
    async fn finish_handling_fork_choice(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        forkchoice: ForkchoiceState,
        head_height: BlockNumber,
    ) -> Result<ExecOutput, StageError> {
        info!(
            target: "sync::stages::headers",
            height = head_height,
            head = %forkchoice.head_block_hash,
            "Unsettled forkchoice after unwind"
        );

        fix_canonical_chain(head_height, forkchoice.head_block_hash, &**tx)?;
        rawdb::write_head_header_hash(&**tx, forkchoice.head_block_hash)?;
        let canonical = write_fork_choice_hashes(&forkchoice, &**tx)?;
        HEADERS.save_progress(&**tx, head_height)?;
        tx.commit()?;

        if !canonical {
            if self.hd.pending_payload_hash().is_some() {
                self.hd.send_reply(Err(EngineApiError::InvalidForkchoiceState)).await?;
            }
        } else if let Some(hash) = self.hd.pending_payload_hash() {
            self.hd
                .send_reply(Ok(PayloadStatus::from_status(PayloadStatusEnum::Valid)
                    .with_latest_valid_hash(hash)))
                .await?;
        }
        self.hd.clear_pending_payload_hash();
        self.hd.clear_unsettled_forkchoice();

        Ok(ExecOutput::done(head_height))
    }

    async fn handle_new_payload(
        &mut self,
        block: &SealedBlock,
        request_status: RequestStatus,
        request_id: RequestId,
        tx: &StageTx<'_, DB>,
        inserter: &mut HeaderInserter,
    ) -> Result<Dispatched, StageError> {
        let header = &block.header;
        let header_number = header.number;
        let header_hash = header.hash();
        debug!(target: "sync::stages::headers", height = header_number, hash = %header_hash, "Handling new payload");

        // a bad header, or a descendant of one, is rejected on sight
        if let Some(latest_valid) = self.hd.is_bad_header(header_hash) {
            self.hd.requests.remove(request_id);
            return Ok(Dispatched::reply(Ok(PayloadStatus::new(
                PayloadStatusEnum::Invalid {
                    validation_error: "block was previously marked invalid".into(),
                },
                Some(latest_valid),
            ))))
        }
        if let Some(latest_valid) = self.hd.is_bad_header(header.parent_hash) {
            self.hd.report_bad_header(header_hash, latest_valid);
            self.hd.requests.remove(request_id);
            return Ok(Dispatched::reply(Ok(PayloadStatus::new(
                PayloadStatusEnum::Invalid {
                    validation_error: "block links to a previously rejected block".into(),
                },
                Some(latest_valid),
            ))))
        }

        let mut parent = rawdb::read_header_by_hash(&**tx, header.parent_hash)?;
        if parent.is_none() {
            info!(
                target: "sync::stages::headers",
                height = header_number,
                hash = %header_hash,
                parent = %header.parent_hash,
                "New payload: need to download parent"
            );
            self.hd.requests.remove(request_id);
            if !self.schedule_pos_download(
                request_id,
                header.parent_hash,
                header_number.saturating_sub(1),
                header_hash,
            )? {
                return Ok(Dispatched::syncing())
            }

            let close_to_head = rawdb::read_current_height(&**tx)?
                .map(|current| current.abs_diff(header_number) < CLOSE_TO_HEAD_GAP)
                .unwrap_or(false);
            if !close_to_head {
                return Ok(Dispatched::syncing())
            }

            // close to the head: wait until the download finishes so that
            // full validation can run
            let mut success = false;
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if self.hd.pos_status() == PosStatus::Synced {
                    success = true;
                    break
                }
            }
            if !success {
                return Ok(Dispatched::syncing())
            }
            self.verify_and_save_downloaded_pos_headers(tx, inserter)?;
            parent = rawdb::read_header_by_hash(&**tx, header.parent_hash)?;
            if parent.is_none() {
                return Ok(Dispatched::syncing())
            }
        }

        self.hd.requests.remove(request_id);

        debug!(target: "sync::stages::headers", "New payload begin verification");
        let (reply, success) =
            self.verify_and_save_new_pos_header(request_status, tx, block, parent.as_ref(), inserter)?;
        debug!(target: "sync::stages::headers", success, "New payload verification ended");

        if success {
            if let Some(body_downloader) = &self.body_downloader {
                body_downloader.add_to_prefetch(block);
            }
        }

        Ok(Dispatched { reply, unwind_to: None })
    }

    #[allow(clippy::type_complexity)]
    fn verify_and_save_new_pos_header(
        &mut self,
        request_status: RequestStatus,
        tx: &StageTx<'_, DB>,
        block: &SealedBlock,
        parent: Option<&SealedHeader>,
        inserter: &mut HeaderInserter,
    ) -> Result<(Option<EngineReply>, bool), StageError> {
        let header = &block.header;
        let header_number = header.number;
        let header_hash = header.hash();

        let verification = self.consensus.validate_header(header).and_then(|_| match parent {
            Some(parent) => self.consensus.validate_header_against_parent(header, parent),
            None => Ok(()),
        });
        if let Err(error) = verification {
            warn!(
                target: "sync::stages::headers",
                hash = %header_hash,
                height = header_number,
                %error,
                "Verification failed for header"
            );
            self.hd.report_bad_header(header_hash, header.parent_hash);
            let status = PayloadStatus::new(
                PayloadStatusEnum::Invalid { validation_error: error.to_string() },
                Some(header.parent_hash),
            );
            return Ok((Some(Ok(status)), false))
        }

        let current_head_hash = rawdb::read_head_header_hash(&**tx)?.unwrap_or_default();
        let forking_point = inserter.forking_point(&**tx, header)?;
        let forking_hash = rawdb::read_canonical_hash(&**tx, forking_point)?;
        let can_extend_canonical = forking_hash == Some(current_head_hash);

        if self.config.memory_overlay {
            let extending_hash = self.fork_validator.extending_fork_head_hash();
            let extend_canonical = (extending_hash.is_zero() &&
                header.parent_hash == current_head_hash) ||
                extending_hash == header.parent_hash;
            let payload_status = self.fork_validator.validate_payload(
                &**tx,
                header,
                Some(&block.body),
                extend_canonical,
            )?;
            let success = !payload_status.status.is_invalid();
            if !success {
                warn!(
                    target: "sync::stages::headers",
                    hash = %header_hash,
                    height = header_number,
                    status = %payload_status.status,
                    "Validation failed for header"
                );
                self.hd.report_bad_header(
                    header_hash,
                    payload_status.latest_valid_hash.unwrap_or(header.parent_hash),
                );
            } else {
                inserter.feed_header_pos(&**tx, header)?;
            }
            return Ok((Some(Ok(payload_status)), success))
        }

        inserter.feed_header_pos(&**tx, header)?;

        if !can_extend_canonical {
            info!(
                target: "sync::stages::headers",
                parent = %header.parent_hash,
                current_head = %current_head_hash,
                "Side chain"
            );
            let status = PayloadStatus::from_status(PayloadStatusEnum::Accepted);
            return Ok((Some(Ok(status)), true))
        }

        // we are on the canonical chain
        if request_status == RequestStatus::New {
            self.hd.set_pending_payload_hash(header_hash);
        }
        fix_canonical_chain(inserter.highest(), inserter.highest_hash(), &**tx)?;
        rawdb::write_head_header_hash(&**tx, header_hash)?;
        HEADERS.save_progress(&**tx, header_number)?;

        // reply deferred until the commit
        Ok((None, true))
    }

    /// Schedules an asynchronous download of the chain ending at
    /// `hash_to_download`. Returns `false` when another download is already
    /// in progress.
    fn schedule_pos_download(
        &self,
        request_id: RequestId,
        hash_to_download: B256,
        height_to_download: BlockNumber,
        downloader_tip: B256,
    ) -> Result<bool, StageError> {
        self.hd.requests.set_status(request_id, RequestStatus::DataWasMissing);

        if self.hd.pos_status() != PosStatus::Idle {
            debug!(
                target: "sync::stages::headers",
                height = height_to_download,
                hash = %hash_to_download,
                "Postponing PoS download since another one is in progress"
            );
            return Ok(false)
        }

        info!(
            target: "sync::stages::headers",
            height = height_to_download,
            hash = %hash_to_download,
            request_id,
            "Downloading PoS headers..."
        );

        self.hd.set_pos_target(PosDownloadTarget {
            request_id,
            hash: hash_to_download,
            height: height_to_download,
            tip: downloader_tip,
        });
        self.hd.set_collector(HeaderCollector::new(self.config.collector_buffer_size)?);
        self.hd.set_pos_status(PosStatus::Syncing);
        Ok(true)
    }

    /// Loads the headers the PoS downloader collected, verifying each and
    /// feeding the accepted ones through the inserter.
    fn verify_and_save_downloaded_pos_headers(
        &self,
        tx: &StageTx<'_, DB>,
        inserter: &mut HeaderInserter,
    ) -> Result<(), StageError> {
        let Some(mut collector) = self.hd.take_collector() else { return Ok(()) };
        let target = self.hd.pos_target();

        let mut last_valid_hash = B256::ZERO;
        let outcome = self.load_downloaded_headers(&mut collector, tx, inserter, &mut last_valid_hash);

        let bad_chain = !matches!(outcome, Ok(false));
        if bad_chain {
            if let Some(target) = target {
                warn!(
                    target: "sync::stages::headers",
                    request_id = target.request_id,
                    "Removing beacon request due to a bad downloaded chain"
                );
                self.hd.requests.remove(target.request_id);
                self.hd.report_bad_header(target.tip, last_valid_hash);
            }
        } else {
            info!(target: "sync::stages::headers", fork_head = %last_valid_hash, "PoS headers verified and saved");
        }

        self.hd.set_pos_status(PosStatus::Idle);
        outcome.map(|_| ())
    }

    fn load_downloaded_headers(
        &self,
        collector: &mut HeaderCollector,
        tx: &StageTx<'_, DB>,
        inserter: &mut HeaderInserter,
        last_valid_hash: &mut B256,
    ) -> Result<bool, StageError> {
        let mut bad_chain = false;
        let mut found_pow = false;

        for entry in collector.iter()? {
            let (key, header) =
                decode_entry::<BlockNumHash, Header>(&entry?).map_err(StageError::from)?;
            let header = header.seal(key.hash());

            if bad_chain {
                // everything above the first failure is bad by descent
                self.hd.report_bad_header(header.hash(), *last_valid_hash);
                continue
            }
            *last_valid_hash = header.parent_hash;

            if let Err(error) = self.consensus.validate_header(&header) {
                warn!(
                    target: "sync::stages::headers",
                    hash = %header.hash(),
                    height = header.number,
                    %error,
                    "Verification failed for header"
                );
                self.hd.report_bad_header(header.hash(), *last_valid_hash);
                bad_chain = true;
                continue
            }

            // once in the PoW range, state validation is not required anymore
            if found_pow {
                inserter.feed_header_pos(&**tx, &header)?;
                continue
            }
            found_pow = header.is_pow();
            if found_pow {
                inserter.feed_header_pos(&**tx, &header)?;
                continue
            }

            // validate state if possible; bodies arrive through the body
            // download later
            let status = self.fork_validator.validate_payload(&**tx, &header, None, false)?;
            if status.status.is_invalid() {
                warn!(
                    target: "sync::stages::headers",
                    hash = %header.hash(),
                    height = header.number,
                    status = %status.status,
                    "Validation failed for downloaded header"
                );
                self.hd.report_bad_header(header.hash(), *last_valid_hash);
                bad_chain = true;
                continue
            }

            inserter.feed_header_pos(&**tx, &header)?;
        }

        Ok(bad_chain)
    }

    /// Progresses the headers stage for Proof-of-Work headers.
    async fn headers_pow(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        stage_progress: BlockNumber,
    ) -> Result<ExecOutput, StageError> {
        // straight after an unwind the canonical markers are missing and need
        // to be recreated from the head
        let Some(canonical_hash) = rawdb::read_canonical_hash(&**tx, stage_progress)? else {
            let head_hash = rawdb::read_head_header_hash(&**tx)?.unwrap_or_default();
            if !head_hash.is_zero() {
                fix_canonical_chain(stage_progress, head_hash, &**tx)?;
            }
            tx.commit()?;
            return Ok(ExecOutput::done(stage_progress))
        };

        // allow the other stages to run one cycle if no network is available
        if self.initial_cycle && self.config.no_p2p_discovery {
            return Ok(ExecOutput::done(stage_progress))
        }

        info!(target: "sync::stages::headers", from = stage_progress, "Waiting for headers...");

        let local_td = rawdb::read_td(&**tx, canonical_hash, stage_progress)?.ok_or(
            DatabaseIntegrityError::TotalDifficulty {
                number: stage_progress,
                hash: canonical_hash,
            },
        )?;
        let mut inserter = HeaderInserter::new(stage_progress).with_local_td(local_td);

        let mut inserted = 0usize;
        'batches: while let Some(batch) = self.hd.drain_pow_batch() {
            for header in batch {
                if let Some(ttd) = self.chain_config.terminal_total_difficulty {
                    if inserter.total_difficulty() >= ttd {
                        info!(target: "sync::stages::headers", "Terminal total difficulty passed");
                        break 'batches
                    }
                }
                if let Err(error) = self.consensus.validate_header(&header) {
                    warn!(
                        target: "sync::stages::headers",
                        hash = %header.hash(),
                        height = header.number,
                        %error,
                        "Verification failed for header"
                    );
                    self.hd.report_bad_header(header.hash(), header.parent_hash);
                    return Err(StageError::Validation { block: header.number, error })
                }
                inserter.feed_header_pow(&**tx, &header)?;
                inserted += 1;
                if inserted >= self.config.batch_size {
                    break 'batches
                }
            }
            // react quickly to new chain tips outside of the initial sync
            if inserter.best_header_changed() && !self.initial_cycle {
                break
            }
        }

        if inserter.highest() != 0 {
            if !inserter.unwind() {
                fix_canonical_chain(inserter.highest(), inserter.highest_hash(), &**tx)?;
            }
            rawdb::write_head_header_hash(&**tx, inserter.highest_hash())?;
            HEADERS.save_progress(&**tx, inserter.highest())?;
        }
        tx.commit()?;

        if inserter.unwind() {
            return Ok(ExecOutput {
                stage_progress: inserter.highest().max(stage_progress),
                done: false,
                unwind_to: Some(UnwindTo { block: inserter.unwind_point(), bad_block: None }),
            })
        }

        if inserter.highest() != 0 {
            info!(
                target: "sync::stages::headers",
                highest = inserter.highest(),
                timestamp = inserter.highest_timestamp(),
                "Processed"
            );
        }
        Ok(ExecOutput::done(inserter.highest().max(stage_progress)))
    }

    fn progress_or(
        &self,
        tx: &StageTx<'_, DB>,
        fallback: BlockNumber,
    ) -> Result<BlockNumber, StageError> {
        Ok(HEADERS.get_progress(&**tx)?.unwrap_or(fallback))
    }

    /// Elects the heaviest tip not marked bad, scanning total-difficulty rows
    /// from the top.
    fn heaviest_valid_tip(
        &self,
        tx: &StageTx<'_, DB>,
    ) -> Result<(BlockNumber, B256), StageError> {
        let mut max_td = U256::ZERO;
        let mut best = (0, B256::ZERO);
        let mut cursor = (**tx).cursor_read::<tables::HeaderTD>()?;
        let mut entry = cursor.last()?;
        while let Some((key, td)) = entry {
            if self.hd.is_bad_header(key.hash()).is_none() && td > max_td {
                max_td = td;
                best = (key.number(), key.hash());
            }
            entry = cursor.prev()?;
        }
        Ok(best)
    }
}

#[async_trait::async_trait]
impl<DB: Database, C: Consensus> Stage<DB> for HeadersStage<DB, C> {
    fn id(&self) -> StageId {
        HEADERS
    }

    async fn execute(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        let stage_progress = input.stage_progress.unwrap_or_default();
        let result = self.execute_inner(tx, stage_progress).await;
        self.initial_cycle = false;
        result
    }

    async fn unwind(
        &mut self,
        tx: &mut StageTx<'_, DB>,
        input: UnwindInput,
    ) -> Result<UnwindOutput, StageError> {
        let mut stage_progress = input.unwind_to;

        if let Some(bad_block) = input.bad_block {
            let latest_valid =
                rawdb::read_canonical_hash(&**tx, input.unwind_to)?.unwrap_or_default();
            self.hd.report_bad_header(bad_block, latest_valid);

            // mark all descendants of the bad block as bad too
            let mut cursor = (**tx).cursor_read::<tables::Headers>()?;
            let mut entry = cursor.seek(BlockNumHash(input.unwind_to + 1, B256::ZERO))?;
            while let Some((key, header)) = entry {
                if self.hd.is_bad_header(header.parent_hash).is_some() {
                    self.hd.report_bad_header(key.hash(), latest_valid);
                }
                entry = cursor.next()?;
            }
        }

        // canonical markers above the unwind point go away; header and
        // total-difficulty rows are retained
        rawdb::truncate_canonical_above(&**tx, input.unwind_to)?;

        if input.bad_block.is_some() {
            // outside of tests the heaviest-chain search happens on the next
            // cycle instead
            let (mut max_num, mut max_hash) = if self.test_mode {
                self.heaviest_valid_tip(tx)?
            } else {
                (0, B256::ZERO)
            };
            if max_num == 0 {
                max_num = input.unwind_to;
                max_hash = rawdb::read_canonical_hash(&**tx, max_num)?
                    .ok_or(DatabaseIntegrityError::CanonicalHash { number: max_num })?;
            }
            rawdb::write_head_header_hash(&**tx, max_hash)?;
            HEADERS.save_progress(&**tx, max_num)?;
            stage_progress = max_num;
        }

        tx.commit()?;
        Ok(UnwindOutput { stage_progress })
    }
}

/// Writes the forkchoice pointers, verifying that the safe and finalized
/// hashes (when present) name canonical blocks.
fn write_fork_choice_hashes<Tx: DbTx + DbTxMut>(
    forkchoice: &ForkchoiceState,
    tx: &Tx,
) -> Result<bool, StageError> {
    if !forkchoice.safe_block_hash.is_zero() &&
        !rawdb::is_canonical_hash(tx, forkchoice.safe_block_hash)?
    {
        warn!(target: "sync::stages::headers", ?forkchoice, "Non-canonical safe block hash");
        return Ok(false)
    }
    if !forkchoice.finalized_block_hash.is_zero() &&
        !rawdb::is_canonical_hash(tx, forkchoice.finalized_block_hash)?
    {
        warn!(target: "sync::stages::headers", ?forkchoice, "Non-canonical finalized block hash");
        return Ok(false)
    }

    rawdb::write_forkchoice_head(tx, forkchoice.head_block_hash)?;
    if !forkchoice.safe_block_hash.is_zero() {
        rawdb::write_forkchoice_safe(tx, forkchoice.safe_block_hash)?;
    }
    if !forkchoice.finalized_block_hash.is_zero() {
        rawdb::write_forkchoice_finalized(tx, forkchoice.finalized_block_hash)?;
    }
    Ok(true)
}

/// Rewrites the canonical-hash index from `(height, hash)` back to the first
/// ancestor whose canonical entry already matches.
///
/// Height zero is never rewritten. A missing ancestor on the way down is a
/// fatal inconsistency.
pub(crate) fn fix_canonical_chain<Tx: DbTx + DbTxMut>(
    height: BlockNumber,
    hash: B256,
    tx: &Tx,
) -> Result<(), StageError> {
    if height == 0 {
        return Ok(())
    }
    let mut ancestor_hash = hash;
    let mut ancestor_height = height;

    while rawdb::read_canonical_hash(tx, ancestor_height)? != Some(ancestor_hash) {
        rawdb::write_canonical_hash(tx, ancestor_height, ancestor_hash)?;
        let ancestor = rawdb::read_header(tx, ancestor_hash, ancestor_height)?.ok_or(
            DatabaseIntegrityError::AncestorMissing {
                number: ancestor_height,
                hash: ancestor_hash,
            },
        )?;
        ancestor_hash = ancestor.parent_hash;
        ancestor_height -= 1;
        if ancestor_height == 0 {
            break
        }
    }
    Ok(())
}
