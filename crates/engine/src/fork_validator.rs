use crate::message::{PayloadStatus, PayloadStatusEnum};
use hearth_db::{rawdb, DatabaseError, DbTx, DbTxMut, MemoryOverlay, OverlayTx};
use hearth_interfaces::StateChangeAccumulator;
use hearth_primitives::{BlockNumber, RawBody, SealedBlock, SealedHeader, B256};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

/// The maximum distance from the current head past which side forks are not
/// validated anymore.
///
/// 32 slots is the duration of an epoch, thus there cannot be side forks in
/// PoS deeper than 32 blocks from the head.
pub const MAX_FORK_DEPTH: u64 = 32;

/// A state-transition failure; the payload is invalid but the failure is not
/// the node's fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// The state-transition capability.
///
/// Executes `header`+`body` on top of the given overlay view. A non-zero
/// `unwind_point` asks the execution to first retreat to that height; the
/// sidechain slices carry the fork blocks between the unwind point and the
/// header under test, oldest first and exclusive of the header itself.
pub type ValidatePayloadFn<Tx> = Box<
    dyn FnMut(
            &OverlayTx<'_, Tx>,
            &SealedHeader,
            Option<&RawBody>,
            u64,
            &[SealedHeader],
            &[RawBody],
        ) -> Result<(), ValidationError>
        + Send,
>;

/// Failures that are the node's fault and abort request handling.
#[derive(Debug, thiserror::Error)]
pub enum ForkValidatorError {
    /// Storage access failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// The body of a validated block could not be read back from the overlay.
    #[error("failed to recover the body of block {number} ({hash})")]
    BodyRecovery {
        /// Height of the block.
        number: BlockNumber,
        /// Hash of the block.
        hash: B256,
    },
    /// A header required for the txpool notification is missing.
    #[error("could not find header for block {0}")]
    MissingHeader(BlockNumber),
    /// The canonical hash at the unwind point is missing.
    #[error("could not read canonical hash of unwind point {0}")]
    MissingCanonicalHash(BlockNumber),
}

/// A full side-fork block: any block stored in the cache is considered valid.
#[derive(Debug, Clone)]
struct ForkSegment {
    header: SealedHeader,
    body: RawBody,
}

struct Inner<Tx> {
    /// Hash to side-fork block. Entries are kept within [`MAX_FORK_DEPTH`] of
    /// the current height; if a segment is missing, the block is only
    /// accepted and full validation is given up.
    side_forks: HashMap<B256, ForkSegment>,
    /// Memory overlay holding the chain head that extends the canonical fork.
    extending_fork: Option<MemoryOverlay>,
    /// Hash of the chain head that extends the canonical fork.
    extending_fork_head_hash: B256,
    /// The function used to perform payload validation.
    validate_payload: Option<ValidatePayloadFn<Tx>>,
    /// The height up to which the chain has been processed so far.
    current_height: BlockNumber,
}

/// Speculatively validates candidate chain heads without committing them.
///
/// A payload that extends the canonical chain is staged in the extending-fork
/// overlay; short side forks are re-assembled from the segment cache and
/// replayed against a throwaway overlay. Either way nothing reaches the
/// database until [`ForkValidator::flush_extending_fork`] confirms the staged
/// head.
pub struct ForkValidator<Tx> {
    inner: Mutex<Inner<Tx>>,
}

impl<Tx> std::fmt::Debug for ForkValidator<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ForkValidator")
            .field("side_forks", &inner.side_forks.len())
            .field("extending_fork_head_hash", &inner.extending_fork_head_hash)
            .field("current_height", &inner.current_height)
            .finish()
    }
}

impl<Tx: DbTx + DbTxMut> ForkValidator<Tx> {
    /// Creates a fork validator with the given state-transition capability.
    pub fn new(current_height: BlockNumber, validate_payload: ValidatePayloadFn<Tx>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                side_forks: HashMap::new(),
                extending_fork: None,
                extending_fork_head_hash: B256::ZERO,
                validate_payload: Some(validate_payload),
                current_height,
            }),
        }
    }

    /// Creates a fork validator without a state-transition capability; every
    /// payload that would need validation is accepted instead.
    pub fn new_without_validation(current_height: BlockNumber) -> Self {
        Self {
            inner: Mutex::new(Inner {
                side_forks: HashMap::new(),
                extending_fork: None,
                extending_fork_head_hash: B256::ZERO,
                validate_payload: None,
                current_height,
            }),
        }
    }

    /// Returns the head hash of the fork that extends the canonical chain,
    /// or zero when nothing is staged.
    pub fn extending_fork_head_hash(&self) -> B256 {
        self.inner.lock().extending_fork_head_hash
    }

    #[cfg(test)]
    fn side_forks_len(&self) -> usize {
        self.inner.lock().side_forks.len()
    }

    /// To be called at the end of a sync cycle with the last processed
    /// height. Any staged overlay is dropped: assumptions made on top of the
    /// previous head no longer hold.
    pub fn notify_current_height(&self, current_height: BlockNumber) {
        let mut inner = self.inner.lock();
        inner.current_height = current_height;
        if let Some(fork) = &inner.extending_fork {
            fork.rollback();
        }
        inner.extending_fork = None;
        inner.extending_fork_head_hash = B256::ZERO;
    }

    /// Commits the staged overlay into the given transaction.
    ///
    /// Must only be called once the consensus layer has chosen the staged
    /// head in a forkchoice update.
    pub fn flush_extending_fork(&self, tx: &Tx) -> Result<(), ForkValidatorError> {
        let mut inner = self.inner.lock();
        if let Some(fork) = &inner.extending_fork {
            fork.flush(tx)?;
        }
        inner.extending_fork = None;
        inner.extending_fork_head_hash = B256::ZERO;
        Ok(())
    }

    /// Inserts a PoW block into the side-fork cache without validation.
    ///
    /// Needed across the PoW to PoS transition, where descendants of a PoW
    /// block can arrive as payloads before the transition block is processed.
    pub fn try_adding_pow_block(&self, block: &SealedBlock) {
        let mut inner = self.inner.lock();
        inner.side_forks.insert(
            block.hash(),
            ForkSegment { header: block.header.clone(), body: block.body.clone() },
        );
        inner.clean();
    }

    /// Wipes the staged fork and notifies the transaction pool of the
    /// transactions leaving the chain.
    ///
    /// Called when a forkchoice update settles on some other head: all
    /// non-chosen forks are obsolete from that point on.
    pub fn clear_with_unwind(&self, tx: &Tx, accumulator: Option<&dyn StateChangeAccumulator>) {
        let mut inner = self.inner.lock();
        let head_hash = inner.extending_fork_head_hash;
        let staged = inner.side_forks.get(&head_hash).cloned();
        if let (Some(fork), Some(accumulator), Some(segment)) =
            (&inner.extending_fork, accumulator, staged)
        {
            if !head_hash.is_zero() {
                let unwind_to = segment.header.number.saturating_sub(1);
                if let Err(err) = notify_txpool(fork, tx, unwind_to, head_hash, accumulator) {
                    warn!(target: "engine::fork_validator", %err, "Could not notify txpool of discarded side fork");
                }
                fork.rollback();
            }
        }
        inner.clear();
    }

    /// Returns whether a payload is valid or invalid, or accepts it when
    /// validity cannot be determined.
    ///
    /// A payload that extends the canonical chain is stacked in the
    /// extending-fork overlay without any unwind. A fork payload is validated
    /// from the point where the fork meets the canonical chain, provided all
    /// segments in between are cached. When information is missing, the
    /// payload is accepted without validation.
    pub fn validate_payload(
        &self,
        tx: &Tx,
        header: &SealedHeader,
        body: Option<&RawBody>,
        extend_canonical: bool,
    ) -> Result<PayloadStatus, ForkValidatorError> {
        let mut inner = self.inner.lock();
        if inner.validate_payload.is_none() {
            return Ok(PayloadStatus::from_status(PayloadStatusEnum::Accepted))
        }
        let result = inner.validate(tx, header, body, extend_canonical);
        inner.clean();
        result
    }
}

impl<Tx: DbTx + DbTxMut> Inner<Tx> {
    fn validate(
        &mut self,
        tx: &Tx,
        header: &SealedHeader,
        body: Option<&RawBody>,
        extend_canonical: bool,
    ) -> Result<PayloadStatus, ForkValidatorError> {
        // a block stored in the side-fork cache was already validated
        if self.side_forks.contains_key(&header.hash()) {
            return Ok(PayloadStatus::from_status(PayloadStatusEnum::Valid)
                .with_latest_valid_hash(header.hash()))
        }

        if extend_canonical {
            // the new block extends the canonical chain: stage it in the
            // extending-fork overlay, rebound to the current transaction
            if self.extending_fork.is_none() {
                self.extending_fork = Some(MemoryOverlay::new());
            }
            self.extending_fork_head_hash = header.hash();
            return self.validate_and_store(tx, header, body, 0, Vec::new(), Vec::new(), true)
        }

        // blocks out of range of the head are not validated
        if self.current_height.abs_diff(header.number) > MAX_FORK_DEPTH {
            return Ok(PayloadStatus::from_status(PayloadStatusEnum::Accepted))
        }

        // assemble the side fork backwards until it meets the canonical chain
        let mut headers_chain = Vec::new();
        let mut bodies_chain = Vec::new();
        let mut unwind_point = header.number.saturating_sub(1);
        let mut current_hash = header.parent_hash;
        let mut found_canonical = rawdb::is_canonical_hash(tx, current_hash)?;
        while !found_canonical {
            let Some(segment) = self.side_forks.get(&current_hash) else {
                // a segment is missing: validity cannot be checked
                return Ok(PayloadStatus::from_status(PayloadStatusEnum::Accepted))
            };
            headers_chain.insert(0, segment.header.clone());
            bodies_chain.insert(0, segment.body.clone());
            // a body that already reached the persistent body table cannot be
            // replayed; reverting canonicalized bodies is not supported
            if rawdb::has_body(tx, segment.header.hash(), segment.header.number)? {
                return Ok(PayloadStatus::from_status(PayloadStatusEnum::Accepted))
            }
            unwind_point = segment.header.number.saturating_sub(1);
            current_hash = segment.header.parent_hash;
            found_canonical = rawdb::is_canonical_hash(tx, current_hash)?;
        }

        // no unwind if the fork meets the chain right at the current height
        if unwind_point == self.current_height {
            unwind_point = 0;
        }

        self.validate_and_store(tx, header, body, unwind_point, headers_chain, bodies_chain, false)
    }

    /// Validates the payload and caches the resulting fork segment when the
    /// chain turns out valid.
    #[allow(clippy::too_many_arguments)]
    fn validate_and_store(
        &mut self,
        tx: &Tx,
        header: &SealedHeader,
        body: Option<&RawBody>,
        unwind_point: u64,
        headers_chain: Vec<SealedHeader>,
        bodies_chain: Vec<RawBody>,
        extending: bool,
    ) -> Result<PayloadStatus, ForkValidatorError> {
        let scratch;
        let overlay = if extending {
            self.extending_fork.as_ref().expect("extending fork was staged above")
        } else {
            scratch = MemoryOverlay::new();
            &scratch
        };

        let view = OverlayTx::new(tx, overlay);
        let validate = self.validate_payload.as_mut().expect("checked by the caller");
        let outcome =
            validate(&view, header, body, unwind_point, &headers_chain, &bodies_chain);

        match outcome {
            Ok(()) => {
                let stored_body = match body {
                    Some(body) => body.clone(),
                    // the body was not provided (ancestor replay): recover it
                    // from the transactions the execution wrote to the overlay
                    None => rawdb::read_body(&view, header.hash(), header.number)?.ok_or(
                        ForkValidatorError::BodyRecovery {
                            number: header.number,
                            hash: header.hash(),
                        },
                    )?,
                };
                self.side_forks
                    .insert(header.hash(), ForkSegment { header: header.clone(), body: stored_body });
                if !extending {
                    overlay.rollback();
                }
                Ok(PayloadStatus::from_status(PayloadStatusEnum::Valid)
                    .with_latest_valid_hash(header.hash()))
            }
            Err(err) => {
                overlay.rollback();
                self.extending_fork = None;
                self.extending_fork_head_hash = B256::ZERO;
                Ok(PayloadStatus::new(
                    PayloadStatusEnum::Invalid { validation_error: err.to_string() },
                    Some(header.parent_hash),
                ))
            }
        }
    }

    /// Wipes the extending-fork state. The side-fork cache survives.
    fn clear(&mut self) {
        if let Some(fork) = &self.extending_fork {
            fork.rollback();
        }
        self.extending_fork = None;
        self.extending_fork_head_hash = B256::ZERO;
    }

    /// Drops every cached segment further than [`MAX_FORK_DEPTH`] from the
    /// current height.
    fn clean(&mut self) {
        let current_height = self.current_height;
        self.side_forks
            .retain(|_, segment| current_height.abs_diff(segment.header.number) <= MAX_FORK_DEPTH);
    }
}

/// Replays the staged block's transactions through the accumulator with the
/// unwind flag, so the pool re-queues them.
///
/// The fee parameters are taken from the surviving canonical header at the
/// unwind point.
fn notify_txpool<Tx: DbTx + DbTxMut>(
    fork: &MemoryOverlay,
    tx: &Tx,
    unwind_to: BlockNumber,
    staged_head: B256,
    accumulator: &dyn StateChangeAccumulator,
) -> Result<(), ForkValidatorError> {
    let view = OverlayTx::new(tx, fork);
    let hash = rawdb::read_canonical_hash(&view, unwind_to)?
        .ok_or(ForkValidatorError::MissingCanonicalHash(unwind_to))?;
    let header = rawdb::read_header(&view, hash, unwind_to)?
        .ok_or(ForkValidatorError::MissingHeader(unwind_to))?;
    let reverted_txs = rawdb::read_body(&view, staged_head, unwind_to + 1)?
        .map(|body| body.transactions)
        .unwrap_or_default();

    accumulator.reset(0);
    accumulator.start_change(unwind_to, hash, reverted_txs, true);
    accumulator.send_and_reset(header.base_fee_per_gas.unwrap_or_default(), header.gas_limit);
    info!(target: "engine::fork_validator", "Transaction pool notified of discarded side fork");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_db::{mem::MemTx, Database, MemDb};
    use hearth_interfaces::test_utils::{
        generators::{random_header, random_header_range},
        TestAccumulator,
    };
    use hearth_primitives::Bytes;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// A state transition that succeeds, persisting the body the way the real
    /// execution does: provided bodies are written as-is, replayed blocks get
    /// their transactions re-derived (empty here).
    fn passing_validator(current_height: u64, calls: Arc<AtomicUsize>) -> ForkValidator<MemTx> {
        ForkValidator::new(
            current_height,
            Box::new(move |view, header, body, _, _, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                let body = body.cloned().unwrap_or_default();
                rawdb::write_body(view, header.hash(), header.number, &body)
                    .map_err(|err| ValidationError(err.to_string()))
            }),
        )
    }

    fn failing_validator(current_height: u64) -> ForkValidator<MemTx> {
        ForkValidator::new(
            current_height,
            Box::new(|_, _, _, _, _, _| Err(ValidationError("mismatched state root".into()))),
        )
    }

    /// Seeds a canonical chain of `count + 1` headers (0..=count) and points
    /// the head at the last one. Returns the headers.
    fn seed_canonical(tx: &MemTx, count: u64) -> Vec<SealedHeader> {
        let headers = random_header_range(0..count + 1, B256::ZERO);
        for header in &headers {
            rawdb::write_header(tx, header).unwrap();
            rawdb::write_canonical_hash(tx, header.number, header.hash()).unwrap();
        }
        rawdb::write_head_header_hash(tx, headers.last().unwrap().hash()).unwrap();
        headers
    }

    fn body_with_tx() -> RawBody {
        RawBody { transactions: vec![Bytes::from_static(&[0xaa, 0xbb])], ommers: Vec::new() }
    }

    #[test]
    fn extending_payload_is_staged_and_valid() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let validator = passing_validator(100, Arc::default());

        let payload = random_header(101, Some(chain.last().unwrap().hash()));
        let status =
            validator.validate_payload(&tx, &payload, Some(&body_with_tx()), true).unwrap();

        assert_eq!(status.status, PayloadStatusEnum::Valid);
        assert_eq!(status.latest_valid_hash, Some(payload.hash()));
        assert_eq!(validator.extending_fork_head_hash(), payload.hash());
        // staged, not committed
        assert_eq!(rawdb::read_body(&tx, payload.hash(), 101).unwrap(), None);
    }

    #[test]
    fn cached_side_fork_block_short_circuits() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let calls = Arc::new(AtomicUsize::new(0));
        let validator = passing_validator(100, calls.clone());

        let payload = random_header(101, Some(chain.last().unwrap().hash()));
        validator.validate_payload(&tx, &payload, Some(&body_with_tx()), true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let status =
            validator.validate_payload(&tx, &payload, Some(&body_with_tx()), false).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Valid);
        assert_eq!(status.latest_valid_hash, Some(payload.hash()));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "cached block must not be re-validated");
    }

    #[test]
    fn invalid_payload_reports_parent_and_clears_staging() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let validator = failing_validator(100);

        let payload = random_header(101, Some(chain.last().unwrap().hash()));
        let status =
            validator.validate_payload(&tx, &payload, Some(&body_with_tx()), true).unwrap();

        assert!(status.status.is_invalid());
        assert_eq!(status.latest_valid_hash, Some(payload.parent_hash));
        assert_eq!(validator.extending_fork_head_hash(), B256::ZERO);
    }

    #[test]
    fn out_of_range_side_fork_is_accepted() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        seed_canonical(&tx, 10);
        let validator = passing_validator(1000, Arc::default());

        let stray = random_header(900, None);
        let status = validator.validate_payload(&tx, &stray, None, false).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Accepted);
        assert_eq!(validator.side_forks_len(), 0);
    }

    #[test]
    fn missing_ancestor_is_accepted() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        seed_canonical(&tx, 100);
        let validator = passing_validator(100, Arc::default());

        let orphan = random_header(99, None);
        let status = validator.validate_payload(&tx, &orphan, None, false).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Accepted);
    }

    #[test]
    fn side_fork_is_assembled_backwards() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let validator = {
            let observed = observed.clone();
            ForkValidator::<MemTx>::new(
                100,
                Box::new(move |view, header, body, unwind_point, headers, _| {
                    observed.lock().push((unwind_point, headers.len()));
                    let body = body.cloned().unwrap_or_default();
                    rawdb::write_body(view, header.hash(), header.number, &body)
                        .map_err(|err| ValidationError(err.to_string()))
                }),
            )
        };

        // X@100 forks off the canonical block 99
        let x = random_header(100, Some(chain[99].hash()));
        let status = validator.validate_payload(&tx, &x, Some(&body_with_tx()), false).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Valid);

        // Y@101 extends X; the cached segment is replayed behind it
        let y = random_header(101, Some(x.hash()));
        let status = validator.validate_payload(&tx, &y, Some(&body_with_tx()), false).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Valid);

        let observed = observed.lock();
        assert_eq!(observed.as_slice(), &[(99, 0), (99, 1)]);
    }

    #[test]
    fn fork_over_canonicalized_body_is_accepted() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let validator = passing_validator(100, Arc::default());

        let x = random_header(100, Some(chain[99].hash()));
        validator.validate_payload(&tx, &x, Some(&body_with_tx()), false).unwrap();
        // the segment's body lands in the persistent table: no replay support
        rawdb::write_body(&tx, x.hash(), 100, &body_with_tx()).unwrap();

        let y = random_header(101, Some(x.hash()));
        let status = validator.validate_payload(&tx, &y, Some(&body_with_tx()), false).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Accepted);
    }

    #[test]
    fn body_is_recovered_from_overlay_when_not_provided() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let validator = passing_validator(100, Arc::default());

        let payload = random_header(101, Some(chain.last().unwrap().hash()));
        let status = validator.validate_payload(&tx, &payload, None, true).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Valid);
        assert_eq!(validator.side_forks_len(), 1);
    }

    #[test]
    fn notify_current_height_drops_dangling_overlay() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let validator = passing_validator(100, Arc::default());

        let payload = random_header(101, Some(chain.last().unwrap().hash()));
        validator.validate_payload(&tx, &payload, Some(&body_with_tx()), true).unwrap();
        assert_ne!(validator.extending_fork_head_hash(), B256::ZERO);

        validator.notify_current_height(101);
        assert_eq!(validator.extending_fork_head_hash(), B256::ZERO);

        // a later flush has nothing to write
        validator.flush_extending_fork(&tx).unwrap();
        assert_eq!(rawdb::read_body(&tx, payload.hash(), 101).unwrap(), None);
    }

    #[test]
    fn flush_makes_staged_writes_durable() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let validator = passing_validator(100, Arc::default());

        let payload = random_header(101, Some(chain.last().unwrap().hash()));
        let body = body_with_tx();
        validator.validate_payload(&tx, &payload, Some(&body), true).unwrap();

        validator.flush_extending_fork(&tx).unwrap();
        assert_eq!(validator.extending_fork_head_hash(), B256::ZERO);
        assert_eq!(rawdb::read_body(&tx, payload.hash(), 101).unwrap(), Some(body));
    }

    #[test]
    fn clear_with_unwind_notifies_txpool_with_canonical_fee_basis() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let head = chain.last().unwrap();
        let validator = passing_validator(100, Arc::default());

        let body = body_with_tx();
        let payload = random_header(101, Some(head.hash()));
        validator.validate_payload(&tx, &payload, Some(&body), true).unwrap();

        let accumulator = TestAccumulator::default();
        validator.clear_with_unwind(&tx, Some(&accumulator));

        let changes = accumulator.sent_changes();
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert!(change.unwind);
        assert_eq!(change.number, 100);
        assert_eq!(change.hash, head.hash());
        assert_eq!(change.txs, body.transactions);
        // fee basis comes from the surviving canonical header, not the
        // reverted head
        assert_eq!(change.base_fee, Some(head.base_fee_per_gas.unwrap_or_default()));
        assert_eq!(change.gas_limit, Some(head.gas_limit));
        assert_eq!(validator.extending_fork_head_hash(), B256::ZERO);
    }

    #[test]
    fn stale_segments_are_pruned() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_canonical(&tx, 100);
        let validator = passing_validator(100, Arc::default());

        let x = random_header(100, Some(chain[99].hash()));
        validator.validate_payload(&tx, &x, Some(&body_with_tx()), false).unwrap();
        assert_eq!(validator.side_forks_len(), 1);

        validator.notify_current_height(200);
        // the next validation prunes everything out of range
        let fresh = random_header(201, None);
        validator.validate_payload(&tx, &fresh, None, false).unwrap();
        assert_eq!(validator.side_forks_len(), 0);
    }

    #[test]
    fn validator_without_capability_accepts() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        seed_canonical(&tx, 10);
        let validator = ForkValidator::<MemTx>::new_without_validation(10);

        let payload = random_header(11, None);
        let status = validator.validate_payload(&tx, &payload, None, true).unwrap();
        assert_eq!(status.status, PayloadStatusEnum::Accepted);
    }

    #[test]
    fn pow_block_is_cached_without_validation() {
        let validator = ForkValidator::<MemTx>::new_without_validation(10);
        let header = random_header(10, None);
        let block = SealedBlock::new(header, body_with_tx());
        validator.try_adding_pow_block(&block);
        assert_eq!(validator.side_forks_len(), 1);
    }
}
