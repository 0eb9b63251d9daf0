//! Test implementations of the collaborator seams.

use crate::{
    consensus::{Consensus, ConsensusError},
    events::{BodyDownloader, HeadersNotifier, StateChangeAccumulator},
};
use hearth_primitives::{BlockNumber, Bytes, SealedBlock, SealedHeader, B256};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod generators;

/// Consensus implementation for testing with a failure toggle.
#[derive(Debug, Default)]
pub struct TestConsensus {
    /// Whether header validation should purposefully fail.
    fail_validation: AtomicBool,
}

impl TestConsensus {
    /// Makes every subsequent validation fail (or succeed again).
    pub fn set_fail_validation(&self, fail: bool) {
        self.fail_validation.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ConsensusError> {
        if self.fail_validation.load(Ordering::SeqCst) {
            Err(ConsensusError::Other("consensus failure requested by test".into()))
        } else {
            Ok(())
        }
    }
}

impl Consensus for TestConsensus {
    fn validate_header(&self, _header: &SealedHeader) -> Result<(), ConsensusError> {
        self.check()
    }

    fn validate_header_against_parent(
        &self,
        _header: &SealedHeader,
        _parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        self.check()
    }
}

/// A change entry recorded by [`TestAccumulator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedChange {
    /// Block number of the change.
    pub number: BlockNumber,
    /// Block hash of the change.
    pub hash: B256,
    /// Transactions of the change.
    pub txs: Vec<Bytes>,
    /// Whether the change was a revert.
    pub unwind: bool,
    /// Base fee passed on send, when the change was sent.
    pub base_fee: Option<u64>,
    /// Gas limit passed on send, when the change was sent.
    pub gas_limit: Option<u64>,
}

/// Accumulator that records every notification for later inspection.
#[derive(Debug, Default)]
pub struct TestAccumulator {
    changes: Mutex<Vec<RecordedChange>>,
    pending: Mutex<Option<RecordedChange>>,
}

impl TestAccumulator {
    /// Returns the changes sent so far.
    pub fn sent_changes(&self) -> Vec<RecordedChange> {
        self.changes.lock().clone()
    }
}

impl StateChangeAccumulator for TestAccumulator {
    fn reset(&self, _tick: u64) {
        *self.pending.lock() = None;
    }

    fn start_change(&self, number: BlockNumber, hash: B256, txs: Vec<Bytes>, unwind: bool) {
        *self.pending.lock() =
            Some(RecordedChange { number, hash, txs, unwind, base_fee: None, gas_limit: None });
    }

    fn send_and_reset(&self, base_fee: u64, gas_limit: u64) {
        if let Some(mut change) = self.pending.lock().take() {
            change.base_fee = Some(base_fee);
            change.gas_limit = Some(gas_limit);
            self.changes.lock().push(change);
        }
    }
}

/// Body downloader that records prefetched blocks.
#[derive(Debug, Default)]
pub struct TestBodyDownloader {
    prefetched: Mutex<Vec<B256>>,
}

impl TestBodyDownloader {
    /// Returns the hashes queued for prefetch.
    pub fn prefetched(&self) -> Vec<B256> {
        self.prefetched.lock().clone()
    }
}

impl BodyDownloader for TestBodyDownloader {
    fn add_to_prefetch(&self, block: &SealedBlock) {
        self.prefetched.lock().push(block.hash());
    }
}

/// Notifier that records header announcements.
#[derive(Debug, Default)]
pub struct TestHeadersNotifier {
    announced: Mutex<Vec<Vec<Bytes>>>,
}

impl TestHeadersNotifier {
    /// Returns the announcements received so far.
    pub fn announced(&self) -> Vec<Vec<Bytes>> {
        self.announced.lock().clone()
    }
}

impl HeadersNotifier for TestHeadersNotifier {
    fn on_new_headers(&self, headers_rlp: Vec<Bytes>) {
        self.announced.lock().push(headers_rlp);
    }
}
