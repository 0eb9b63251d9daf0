use crate::{
    message::{EngineApiError, EngineReply, ForkchoiceState},
    queue::{RequestId, RequestList},
};
use hearth_primitives::{BlockNumHash, BlockNumber, Header, SealedHeader, B256};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};

/// The header collector filled by the PoS downloader.
///
/// Keyed by `(number, hash)` so loading replays headers parent-first.
pub type HeaderCollector = hearth_etl::Collector<BlockNumHash, Header>;

/// State of the asynchronous PoS header download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PosStatus {
    /// No download in progress.
    #[default]
    Idle,
    /// Headers are being fetched towards the requested tip.
    Syncing,
    /// The fetch completed; headers are waiting in the collector.
    Synced,
}

/// The target of a scheduled PoS download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosDownloadTarget {
    /// The request that triggered the download.
    pub request_id: RequestId,
    /// The first missing header hash, fetched backwards from here.
    pub hash: B256,
    /// Height of the first missing header, zero when unknown.
    pub height: BlockNumber,
    /// The payload or forkchoice head the download works towards. Marked bad
    /// if the downloaded chain fails validation.
    pub tip: B256,
}

/// Shared state between the headers stage, the engine API facade and the
/// asynchronous downloader.
///
/// Only the stage loop mutates these fields while handling a request; the
/// downloader flips [`PosStatus`] and delivers the `Synced` interrupt.
#[derive(Debug)]
pub struct HeaderDownload {
    /// The consensus-layer request queue.
    pub requests: RequestList,
    reply_tx: mpsc::Sender<EngineReply>,
    /// Headers that failed validation, mapped to the deepest valid ancestor
    /// known at the time. Monotonic for the lifetime of the process.
    bad_headers: Mutex<HashMap<B256, B256>>,
    pos_status: Mutex<PosStatus>,
    pos_target: Mutex<Option<PosDownloadTarget>>,
    collector: Mutex<Option<HeaderCollector>>,
    pending_payload_hash: Mutex<Option<B256>>,
    pending_payload_status: Mutex<Option<EngineReply>>,
    unsettled_forkchoice: Mutex<Option<(ForkchoiceState, BlockNumber)>>,
    pow_headers: Mutex<Option<mpsc::Receiver<Vec<SealedHeader>>>>,
    quit_pow_mining: Mutex<Option<oneshot::Sender<()>>>,
    shutdown: watch::Sender<bool>,
}

impl HeaderDownload {
    /// Creates the shared downloader state.
    ///
    /// Returns the receiving half of the reply channel; its capacity of one
    /// forces the consensus-layer facade to consume every reply before the
    /// stage can produce the next, which keeps replies in request order.
    pub fn new() -> (Self, mpsc::Receiver<EngineReply>) {
        let (reply_tx, reply_rx) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);
        let this = Self {
            requests: RequestList::new(),
            reply_tx,
            bad_headers: Mutex::new(HashMap::new()),
            pos_status: Mutex::new(PosStatus::Idle),
            pos_target: Mutex::new(None),
            collector: Mutex::new(None),
            pending_payload_hash: Mutex::new(None),
            pending_payload_status: Mutex::new(None),
            unsettled_forkchoice: Mutex::new(None),
            pow_headers: Mutex::new(None),
            quit_pow_mining: Mutex::new(None),
            shutdown,
        };
        (this, reply_rx)
    }

    /// Sends a reply to the consensus layer, blocking until the previous one
    /// was consumed.
    pub async fn send_reply(&self, reply: EngineReply) -> Result<(), EngineApiError> {
        self.reply_tx.send(reply).await.map_err(|_| EngineApiError::ChannelClosed)
    }

    /// Returns the recorded latest valid hash if the given header was marked
    /// bad.
    pub fn is_bad_header(&self, hash: B256) -> Option<B256> {
        self.bad_headers.lock().get(&hash).copied()
    }

    /// Marks a header as bad. Entries are never removed.
    pub fn report_bad_header(&self, bad: B256, latest_valid: B256) {
        self.bad_headers.lock().insert(bad, latest_valid);
    }

    /// Returns the status of the PoS download.
    pub fn pos_status(&self) -> PosStatus {
        *self.pos_status.lock()
    }

    /// Sets the status of the PoS download.
    pub fn set_pos_status(&self, status: PosStatus) {
        *self.pos_status.lock() = status;
    }

    /// Returns the target of the current PoS download, if one is scheduled.
    pub fn pos_target(&self) -> Option<PosDownloadTarget> {
        *self.pos_target.lock()
    }

    /// Stores the target of a newly scheduled PoS download.
    pub fn set_pos_target(&self, target: PosDownloadTarget) {
        *self.pos_target.lock() = Some(target);
    }

    /// Installs the collector the downloader will fill.
    pub fn set_collector(&self, collector: HeaderCollector) {
        *self.collector.lock() = Some(collector);
    }

    /// Takes the filled collector for replay.
    pub fn take_collector(&self) -> Option<HeaderCollector> {
        self.collector.lock().take()
    }

    /// Returns whether a collector is installed, i.e. a download was
    /// scheduled and has not been replayed yet.
    pub fn has_collector(&self) -> bool {
        self.collector.lock().is_some()
    }

    /// Inserts a downloaded header into the collector, if one is installed.
    pub fn collect_header(&self, header: &SealedHeader) -> std::io::Result<()> {
        if let Some(collector) = self.collector.lock().as_mut() {
            collector.insert(header.num_hash(), header.header().clone())?;
        }
        Ok(())
    }

    /// Remembers the payload hash whose `VALID` reply is deferred until the
    /// surrounding transaction commits.
    pub fn set_pending_payload_hash(&self, hash: B256) {
        *self.pending_payload_hash.lock() = Some(hash);
    }

    /// Returns the pending payload hash.
    pub fn pending_payload_hash(&self) -> Option<B256> {
        *self.pending_payload_hash.lock()
    }

    /// Clears the pending payload hash.
    pub fn clear_pending_payload_hash(&self) {
        *self.pending_payload_hash.lock() = None;
    }

    /// Stores a reply to be released after the commit.
    pub fn set_pending_payload_status(&self, status: Option<EngineReply>) {
        *self.pending_payload_status.lock() = status;
    }

    /// Takes the reply deferred until after the commit.
    pub fn take_pending_payload_status(&self) -> Option<EngineReply> {
        self.pending_payload_status.lock().take()
    }

    /// Stashes a forkchoice whose handling resumes after the unwind.
    pub fn set_unsettled_forkchoice(&self, forkchoice: ForkchoiceState, height: BlockNumber) {
        *self.unsettled_forkchoice.lock() = Some((forkchoice, height));
    }

    /// Returns the stashed forkchoice, leaving it in place.
    pub fn unsettled_forkchoice(&self) -> Option<(ForkchoiceState, BlockNumber)> {
        *self.unsettled_forkchoice.lock()
    }

    /// Clears the stashed forkchoice.
    pub fn clear_unsettled_forkchoice(&self) {
        *self.unsettled_forkchoice.lock() = None;
    }

    /// Attaches the channel on which the opaque PoW fetcher delivers header
    /// batches.
    pub fn attach_pow_feed(&self, feed: mpsc::Receiver<Vec<SealedHeader>>) {
        *self.pow_headers.lock() = Some(feed);
    }

    /// Drains one batch of PoW headers, if any arrived.
    pub fn drain_pow_batch(&self) -> Option<Vec<SealedHeader>> {
        self.pow_headers.lock().as_mut()?.try_recv().ok()
    }

    /// Hands out the gate a PoW miner can watch; dropped (closed) when the
    /// chain transitions to PoS.
    pub fn pow_mining_gate(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.quit_pow_mining.lock() = Some(tx);
        rx
    }

    /// Closes the PoW mining gate. Idempotent.
    pub fn close_pow_mining(&self) {
        self.quit_pow_mining.lock().take();
    }

    /// Signals shutdown to whoever subscribed.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Subscribes to the shutdown signal.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PayloadStatus, PayloadStatusEnum};

    #[test]
    fn bad_headers_are_monotonic() {
        let (hd, _reply_rx) = HeaderDownload::new();
        let bad = B256::with_last_byte(1);
        let valid = B256::with_last_byte(2);
        assert_eq!(hd.is_bad_header(bad), None);
        hd.report_bad_header(bad, valid);
        assert_eq!(hd.is_bad_header(bad), Some(valid));
    }

    #[test]
    fn pow_mining_gate_closes_once() {
        let (hd, _reply_rx) = HeaderDownload::new();
        let mut gate = hd.pow_mining_gate();
        assert!(gate.try_recv().is_err());
        hd.close_pow_mining();
        // a second close is a no-op
        hd.close_pow_mining();
        assert!(gate.blocking_recv().is_err());
    }

    #[tokio::test]
    async fn reply_channel_backpressure() {
        let (hd, mut reply_rx) = HeaderDownload::new();
        let reply: EngineReply = Ok(PayloadStatus::from_status(PayloadStatusEnum::Syncing));
        hd.send_reply(reply.clone()).await.unwrap();

        // the channel has capacity one: the second send blocks until the
        // facade consumes the first reply
        let pending = hd.send_reply(reply.clone());
        tokio::pin!(pending);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(10), &mut pending)
                .await
                .is_err()
        );

        assert!(reply_rx.recv().await.is_some());
        pending.await.unwrap();
        assert!(reply_rx.recv().await.is_some());
    }
}
