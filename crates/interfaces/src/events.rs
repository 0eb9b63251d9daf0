use hearth_primitives::{BlockNumber, Bytes, SealedBlock, B256};

/// Accumulates state changes and forwards them to the transaction pool.
///
/// The headers stage feeds this when a staged side fork is discarded, so the
/// pool can re-queue the transactions of the reverted block.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait StateChangeAccumulator: std::fmt::Debug + Send + Sync {
    /// Drops any pending change set and starts over at the given tick.
    fn reset(&self, tick: u64);

    /// Opens a change entry for the given block.
    ///
    /// `unwind` marks the change as a revert: the transactions are the ones
    /// leaving the canonical chain.
    fn start_change(&self, number: BlockNumber, hash: B256, txs: Vec<Bytes>, unwind: bool);

    /// Sends the accumulated changes to the pool and resets.
    ///
    /// The fee parameters are those of the block the pool should now build
    /// on top of.
    fn send_and_reset(&self, base_fee: u64, gas_limit: u64);
}

/// Prefetch sink of the block-body downloader.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait BodyDownloader: std::fmt::Debug + Send + Sync {
    /// Queues a block whose body will likely be requested soon.
    fn add_to_prefetch(&self, block: &SealedBlock);
}

/// Subscriber notified of newly canonical headers after each sync cycle.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HeadersNotifier: std::fmt::Debug + Send + Sync {
    /// Called with the RLP encoding of each header that became canonical.
    fn on_new_headers(&self, headers_rlp: Vec<Bytes>);
}
