//! Random header and chain generators.

use hearth_primitives::{BlockNumber, Header, SealedHeader, B256, U256};
use rand::Rng;
use std::ops::Range;

/// Generates a random header with the given number and parent.
pub fn random_header(number: BlockNumber, parent: Option<B256>) -> SealedHeader {
    let mut rng = rand::thread_rng();
    Header {
        parent_hash: parent.unwrap_or_else(B256::random),
        state_root: B256::random(),
        transactions_root: B256::random(),
        receipts_root: B256::random(),
        number,
        gas_limit: 30_000_000,
        gas_used: rng.gen_range(0..30_000_000),
        timestamp: 1_600_000_000 + number * 12,
        base_fee_per_gas: Some(rng.gen_range(1..1_000)),
        ..Default::default()
    }
    .seal_slow()
}

/// Generates a range of random headers, each the child of the previous one.
///
/// The parent of the first header is `head`.
pub fn random_header_range(range: Range<BlockNumber>, head: B256) -> Vec<SealedHeader> {
    let mut headers = Vec::with_capacity(range.end.saturating_sub(range.start) as usize);
    for number in range {
        let parent = headers.last().map(|h: &SealedHeader| h.hash()).unwrap_or(head);
        headers.push(random_header(number, Some(parent)));
    }
    headers
}

/// Generates a random header in the Proof-of-Work range, i.e. with a
/// non-zero difficulty.
pub fn random_pow_header(number: BlockNumber, parent: Option<B256>) -> SealedHeader {
    let mut rng = rand::thread_rng();
    let mut header = random_header(number, parent).unseal();
    header.difficulty = U256::from(rng.gen_range(1u64..1_000_000));
    header.nonce = rng.gen();
    header.seal_slow()
}
