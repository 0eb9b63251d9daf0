#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Trait seams between the hearth header pipeline and its external
//! collaborators: the consensus rules, the transaction pool, the body
//! downloader and the new-headers subscribers.

/// Consensus traits.
pub mod consensus;

/// Seams towards the transaction pool, body downloader and header
/// subscribers.
pub mod events;

/// Shared test helpers.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use consensus::{Consensus, ConsensusError};
pub use events::{BodyDownloader, HeadersNotifier, StateChangeAccumulator};
