use crate::{Header, SealedHeader};
use alloy_primitives::Bytes;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use derive_more::Deref;

/// An opaque block body.
///
/// Transactions are kept in their RLP-encoded form; this pipeline never
/// interprets them, it only stores them and hands them back to the state
/// transition or the transaction pool.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct RawBody {
    /// RLP-encoded transactions.
    pub transactions: Vec<Bytes>,
    /// Ommer headers.
    pub ommers: Vec<Header>,
}

impl RawBody {
    /// Returns `true` if the body carries neither transactions nor ommers.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.ommers.is_empty()
    }
}

/// A sealed block: a sealed header together with its raw body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deref)]
pub struct SealedBlock {
    /// The sealed block header.
    #[deref]
    pub header: SealedHeader,
    /// The undecoded block body.
    pub body: RawBody,
}

impl SealedBlock {
    /// Creates a new sealed block.
    pub const fn new(header: SealedHeader, body: RawBody) -> Self {
        Self { header, body }
    }

    /// Splits the block into its header and body.
    pub fn split(self) -> (SealedHeader, RawBody) {
        (self.header, self.body)
    }
}

impl From<SealedHeader> for SealedBlock {
    fn from(header: SealedHeader) -> Self {
        Self { header, body: RawBody::default() }
    }
}
