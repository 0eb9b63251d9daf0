use crate::{BlockNumHash, BlockNumber};
use alloy_primitives::{keccak256, Bytes, B256, U256};
use alloy_rlp::{length_of_length, BufMut, Decodable, Encodable};
use derive_more::{AsRef, Deref};

/// A block header.
///
/// Headers are immutable once sealed; everything in this pipeline addresses
/// them by `keccak256` of their RLP encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Header {
    /// The hash of the parent block's header.
    pub parent_hash: B256,
    /// The hash of the ommers list portion of this block.
    pub ommers_hash: B256,
    /// The state root after all transactions are executed and finalisations applied.
    pub state_root: B256,
    /// The root of the transactions trie of the block.
    pub transactions_root: B256,
    /// The root of the receipts trie of the block.
    pub receipts_root: B256,
    /// The difficulty of the block. Zero after the Proof-of-Stake transition.
    pub difficulty: U256,
    /// The number of ancestor blocks (the block height).
    pub number: BlockNumber,
    /// The gas limit of the block.
    pub gas_limit: u64,
    /// The total gas used by transactions in the block.
    pub gas_used: u64,
    /// The unix timestamp at which the block was created.
    pub timestamp: u64,
    /// Arbitrary bytes chosen by the block producer.
    pub extra_data: Bytes,
    /// The mix hash (PoW) or prev-randao (PoS) field.
    pub mix_hash: B256,
    /// The PoW nonce. Zero after the transition.
    pub nonce: u64,
    /// The base fee per gas, introduced by EIP-1559. Absent in legacy headers.
    pub base_fee_per_gas: Option<u64>,
}

impl Header {
    /// Heavy function that will calculate the hash of the header, re-encoding it in full.
    ///
    /// Prefer [`SealedHeader`] if the hash is needed more than once.
    pub fn hash_slow(&self) -> B256 {
        let mut out = Vec::<u8>::new();
        self.encode(&mut out);
        keccak256(&out)
    }

    /// Seal the header with its computed hash.
    pub fn seal_slow(self) -> SealedHeader {
        let hash = self.hash_slow();
        SealedHeader::new(self, hash)
    }

    /// Seal the header with a known hash.
    ///
    /// WARNING: the hash is not verified against the header contents.
    pub fn seal(self, hash: B256) -> SealedHeader {
        SealedHeader::new(self, hash)
    }

    /// Returns whether the header carries a non-zero difficulty, i.e. belongs
    /// to the Proof-of-Work range of the chain.
    pub fn is_pow(&self) -> bool {
        !self.difficulty.is_zero()
    }

    fn header_payload_length(&self) -> usize {
        let mut length = 0;
        length += self.parent_hash.length();
        length += self.ommers_hash.length();
        length += self.state_root.length();
        length += self.transactions_root.length();
        length += self.receipts_root.length();
        length += self.difficulty.length();
        length += self.number.length();
        length += self.gas_limit.length();
        length += self.gas_used.length();
        length += self.timestamp.length();
        length += self.extra_data.length();
        length += self.mix_hash.length();
        length += self.nonce.length();
        if let Some(base_fee) = self.base_fee_per_gas {
            length += base_fee.length();
        }
        length
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn BufMut) {
        let list_header =
            alloy_rlp::Header { list: true, payload_length: self.header_payload_length() };
        list_header.encode(out);
        self.parent_hash.encode(out);
        self.ommers_hash.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        // The base fee is elided entirely in legacy headers.
        if let Some(base_fee) = self.base_fee_per_gas {
            base_fee.encode(out);
        }
    }

    fn length(&self) -> usize {
        let mut length = 0;
        length += self.header_payload_length();
        length += length_of_length(length);
        length
    }
}

impl Decodable for Header {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let started_len = buf.len();
        let mut this = Self {
            parent_hash: Decodable::decode(buf)?,
            ommers_hash: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            transactions_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            difficulty: Decodable::decode(buf)?,
            number: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            extra_data: Decodable::decode(buf)?,
            mix_hash: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            base_fee_per_gas: None,
        };
        if started_len - buf.len() < rlp_head.payload_length {
            this.base_fee_per_gas = Some(Decodable::decode(buf)?);
        }
        let consumed = started_len - buf.len();
        if consumed != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: consumed,
            })
        }
        Ok(this)
    }
}

/// A [`Header`] that is sealed at a precalculated hash, use
/// [`SealedHeader::unseal`] if you want to modify the header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, AsRef, Deref)]
pub struct SealedHeader {
    /// Locked header hash.
    hash: B256,
    /// Locked header fields.
    #[as_ref]
    #[deref]
    header: Header,
}

impl SealedHeader {
    /// Creates the sealed header with the corresponding block hash.
    pub const fn new(header: Header, hash: B256) -> Self {
        Self { header, hash }
    }

    /// Returns the sealed header fields.
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the header hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// Extract the raw header that can be modified.
    pub fn unseal(self) -> Header {
        self.header
    }

    /// Splits the sealed header into the raw header and its hash.
    pub fn split(self) -> (Header, B256) {
        (self.header, self.hash)
    }

    /// Returns the block number and hash as a composite key.
    pub fn num_hash(&self) -> BlockNumHash {
        BlockNumHash(self.number, self.hash)
    }
}

impl Encodable for SealedHeader {
    fn encode(&self, out: &mut dyn BufMut) {
        self.header.encode(out);
    }

    fn length(&self) -> usize {
        self.header.length()
    }
}

impl Decodable for SealedHeader {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let b = &mut &**buf;
        let started_len = buf.len();
        let header = Header::decode(b)?;

        // hash the consumed bytes, i.e. the rlp encoded header
        let consumed = started_len - b.len();
        let hash = keccak256(&buf[..consumed]);

        *buf = *b;
        Ok(Self { header, hash })
    }
}
