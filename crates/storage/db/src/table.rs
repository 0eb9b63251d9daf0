//! Traits that describe how table keys and values are laid out as bytes.

use crate::DatabaseError;
use alloy_primitives::{B256, U256};
use hearth_primitives::{BlockNumHash, Header, RawBody};
use std::fmt::Debug;

/// Trait that transforms data going into the database.
///
/// Key encodings must preserve ordering: the byte-wise order of encoded keys
/// is the iteration order of cursors.
pub trait Encode: Send + Sync + Sized + Debug {
    /// Encoded type.
    type Encoded: AsRef<[u8]> + Send + Sync;

    /// Encodes the value for storage.
    fn encode(self) -> Self::Encoded;
}

/// Trait that transforms data coming out of the database.
pub trait Decode: Send + Sync + Sized + Debug {
    /// Decodes a stored value.
    fn decode(value: &[u8]) -> Result<Self, DatabaseError>;
}

/// Marker trait for types usable as table keys.
pub trait Key: Encode + Decode + Ord + Clone {}

impl<T> Key for T where T: Encode + Decode + Ord + Clone {}

/// Marker trait for types usable as table values.
pub trait Value: Encode + Decode + Clone {}

impl<T> Value for T where T: Encode + Decode + Clone {}

/// A database table.
pub trait Table: Send + Sync + Debug + 'static {
    /// The name of the table as present in the backend.
    const NAME: &'static str;
    /// Key element of the table.
    type Key: Key;
    /// Value element of the table.
    type Value: Value;
}

impl Encode for u64 {
    type Encoded = [u8; 8];

    fn encode(self) -> Self::Encoded {
        self.to_be_bytes()
    }
}

impl Decode for u64 {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        let bytes: [u8; 8] = value.try_into().map_err(|_| DatabaseError::Decode("u64"))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

impl Encode for B256 {
    type Encoded = [u8; 32];

    fn encode(self) -> Self::Encoded {
        self.0
    }
}

impl Decode for B256 {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 32 {
            return Err(DatabaseError::Decode("B256"))
        }
        Ok(B256::from_slice(value))
    }
}

impl Encode for U256 {
    type Encoded = [u8; 32];

    fn encode(self) -> Self::Encoded {
        self.to_be_bytes::<32>()
    }
}

impl Decode for U256 {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 32 {
            return Err(DatabaseError::Decode("U256"))
        }
        Ok(U256::from_be_slice(value))
    }
}

impl Encode for Vec<u8> {
    type Encoded = Vec<u8>;

    fn encode(self) -> Self::Encoded {
        self
    }
}

impl Decode for Vec<u8> {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        Ok(value.to_vec())
    }
}

impl Encode for BlockNumHash {
    type Encoded = [u8; 40];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 40];
        out[..8].copy_from_slice(&self.number().to_be_bytes());
        out[8..].copy_from_slice(self.hash().as_slice());
        out
    }
}

impl Decode for BlockNumHash {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 40 {
            return Err(DatabaseError::Decode("BlockNumHash"))
        }
        let number = u64::decode(&value[..8])?;
        let hash = B256::decode(&value[8..])?;
        Ok(Self(number, hash))
    }
}

impl Encode for Header {
    type Encoded = Vec<u8>;

    fn encode(self) -> Self::Encoded {
        let mut out = Vec::new();
        alloy_rlp::Encodable::encode(&self, &mut out);
        out
    }
}

impl Decode for Header {
    fn decode(mut value: &[u8]) -> Result<Self, DatabaseError> {
        alloy_rlp::Decodable::decode(&mut value).map_err(|_| DatabaseError::Decode("Header"))
    }
}

impl Encode for RawBody {
    type Encoded = Vec<u8>;

    fn encode(self) -> Self::Encoded {
        let mut out = Vec::new();
        alloy_rlp::Encodable::encode(&self, &mut out);
        out
    }
}

impl Decode for RawBody {
    fn decode(mut value: &[u8]) -> Result<Self, DatabaseError> {
        alloy_rlp::Decodable::decode(&mut value).map_err(|_| DatabaseError::Decode("RawBody"))
    }
}
