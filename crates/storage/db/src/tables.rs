//! Declaration of all database tables.

use crate::{
    table::{Decode, Encode, Table},
    DatabaseError,
};
use alloy_primitives::{B256, U256};
use hearth_primitives::{BlockNumHash, BlockNumber, Header, RawBody};

/// Macro to declare key-value tables.
macro_rules! table {
    ($(#[$docs:meta])+ ( $table_name:ident ) $key:ty | $value:ty) => {
        $(#[$docs])+
        ///
        #[doc = concat!("Takes [`", stringify!($key), "`] as a key and returns [`", stringify!($value), "`].")]
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $table_name;

        impl $crate::table::Table for $table_name {
            const NAME: &'static str = $table_name::const_name();
            type Key = $key;
            type Value = $value;
        }

        impl $table_name {
            #[doc = concat!("Return ", stringify!($table_name), " as it is present inside the database.")]
            pub const fn const_name() -> &'static str {
                stringify!($table_name)
            }
        }

        impl std::fmt::Display for $table_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", stringify!($table_name))
            }
        }
    };
}

/// Default tables that should be present inside the database.
pub const TABLES: [&str; 7] = [
    CanonicalHeaders::const_name(),
    Headers::const_name(),
    HeaderTD::const_name(),
    HeaderNumbers::const_name(),
    BlockBodies::const_name(),
    SyncStage::const_name(),
    ChainState::const_name(),
];

table!(
    /// Stores the header hashes belonging to the canonical chain.
    ( CanonicalHeaders ) BlockNumber | B256
);

table!(
    /// Stores all headers ever seen, canonical or not.
    ( Headers ) BlockNumHash | Header
);

table!(
    /// Stores the total difficulty accumulated up to each header.
    ( HeaderTD ) BlockNumHash | U256
);

table!(
    /// Stores the block number corresponding to a header hash.
    ( HeaderNumbers ) B256 | BlockNumber
);

table!(
    /// Stores raw block bodies.
    ( BlockBodies ) BlockNumHash | RawBody
);

table!(
    /// Stores the highest synced block number of each stage.
    ( SyncStage ) Vec<u8> | BlockNumber
);

table!(
    /// Stores chain head and forkchoice pointers under well-known keys.
    ( ChainState ) ChainStateKey | B256
);

/// Well-known keys of the [`ChainState`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChainStateKey {
    /// Hash of the latest known header.
    HeadHeader,
    /// Hash of the latest fully processed block.
    HeadBlock,
    /// Head block hash of the latest forkchoice message.
    ForkchoiceHead,
    /// Safe block hash of the latest forkchoice message.
    ForkchoiceSafe,
    /// Finalized block hash of the latest forkchoice message.
    ForkchoiceFinalized,
}

impl ChainStateKey {
    /// The key as present in the database.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::HeadHeader => "LastHeader",
            Self::HeadBlock => "LastBlock",
            Self::ForkchoiceHead => "ForkchoiceHead",
            Self::ForkchoiceSafe => "ForkchoiceSafe",
            Self::ForkchoiceFinalized => "ForkchoiceFinalized",
        }
    }
}

impl Encode for ChainStateKey {
    type Encoded = &'static [u8];

    fn encode(self) -> Self::Encoded {
        self.name().as_bytes()
    }
}

impl Decode for ChainStateKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        match value {
            b"LastHeader" => Ok(Self::HeadHeader),
            b"LastBlock" => Ok(Self::HeadBlock),
            b"ForkchoiceHead" => Ok(Self::ForkchoiceHead),
            b"ForkchoiceSafe" => Ok(Self::ForkchoiceSafe),
            b"ForkchoiceFinalized" => Ok(Self::ForkchoiceFinalized),
            _ => Err(DatabaseError::Decode(ChainState::NAME)),
        }
    }
}
