//! Low-level accessors for the chain tables.
//!
//! These are thin typed wrappers over [`DbTx`]/[`DbTxMut`] used throughout
//! the sync stages; they make no decisions beyond mapping between keys and
//! rows.

use crate::{
    cursor::DbCursorRO,
    tables,
    tables::ChainStateKey,
    transaction::{DbTx, DbTxMut},
    DatabaseError,
};
use alloy_primitives::{B256, U256};
use hearth_primitives::{BlockNumHash, BlockNumber, Header, RawBody, SealedHeader};

/// Reads the canonical hash at the given height.
pub fn read_canonical_hash<Tx: DbTx>(
    tx: &Tx,
    number: BlockNumber,
) -> Result<Option<B256>, DatabaseError> {
    tx.get::<tables::CanonicalHeaders>(number)
}

/// Marks the given hash as canonical at the given height.
pub fn write_canonical_hash<Tx: DbTxMut>(
    tx: &Tx,
    number: BlockNumber,
    hash: B256,
) -> Result<(), DatabaseError> {
    tx.put::<tables::CanonicalHeaders>(number, hash)
}

/// Removes all canonical markers above the given height.
///
/// Header and total-difficulty rows are left in place.
pub fn truncate_canonical_above<Tx: DbTx + DbTxMut>(
    tx: &Tx,
    number: BlockNumber,
) -> Result<(), DatabaseError> {
    let mut cursor = tx.cursor_read::<tables::CanonicalHeaders>()?;
    let mut entry = cursor.seek(number + 1)?;
    while let Some((key, _)) = entry {
        tx.delete::<tables::CanonicalHeaders>(key)?;
        entry = cursor.next()?;
    }
    Ok(())
}

/// Returns whether the given hash is part of the canonical chain.
///
/// The zero hash is never canonical.
pub fn is_canonical_hash<Tx: DbTx>(tx: &Tx, hash: B256) -> Result<bool, DatabaseError> {
    if hash.is_zero() {
        return Ok(false)
    }
    let Some(number) = read_header_number(tx, hash)? else { return Ok(false) };
    Ok(read_canonical_hash(tx, number)? == Some(hash))
}

/// Reads the height of the header with the given hash.
pub fn read_header_number<Tx: DbTx>(
    tx: &Tx,
    hash: B256,
) -> Result<Option<BlockNumber>, DatabaseError> {
    tx.get::<tables::HeaderNumbers>(hash)
}

/// Reads a header by hash and height.
pub fn read_header<Tx: DbTx>(
    tx: &Tx,
    hash: B256,
    number: BlockNumber,
) -> Result<Option<Header>, DatabaseError> {
    tx.get::<tables::Headers>(BlockNumHash(number, hash))
}

/// Reads a header by hash alone, resolving the height first.
pub fn read_header_by_hash<Tx: DbTx>(
    tx: &Tx,
    hash: B256,
) -> Result<Option<SealedHeader>, DatabaseError> {
    let Some(number) = read_header_number(tx, hash)? else { return Ok(None) };
    Ok(read_header(tx, hash, number)?.map(|header| header.seal(hash)))
}

/// Writes a header together with its hash-to-number index entry.
pub fn write_header<Tx: DbTxMut>(tx: &Tx, header: &SealedHeader) -> Result<(), DatabaseError> {
    tx.put::<tables::HeaderNumbers>(header.hash(), header.number)?;
    tx.put::<tables::Headers>(header.num_hash(), header.header().clone())
}

/// Reads the total difficulty accumulated up to the given header.
pub fn read_td<Tx: DbTx>(
    tx: &Tx,
    hash: B256,
    number: BlockNumber,
) -> Result<Option<U256>, DatabaseError> {
    tx.get::<tables::HeaderTD>(BlockNumHash(number, hash))
}

/// Writes the total difficulty row of the given header.
pub fn write_td<Tx: DbTxMut>(
    tx: &Tx,
    hash: B256,
    number: BlockNumber,
    td: U256,
) -> Result<(), DatabaseError> {
    tx.put::<tables::HeaderTD>(BlockNumHash(number, hash), td)
}

/// Reads a raw block body.
pub fn read_body<Tx: DbTx>(
    tx: &Tx,
    hash: B256,
    number: BlockNumber,
) -> Result<Option<RawBody>, DatabaseError> {
    tx.get::<tables::BlockBodies>(BlockNumHash(number, hash))
}

/// Writes a raw block body.
pub fn write_body<Tx: DbTxMut>(
    tx: &Tx,
    hash: B256,
    number: BlockNumber,
    body: &RawBody,
) -> Result<(), DatabaseError> {
    tx.put::<tables::BlockBodies>(BlockNumHash(number, hash), body.clone())
}

/// Returns whether a body row exists for the given block.
pub fn has_body<Tx: DbTx>(tx: &Tx, hash: B256, number: BlockNumber) -> Result<bool, DatabaseError> {
    Ok(read_body(tx, hash, number)?.is_some())
}

fn read_chain_state<Tx: DbTx>(
    tx: &Tx,
    key: ChainStateKey,
) -> Result<Option<B256>, DatabaseError> {
    tx.get::<tables::ChainState>(key)
}

/// Reads the hash of the latest known header.
pub fn read_head_header_hash<Tx: DbTx>(tx: &Tx) -> Result<Option<B256>, DatabaseError> {
    read_chain_state(tx, ChainStateKey::HeadHeader)
}

/// Writes the hash of the latest known header.
pub fn write_head_header_hash<Tx: DbTxMut>(tx: &Tx, hash: B256) -> Result<(), DatabaseError> {
    tx.put::<tables::ChainState>(ChainStateKey::HeadHeader, hash)
}

/// Reads the hash of the latest fully processed block.
pub fn read_head_block_hash<Tx: DbTx>(tx: &Tx) -> Result<Option<B256>, DatabaseError> {
    read_chain_state(tx, ChainStateKey::HeadBlock)
}

/// Writes the hash of the latest fully processed block.
pub fn write_head_block_hash<Tx: DbTxMut>(tx: &Tx, hash: B256) -> Result<(), DatabaseError> {
    tx.put::<tables::ChainState>(ChainStateKey::HeadBlock, hash)
}

/// Reads the stored forkchoice head pointer.
pub fn read_forkchoice_head<Tx: DbTx>(tx: &Tx) -> Result<Option<B256>, DatabaseError> {
    read_chain_state(tx, ChainStateKey::ForkchoiceHead)
}

/// Writes the forkchoice head pointer.
pub fn write_forkchoice_head<Tx: DbTxMut>(tx: &Tx, hash: B256) -> Result<(), DatabaseError> {
    tx.put::<tables::ChainState>(ChainStateKey::ForkchoiceHead, hash)
}

/// Reads the stored forkchoice safe pointer.
pub fn read_forkchoice_safe<Tx: DbTx>(tx: &Tx) -> Result<Option<B256>, DatabaseError> {
    read_chain_state(tx, ChainStateKey::ForkchoiceSafe)
}

/// Writes the forkchoice safe pointer.
pub fn write_forkchoice_safe<Tx: DbTxMut>(tx: &Tx, hash: B256) -> Result<(), DatabaseError> {
    tx.put::<tables::ChainState>(ChainStateKey::ForkchoiceSafe, hash)
}

/// Reads the stored forkchoice finalized pointer.
pub fn read_forkchoice_finalized<Tx: DbTx>(tx: &Tx) -> Result<Option<B256>, DatabaseError> {
    read_chain_state(tx, ChainStateKey::ForkchoiceFinalized)
}

/// Writes the forkchoice finalized pointer.
pub fn write_forkchoice_finalized<Tx: DbTxMut>(tx: &Tx, hash: B256) -> Result<(), DatabaseError> {
    tx.put::<tables::ChainState>(ChainStateKey::ForkchoiceFinalized, hash)
}

/// Reads the height of the latest known header.
pub fn read_current_height<Tx: DbTx>(tx: &Tx) -> Result<Option<BlockNumber>, DatabaseError> {
    let Some(hash) = read_head_header_hash(tx)? else { return Ok(None) };
    read_header_number(tx, hash)
}

/// Returns whether the chain has accumulated at least the terminal total
/// difficulty at the given canonical height.
pub fn transitioned<Tx: DbTx>(
    tx: &Tx,
    number: BlockNumber,
    terminal_total_difficulty: U256,
) -> Result<bool, DatabaseError> {
    let Some(hash) = read_canonical_hash(tx, number)? else { return Ok(false) };
    let Some(td) = read_td(tx, hash, number)? else { return Ok(false) };
    Ok(td >= terminal_total_difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mem::MemDb, transaction::Database};

    #[test]
    fn truncate_leaves_rows_at_and_below() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        for number in 0u64..10 {
            write_canonical_hash(&tx, number, B256::with_last_byte(number as u8)).unwrap();
        }
        truncate_canonical_above(&tx, 4).unwrap();

        for number in 0u64..=4 {
            assert!(read_canonical_hash(&tx, number).unwrap().is_some());
        }
        for number in 5u64..10 {
            assert_eq!(read_canonical_hash(&tx, number).unwrap(), None);
        }
    }

    #[test]
    fn canonical_hash_check_resolves_through_number_index() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let header = Header { number: 3, ..Default::default() }.seal_slow();
        write_header(&tx, &header).unwrap();

        assert!(!is_canonical_hash(&tx, header.hash()).unwrap());
        write_canonical_hash(&tx, 3, header.hash()).unwrap();
        assert!(is_canonical_hash(&tx, header.hash()).unwrap());
        assert!(!is_canonical_hash(&tx, B256::ZERO).unwrap());
    }

    #[test]
    fn transition_check_requires_td_row() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let hash = B256::with_last_byte(1);
        write_canonical_hash(&tx, 10, hash).unwrap();
        assert!(!transitioned(&tx, 10, U256::from(1000)).unwrap());

        write_td(&tx, hash, 10, U256::from(1500)).unwrap();
        assert!(transitioned(&tx, 10, U256::from(1000)).unwrap());
        assert!(!transitioned(&tx, 10, U256::from(2000)).unwrap());
    }
}
