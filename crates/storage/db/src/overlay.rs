//! Copy-on-write staging layer over a base transaction.
//!
//! The overlay captures writes keyed by `(table, encoded key)` while reads
//! fall through to the base transaction. It owns no reference to the base:
//! every call pairs it with whichever transaction is current via
//! [`OverlayTx`], so a staged chain head can outlive the transaction it was
//! built against and be rebound to the next one.

use crate::{
    table::{Decode, Encode, Table},
    transaction::{DbTx, DbTxMut},
    DatabaseError,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;

type OverlayKey = (&'static str, Vec<u8>);

/// Buffered writes of a speculative chain extension.
///
/// `None` values shadow deletions of base entries.
#[derive(Debug, Default)]
pub struct MemoryOverlay {
    writes: Mutex<BTreeMap<OverlayKey, Option<Vec<u8>>>>,
}

impl MemoryOverlay {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no writes are staged.
    pub fn is_empty(&self) -> bool {
        self.writes.lock().is_empty()
    }

    /// Replays the staged writes into the given transaction and clears the
    /// overlay.
    pub fn flush<Tx: DbTxMut>(&self, tx: &Tx) -> Result<(), DatabaseError> {
        let writes = std::mem::take(&mut *self.writes.lock());
        for ((table, key), value) in writes {
            match value {
                Some(value) => tx.put_encoded(table, key, value)?,
                None => {
                    tx.delete_encoded(table, &key)?;
                }
            }
        }
        Ok(())
    }

    /// Discards the staged writes.
    pub fn rollback(&self) {
        self.writes.lock().clear();
    }
}

/// A [`MemoryOverlay`] bound to a base transaction for the duration of one
/// call.
///
/// Implements the transaction traits so that the state-transition capability
/// can be handed a single handle: reads consult the overlay first and fall
/// through to the base; writes are captured by the overlay. Cursors read the
/// base transaction only.
#[derive(Debug)]
pub struct OverlayTx<'a, Tx> {
    base: &'a Tx,
    overlay: &'a MemoryOverlay,
}

impl<'a, Tx> OverlayTx<'a, Tx> {
    /// Binds the overlay to the given base transaction.
    pub fn new(base: &'a Tx, overlay: &'a MemoryOverlay) -> Self {
        Self { base, overlay }
    }

    /// Returns the base transaction.
    pub fn base(&self) -> &'a Tx {
        self.base
    }
}

impl<'a, Tx: DbTx> DbTx for OverlayTx<'a, Tx> {
    type Cursor<T: Table> = Tx::Cursor<T>;

    fn get<T: Table>(&self, key: T::Key) -> Result<Option<T::Value>, DatabaseError> {
        let encoded = key.clone().encode();
        let staged = {
            let writes = self.overlay.writes.lock();
            writes.get(&(T::NAME, encoded.as_ref().to_vec())).cloned()
        };
        match staged {
            Some(Some(raw)) => Ok(Some(T::Value::decode(&raw)?)),
            Some(None) => Ok(None),
            None => self.base.get::<T>(key),
        }
    }

    fn commit(self) -> Result<bool, DatabaseError> {
        // Staged writes stay in the overlay until it is flushed.
        Ok(false)
    }

    fn abort(self) {}

    fn cursor_read<T: Table>(&self) -> Result<Self::Cursor<T>, DatabaseError> {
        self.base.cursor_read::<T>()
    }
}

impl<'a, Tx: DbTx> DbTxMut for OverlayTx<'a, Tx> {
    fn put<T: Table>(&self, key: T::Key, value: T::Value) -> Result<(), DatabaseError> {
        self.put_encoded(T::NAME, key.encode().as_ref().to_vec(), value.encode().as_ref().to_vec())
    }

    fn delete<T: Table>(&self, key: T::Key) -> Result<bool, DatabaseError> {
        self.delete_encoded(T::NAME, key.encode().as_ref())
    }

    fn clear<T: Table>(&self) -> Result<(), DatabaseError> {
        Err(DatabaseError::Backend("cannot clear a table through an overlay".into()))
    }

    fn put_encoded(
        &self,
        table: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), DatabaseError> {
        self.overlay.writes.lock().insert((table, key), Some(value));
        Ok(())
    }

    fn delete_encoded(&self, table: &'static str, key: &[u8]) -> Result<bool, DatabaseError> {
        let previous =
            self.overlay.writes.lock().insert((table, key.to_vec()), None).flatten().is_some();
        Ok(previous)
    }
}
