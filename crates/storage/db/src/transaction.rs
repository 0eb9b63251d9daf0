//! Transaction traits of the storage backend.

use crate::{cursor::DbCursorRO, table::Table, DatabaseError};

/// A read-only database transaction.
pub trait DbTx: Send + Sync {
    /// The read cursor type.
    type Cursor<T: Table>: DbCursorRO<T> + Send + Sync;

    /// Gets the value for the given key.
    fn get<T: Table>(&self, key: T::Key) -> Result<Option<T::Value>, DatabaseError>;

    /// Commits the transaction.
    ///
    /// For read-only transactions this only releases the snapshot.
    fn commit(self) -> Result<bool, DatabaseError>;

    /// Aborts the transaction, discarding any buffered writes.
    fn abort(self);

    /// Opens a read cursor over the given table.
    fn cursor_read<T: Table>(&self) -> Result<Self::Cursor<T>, DatabaseError>;
}

/// A read-write database transaction.
///
/// Writes are buffered until [`DbTx::commit`] is called.
pub trait DbTxMut: Send + Sync {
    /// Puts the given value under the given key.
    fn put<T: Table>(&self, key: T::Key, value: T::Value) -> Result<(), DatabaseError>;

    /// Deletes the entry with the given key, returning whether it existed.
    fn delete<T: Table>(&self, key: T::Key) -> Result<bool, DatabaseError>;

    /// Removes every entry of the given table.
    fn clear<T: Table>(&self) -> Result<(), DatabaseError>;

    /// Puts an already-encoded entry into a table.
    ///
    /// This is the replay path of [`crate::MemoryOverlay::flush`], which holds
    /// its buffered writes in encoded form.
    fn put_encoded(
        &self,
        table: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), DatabaseError>;

    /// Deletes an entry by its encoded key.
    fn delete_encoded(&self, table: &'static str, key: &[u8]) -> Result<bool, DatabaseError>;
}

/// Main database trait that spawns transactions.
pub trait Database: Send + Sync {
    /// Read-only transaction type.
    type TX: DbTx;
    /// Read-write transaction type.
    type TXMut: DbTx + DbTxMut;

    /// Creates a read-only transaction.
    fn tx(&self) -> Result<Self::TX, DatabaseError>;

    /// Creates a read-write transaction.
    fn tx_mut(&self) -> Result<Self::TXMut, DatabaseError>;

    /// Runs a closure with a read-only transaction, releasing it afterwards.
    fn view<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Self::TX) -> T,
    {
        let tx = self.tx()?;
        let res = f(&tx);
        tx.commit()?;
        Ok(res)
    }

    /// Runs a closure with a read-write transaction and commits it.
    fn update<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Self::TXMut) -> T,
    {
        let tx = self.tx_mut()?;
        let res = f(&tx);
        tx.commit()?;
        Ok(res)
    }
}
