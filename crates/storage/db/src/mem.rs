//! In-memory implementation of the transactional storage contract.
//!
//! Transactions operate on a snapshot of the whole store; committing a
//! read-write transaction publishes the snapshot back. This gives the same
//! single-writer semantics the stage loop relies on with a persistent
//! backend, and is the database used by the test suites.

use crate::{
    cursor::{DbCursorRO, PairResult},
    table::{Decode, Encode, Table},
    transaction::{Database, DbTx, DbTxMut},
    DatabaseError,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, HashMap},
    marker::PhantomData,
    sync::Arc,
};

type TableData = BTreeMap<Vec<u8>, Vec<u8>>;
type StoreData = HashMap<&'static str, TableData>;

/// An in-memory key-value store.
#[derive(Debug, Clone, Default)]
pub struct MemDb {
    store: Arc<RwLock<StoreData>>,
}

impl MemDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemDb {
    type TX = MemTx;
    type TXMut = MemTx;

    fn tx(&self) -> Result<Self::TX, DatabaseError> {
        Ok(MemTx { data: Mutex::new(self.store.read().clone()), store: None })
    }

    fn tx_mut(&self) -> Result<Self::TXMut, DatabaseError> {
        Ok(MemTx {
            data: Mutex::new(self.store.read().clone()),
            store: Some(Arc::clone(&self.store)),
        })
    }
}

/// A transaction over [`MemDb`].
///
/// Holds a snapshot of the store; writes mutate the snapshot and become
/// visible to others only on commit.
#[derive(Debug)]
pub struct MemTx {
    data: Mutex<StoreData>,
    /// Present for read-write transactions; commit publishes into it.
    store: Option<Arc<RwLock<StoreData>>>,
}

impl DbTx for MemTx {
    type Cursor<T: Table> = MemCursor<T>;

    fn get<T: Table>(&self, key: T::Key) -> Result<Option<T::Value>, DatabaseError> {
        let data = self.data.lock();
        let Some(table) = data.get(T::NAME) else { return Ok(None) };
        table.get(key.encode().as_ref()).map(|raw| T::Value::decode(raw)).transpose()
    }

    fn commit(self) -> Result<bool, DatabaseError> {
        if let Some(store) = &self.store {
            *store.write() = self.data.into_inner();
            return Ok(true)
        }
        Ok(false)
    }

    fn abort(self) {}

    fn cursor_read<T: Table>(&self) -> Result<Self::Cursor<T>, DatabaseError> {
        let data = self.data.lock();
        let entries = data
            .get(T::NAME)
            .map(|table| table.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(MemCursor { entries, pos: None, _marker: PhantomData })
    }
}

impl DbTxMut for MemTx {
    fn put<T: Table>(&self, key: T::Key, value: T::Value) -> Result<(), DatabaseError> {
        self.put_encoded(T::NAME, key.encode().as_ref().to_vec(), value.encode().as_ref().to_vec())
    }

    fn delete<T: Table>(&self, key: T::Key) -> Result<bool, DatabaseError> {
        self.delete_encoded(T::NAME, key.encode().as_ref())
    }

    fn clear<T: Table>(&self) -> Result<(), DatabaseError> {
        if self.store.is_none() {
            return Err(DatabaseError::ReadOnly)
        }
        self.data.lock().remove(T::NAME);
        Ok(())
    }

    fn put_encoded(
        &self,
        table: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), DatabaseError> {
        if self.store.is_none() {
            return Err(DatabaseError::ReadOnly)
        }
        self.data.lock().entry(table).or_default().insert(key, value);
        Ok(())
    }

    fn delete_encoded(&self, table: &'static str, key: &[u8]) -> Result<bool, DatabaseError> {
        if self.store.is_none() {
            return Err(DatabaseError::ReadOnly)
        }
        Ok(self.data.lock().get_mut(table).map(|t| t.remove(key).is_some()).unwrap_or(false))
    }
}

/// A cursor over a snapshot of one table.
#[derive(Debug)]
pub struct MemCursor<T: Table> {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
    _marker: PhantomData<T>,
}

impl<T: Table> MemCursor<T> {
    fn entry(&self, pos: usize) -> PairResult<T> {
        let Some((key, value)) = self.entries.get(pos) else { return Ok(None) };
        Ok(Some((T::Key::decode(key)?, T::Value::decode(value)?)))
    }

    fn position(&mut self, pos: usize) -> PairResult<T> {
        if pos >= self.entries.len() {
            self.pos = None;
            return Ok(None)
        }
        self.pos = Some(pos);
        self.entry(pos)
    }
}

impl<T: Table> DbCursorRO<T> for MemCursor<T> {
    fn first(&mut self) -> PairResult<T> {
        self.position(0)
    }

    fn seek(&mut self, key: T::Key) -> PairResult<T> {
        let encoded = key.encode();
        let pos = self.entries.partition_point(|(k, _)| k.as_slice() < encoded.as_ref());
        self.position(pos)
    }

    fn seek_exact(&mut self, key: T::Key) -> PairResult<T> {
        let encoded = key.encode();
        match self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(encoded.as_ref())) {
            Ok(pos) => self.position(pos),
            Err(_) => {
                self.pos = None;
                Ok(None)
            }
        }
    }

    fn next(&mut self) -> PairResult<T> {
        match self.pos {
            Some(pos) => self.position(pos + 1),
            None => self.first(),
        }
    }

    fn prev(&mut self) -> PairResult<T> {
        match self.pos {
            Some(0) => {
                self.pos = None;
                Ok(None)
            }
            Some(pos) => self.position(pos - 1),
            None => self.last(),
        }
    }

    fn last(&mut self) -> PairResult<T> {
        match self.entries.len() {
            0 => {
                self.pos = None;
                Ok(None)
            }
            len => self.position(len - 1),
        }
    }
}
