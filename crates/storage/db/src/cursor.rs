//! Read cursors over database tables.

use crate::{table::Table, DatabaseError};
use std::marker::PhantomData;

/// Alias type for a `(key, value)` result coming from a cursor.
pub type PairResult<T> = Result<Option<(<T as Table>::Key, <T as Table>::Value)>, DatabaseError>;

/// A read-only cursor over a table.
///
/// Iteration follows the byte-wise order of encoded keys.
pub trait DbCursorRO<T: Table> {
    /// Positions the cursor at the first entry of the table.
    fn first(&mut self) -> PairResult<T>;

    /// Positions the cursor at the first entry whose key is greater than or
    /// equal to `key`.
    fn seek(&mut self, key: T::Key) -> PairResult<T>;

    /// Positions the cursor at the entry with exactly the given key.
    fn seek_exact(&mut self, key: T::Key) -> PairResult<T>;

    /// Moves the cursor to the next entry.
    #[allow(clippy::should_implement_trait)]
    fn next(&mut self) -> PairResult<T>;

    /// Moves the cursor to the previous entry.
    fn prev(&mut self) -> PairResult<T>;

    /// Positions the cursor at the last entry of the table.
    fn last(&mut self) -> PairResult<T>;

    /// Returns an iterator that walks forward, starting at `start_key` (or the
    /// first entry when `None`).
    fn walk(&mut self, start_key: Option<T::Key>) -> Result<Walker<'_, T, Self>, DatabaseError>
    where
        Self: Sized,
    {
        let start = match start_key {
            Some(key) => self.seek(key)?,
            None => self.first()?,
        };
        Ok(Walker { cursor: self, start: Some(Ok(start)), _marker: PhantomData })
    }
}

/// Forward iterator over a cursor.
#[derive(Debug)]
pub struct Walker<'cursor, T: Table, C: DbCursorRO<T>> {
    cursor: &'cursor mut C,
    start: Option<PairResult<T>>,
    _marker: PhantomData<T>,
}

impl<'cursor, T: Table, C: DbCursorRO<T>> Iterator for Walker<'cursor, T, C> {
    type Item = Result<(T::Key, T::Value), DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(start) = self.start.take() {
            return start.transpose()
        }
        self.cursor.next().transpose()
    }
}
