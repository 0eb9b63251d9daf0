use hearth_db::{transaction::Database, DatabaseError, DbTx};
use std::{fmt, ops::Deref};

/// The database transaction a stage runs against, with the authority to
/// commit it mid-run.
///
/// The headers stage must not release a `VALID` reply that refers to state
/// the consensus layer could not observe after a crash. To get there, the
/// stage commits the active transaction *before* releasing any deferred
/// reply, then keeps going: `StageTx` hands out the active transaction
/// through [`Deref`] and swaps in a successor whenever [`StageTx::commit`]
/// is called, so to the stage code the database handle simply stays usable
/// across the durability point.
pub struct StageTx<'db, DB: Database> {
    db: &'db DB,
    active: Option<DB::TXMut>,
}

impl<'db, DB: Database> fmt::Debug for StageTx<'db, DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageTx").field("active", &self.active.is_some()).finish()
    }
}

impl<'db, DB: Database> Deref for StageTx<'db, DB> {
    type Target = DB::TXMut;

    /// Returns the active transaction.
    ///
    /// # Panics
    ///
    /// If the last commit failed to start a successor transaction. Stage
    /// code treats a commit error as fatal for the invocation, so the
    /// container is never used in that state.
    fn deref(&self) -> &Self::Target {
        self.active.as_ref().expect("no active stage transaction after a failed commit")
    }
}

impl<'db, DB: Database> StageTx<'db, DB> {
    /// Starts a transaction on the given database.
    pub fn new(db: &'db DB) -> Result<Self, DatabaseError> {
        Ok(Self { db, active: Some(db.tx_mut()?) })
    }

    /// The underlying database handle.
    pub fn db(&self) -> &'db DB {
        self.db
    }

    /// Makes everything written so far durable and starts a successor
    /// transaction.
    ///
    /// The successor is only opened after the commit succeeds, so it
    /// observes the committed state.
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        if let Some(active) = self.active.take() {
            active.commit()?;
        }
        self.active = Some(self.db.tx_mut()?);
        Ok(())
    }
}
