#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Storage abstraction for the hearth sync pipeline.
//!
//! The persistent key-value backend is an external collaborator; this crate
//! defines the transactional contract ([`Database`], [`DbTx`], [`DbTxMut`]),
//! the table declarations, low-level read/write helpers ([`rawdb`]), and the
//! copy-on-write [`MemoryOverlay`] used to stage a speculative chain head
//! without committing it.
//!
//! [`mem::MemDb`] implements the contract in memory and is the backend used
//! throughout the test suites.

pub mod cursor;
mod error;
pub mod mem;
mod overlay;
pub mod rawdb;
pub mod table;
pub mod tables;
pub mod transaction;

pub use error::DatabaseError;
pub use mem::MemDb;
pub use overlay::{MemoryOverlay, OverlayTx};
pub use transaction::{Database, DbTx, DbTxMut};
