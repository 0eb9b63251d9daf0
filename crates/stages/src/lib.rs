#![warn(unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Staged sync for the hearth header pipeline.
//!
//! The [`HeadersStage`] drains consensus-layer requests, validates candidate
//! headers (speculatively through the fork validator when the memory overlay
//! is enabled), keeps the canonical-hash index consistent across reorgs and
//! drives the PoS header download. The [`FinishStage`] publishes each newly
//! committed head to subscribers.
//!
//! Stages implement [`Stage`] and run against a [`StageTx`], which owns the
//! lifecycle of the underlying database transaction: a stage can commit
//! mid-run and keep going on a successor transaction, so replies to the
//! consensus layer are released only once the state they refer to is
//! durable.

mod config;
mod db;
mod error;
mod header_inserter;
mod stage;
pub mod stages;

#[cfg(test)]
mod test_utils;

pub use config::HeadersConfig;
pub use db::StageTx;
pub use error::{DatabaseIntegrityError, StageError};
pub use header_inserter::HeaderInserter;
pub use stage::{ExecInput, ExecOutput, Stage, StageId, UnwindInput, UnwindOutput, UnwindTo};
