#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Engine API plumbing for the hearth sync pipeline.
//!
//! Consensus-layer requests enter through the [`RequestList`] and are drained
//! by the headers stage; replies leave through a capacity-one channel so that
//! they reach the consensus layer in request order. The [`ForkValidator`]
//! speculatively validates candidate chain heads against an in-memory overlay
//! of the database, and [`HeaderDownload`] tracks the shared downloader and
//! bad-header state the stage consults between requests.

mod download;
mod fork_validator;
mod message;
mod queue;

pub use download::{HeaderCollector, HeaderDownload, PosDownloadTarget, PosStatus};
pub use fork_validator::{
    ForkValidator, ForkValidatorError, ValidatePayloadFn, ValidationError, MAX_FORK_DEPTH,
};
pub use message::{
    BeaconMessage, BeaconRequest, EngineApiError, EngineReply, ForkchoiceState, Interrupt,
    PayloadStatus, PayloadStatusEnum, RequestStatus,
};
pub use queue::{RequestId, RequestList};
