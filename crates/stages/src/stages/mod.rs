//! Implementations of the sync stages.

mod finish;
mod headers;

pub use finish::{FinishStage, EXECUTION, FINISH};
pub use headers::{HeadersStage, HEADERS, SHORT_POS_REORG_THRESHOLD_BLOCKS};
