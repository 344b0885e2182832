//! Night executor - drives replication and the final check.
//!
//! - [`night`]: per-file verify/copy pass for one night
//! - [`completion`]: count and manifest cross-check, cleanup or report
//! - [`batch`]: sequential iteration over nights
//! - [`manifest`]: the durable per-night outcome log

pub mod batch;
pub mod completion;
pub mod manifest;
pub mod night;

pub use batch::{BatchSummary, NightBatch};
pub use completion::CompletionDecision;
pub use night::{NightContext, NightOptions, NightStatus};
