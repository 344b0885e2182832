//! Utility modules for night-sync.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
pub use logger::NightLog;
