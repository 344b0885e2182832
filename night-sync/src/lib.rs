//! night-sync library
//!
//! Replicates a night of telescope data to the archive host, verifies every
//! file by checksum and decides whether the removable drive copy may be
//! deleted.

pub mod config;
pub mod executor;
pub mod fs;
pub mod remote;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, Telescope};
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
