//! Remote archive host access: command channel, checksums and copies.

pub mod checksum;
pub mod session;
pub mod transfer;

pub use checksum::RemoteQueryResult;
pub use session::{CommandOutput, RemoteSession, SshSession};
