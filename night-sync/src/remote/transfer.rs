//! Single-file copy to the archive host with checksum re-verification.

use std::path::Path;

use super::checksum::{escape_remote_path, hashes_match, query_remote, RemoteQueryResult};
use super::session::RemoteSession;
use crate::executor::manifest::{FileRecord, SyncOutcome};
use crate::utils::NightLog;

/// Copy one file and decide its outcome from a fresh remote checksum.
///
/// One attempt only. The copy's own exit status is logged but never
/// trusted.
pub fn transfer_file<S>(session: &mut S, record: &FileRecord, log: &mut NightLog) -> SyncOutcome
where
    S: RemoteSession + ?Sized,
{
    ensure_remote_parents(session, &record.remote_path, log);

    let destination = escape_remote_path(&record.remote_path);
    if let Err(e) = session.copy_to(&record.local_path, &destination, log) {
        log.warn(format!("  Copy command failed: {}", e));
    }

    match query_remote(session, &record.remote_path, log) {
        RemoteQueryResult::Hash(remote_hash) if hashes_match(&remote_hash, &record.local_hash) => {
            log.info("  Checksums match.");
            SyncOutcome::Success {
                remote_host: session.destination().to_string(),
                remote_path: record.remote_path.clone(),
                remote_hash,
            }
        }
        RemoteQueryResult::Hash(remote_hash) => {
            log.warn("  Checksums do not match after copy!");
            log.debug(format!("  local:  {}", record.local_hash));
            log.debug(format!("  remote: {}", remote_hash));
            SyncOutcome::Failed
        }
        RemoteQueryResult::Absent | RemoteQueryResult::Error(_) => {
            log.warn("  Copy to remote machine failed");
            SyncOutcome::Failed
        }
    }
}

/// Create the grandparent and then the parent directory of `remote_path`.
/// `mkdir` on an existing directory fails harmlessly.
fn ensure_remote_parents<S>(session: &mut S, remote_path: &str, log: &mut NightLog)
where
    S: RemoteSession + ?Sized,
{
    let Some(parent) = Path::new(remote_path).parent() else {
        return;
    };
    let grandparent = parent.parent();

    for dir in grandparent.into_iter().chain(std::iter::once(parent)) {
        let dir = dir.to_string_lossy();
        if dir.is_empty() || dir == "/" {
            continue;
        }
        log.debug(format!("  Ensuring {} exists", dir));
        session.execute(&format!("mkdir {}", escape_remote_path(&dir)), log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::session::CommandOutput;
    use crate::utils::Result;
    use std::path::PathBuf;

    /// Replays a fixed checksum answer and records everything it is asked.
    struct ScriptedRemote {
        checksum_stdout: Vec<String>,
        checksum_stderr: Vec<String>,
        commands: Vec<String>,
        copies: Vec<(PathBuf, String)>,
        copy_fails: bool,
    }

    impl ScriptedRemote {
        fn answering(stdout: &[&str], stderr: &[&str]) -> Self {
            Self {
                checksum_stdout: stdout.iter().map(|s| s.to_string()).collect(),
                checksum_stderr: stderr.iter().map(|s| s.to_string()).collect(),
                commands: Vec::new(),
                copies: Vec::new(),
                copy_fails: false,
            }
        }
    }

    impl RemoteSession for ScriptedRemote {
        fn destination(&self) -> &str {
            "obs@archive"
        }

        fn execute(&mut self, command: &str, _log: &mut NightLog) -> CommandOutput {
            self.commands.push(command.to_string());
            if command.starts_with("shasum") {
                CommandOutput {
                    stdout: self.checksum_stdout.clone(),
                    stderr: self.checksum_stderr.clone(),
                }
            } else {
                CommandOutput::default()
            }
        }

        fn copy_to(&mut self, local: &Path, remote_path: &str, _log: &mut NightLog) -> Result<()> {
            self.copies.push((local.to_path_buf(), remote_path.to_string()));
            if self.copy_fails {
                Err(crate::utils::SyncError::Transfer("connection reset".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn record(remote_path: &str) -> FileRecord {
        FileRecord {
            local_path: PathBuf::from("/local/V5/Images/20240315UT/Calibration/dark+1.fts"),
            local_hash: "aa11".to_string(),
            remote_path: remote_path.to_string(),
        }
    }

    const REMOTE: &str = "/archive/V5/Images/20240315UT/Calibration/dark+1.fts";

    #[test]
    fn test_success_after_copy() {
        let mut remote = ScriptedRemote::answering(&[&format!("AA11  {}", REMOTE)], &[]);
        let mut log = NightLog::console("V5", "20240315UT");

        let outcome = transfer_file(&mut remote, &record(REMOTE), &mut log);

        assert_eq!(
            outcome,
            SyncOutcome::Success {
                remote_host: "obs@archive".to_string(),
                remote_path: REMOTE.to_string(),
                remote_hash: "aa11".to_string(),
            }
        );
        assert_eq!(
            remote.commands,
            vec![
                "mkdir /archive/V5/Images/20240315UT".to_string(),
                "mkdir /archive/V5/Images/20240315UT/Calibration".to_string(),
                "shasum -a 256 /archive/V5/Images/20240315UT/Calibration/dark\\+1.fts".to_string(),
            ]
        );
        assert_eq!(remote.copies.len(), 1);
        assert_eq!(
            remote.copies[0].1,
            "/archive/V5/Images/20240315UT/Calibration/dark\\+1.fts"
        );
    }

    #[test]
    fn test_mismatch_after_copy_fails_without_retry() {
        let mut remote = ScriptedRemote::answering(&[&format!("bb22  {}", REMOTE)], &[]);
        let mut log = NightLog::console("V5", "20240315UT");

        let outcome = transfer_file(&mut remote, &record(REMOTE), &mut log);

        assert_eq!(outcome, SyncOutcome::Failed);
        assert_eq!(remote.copies.len(), 1);
        assert_eq!(remote.commands.iter().filter(|c| c.starts_with("shasum")).count(), 1);
    }

    #[test]
    fn test_copy_error_still_verifies() {
        let mut remote = ScriptedRemote::answering(&[&format!("aa11  {}", REMOTE)], &[]);
        remote.copy_fails = true;
        let mut log = NightLog::console("V5", "20240315UT");

        // The file may have landed anyway; only the checksum decides.
        let outcome = transfer_file(&mut remote, &record(REMOTE), &mut log);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_absent_or_error_after_copy_fails() {
        let mut log = NightLog::console("V5", "20240315UT");

        let mut absent = ScriptedRemote::answering(&[], &["shasum: x: No such file or directory"]);
        assert_eq!(transfer_file(&mut absent, &record(REMOTE), &mut log), SyncOutcome::Failed);

        let mut broken = ScriptedRemote::answering(&[], &["Connection to archive closed"]);
        assert_eq!(transfer_file(&mut broken, &record(REMOTE), &mut log), SyncOutcome::Failed);
    }
}
