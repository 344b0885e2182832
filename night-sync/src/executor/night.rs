//! Per-night sync pass: enumerate, verify or copy each file, record the
//! outcome, then hand over to the completion check.

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::completion;
use super::manifest::{FileRecord, ManifestEntry, ManifestWriter, SyncOutcome};
use crate::fs::layout::NightLayout;
use crate::remote::checksum::{hashes_match, local_checksum, query_remote, RemoteQueryResult};
use crate::remote::session::RemoteSession;
use crate::remote::transfer::transfer_file;
use crate::utils::{NightLog, Result};

/// Switches that shape a night's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightOptions {
    /// Copy files whose remote checksum is missing or different.
    pub copy: bool,
    /// Trust the existing manifest instead of running the per-file pass.
    pub skip_file_checksums: bool,
}

impl Default for NightOptions {
    fn default() -> Self {
        Self {
            copy: true,
            skip_file_checksums: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NightStatus {
    /// Fully replicated; local directories marked for deletion.
    Passed,
    /// Something is missing or unverified; report written.
    Failed,
    /// Shutdown requested during the pass; no decision made.
    Interrupted,
}

/// Counters for one per-file pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub enumerated: usize,
    pub already_matched: usize,
    pub transfers: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// Everything the pipeline needs to know about one night.
#[derive(Debug, Clone)]
pub struct NightContext {
    pub layout: NightLayout,
    /// `<removable volume>/<telescope>`, when a drive is mounted.
    pub removable_root: Option<PathBuf>,
    pub report_path: PathBuf,
    pub options: NightOptions,
}

/// Build the record for a local file. An unreadable file gets an empty hash.
pub fn build_record(layout: &NightLayout, local_path: &Path, log: &mut NightLog) -> Option<FileRecord> {
    let Some(remote_path) = layout.remote_path_for(local_path) else {
        log.warn(format!("  {} is outside the archive root", local_path.display()));
        return None;
    };

    let local_hash = match local_checksum(local_path) {
        Ok(hash) => hash,
        Err(e) => {
            log.warn(format!("  Could not checksum {}: {}", local_path.display(), e));
            String::new()
        }
    };

    Some(FileRecord {
        local_path: local_path.to_path_buf(),
        local_hash,
        remote_path,
    })
}

/// Decide one file: skip if the archive already holds it, otherwise copy
/// (when allowed). Returns the outcome and whether a transfer was attempted.
pub fn sync_file<S>(
    session: &mut S,
    record: &FileRecord,
    options: NightOptions,
    log: &mut NightLog,
) -> (SyncOutcome, bool)
where
    S: RemoteSession + ?Sized,
{
    if record.local_hash.is_empty() {
        return (SyncOutcome::Failed, false);
    }

    match query_remote(session, &record.remote_path, log) {
        RemoteQueryResult::Hash(remote_hash) if hashes_match(&remote_hash, &record.local_hash) => {
            log.info("  Checksums match.");
            let outcome = SyncOutcome::Success {
                remote_host: session.destination().to_string(),
                remote_path: record.remote_path.clone(),
                remote_hash,
            };
            return (outcome, false);
        }
        RemoteQueryResult::Hash(remote_hash) => {
            log.warn("  Checksums do not match!");
            log.debug(format!("  local:  {}", record.local_hash));
            log.debug(format!("  remote: {}", remote_hash));
        }
        RemoteQueryResult::Absent | RemoteQueryResult::Error(_) => {}
    }

    if !options.copy {
        return (SyncOutcome::Failed, false);
    }

    log.info("  Copying file to remote machine");
    (transfer_file(session, record, log), true)
}

/// Run the per-file pass over `files`, writing a fresh manifest.
pub fn run_pass<S>(
    session: &mut S,
    layout: &NightLayout,
    files: &[PathBuf],
    options: NightOptions,
    cancel: &CancellationToken,
    log: &mut NightLog,
) -> Result<PassSummary>
where
    S: RemoteSession + ?Sized,
{
    let mut manifest = ManifestWriter::create(&layout.manifest_path())?;
    log.debug(format!("Writing transfer log to {}", manifest.path().display()));
    let mut summary = PassSummary {
        enumerated: files.len(),
        ..PassSummary::default()
    };

    for (idx, path) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            log.warn(format!(
                "Shutdown requested, stopping after {}/{} files",
                idx,
                files.len()
            ));
            summary.interrupted = true;
            break;
        }

        log.info(format!("Checking file {}/{}: {}", idx + 1, files.len(), path.display()));

        let Some(record) = build_record(layout, path, log) else {
            let orphan = FileRecord {
                local_path: path.clone(),
                local_hash: String::new(),
                remote_path: String::new(),
            };
            manifest.append(&ManifestEntry::new(&orphan, &SyncOutcome::Failed))?;
            summary.failed += 1;
            continue;
        };

        let (outcome, transferred) = sync_file(session, &record, options, log);
        if transferred {
            summary.transfers += 1;
        } else if outcome.is_success() {
            summary.already_matched += 1;
        }
        if !outcome.is_success() {
            summary.failed += 1;
        }

        manifest.append(&ManifestEntry::new(&record, &outcome))?;
    }

    log.info(format!(
        "Pass complete: {} files, {} already on archive, {} transfers, {} failed",
        summary.enumerated, summary.already_matched, summary.transfers, summary.failed
    ));
    Ok(summary)
}

/// Full pipeline for one night: pass (unless skipped), completion check,
/// then cleanup or report.
pub fn process_night<S>(
    session: &mut S,
    ctx: &NightContext,
    cancel: &CancellationToken,
    log: &mut NightLog,
) -> NightStatus
where
    S: RemoteSession + ?Sized,
{
    let layout = &ctx.layout;
    log.info(format!(
        "Checking data for {} for night of {}",
        layout.telescope(),
        layout.date()
    ));

    // A missing archive or night directory means nothing was ever copied
    // from the drive, not that the night is empty.
    for dir in [layout.archive_root().to_path_buf(), layout.images_dir()] {
        if !dir.is_dir() {
            log.report_warning(format!("Local directory {} not found", dir.display()));
            completion::write_failure_report(&ctx.report_path, log);
            return NightStatus::Failed;
        }
    }

    let files = match layout.enumerate() {
        Ok(files) => files,
        Err(e) => {
            log.report_warning(format!("Could not enumerate local files: {}", e));
            completion::write_failure_report(&ctx.report_path, log);
            return NightStatus::Failed;
        }
    };
    log.info(format!("Found {} files to analyze", files.len()));

    if ctx.options.skip_file_checksums {
        log.info("Skipping per-file checksums, trusting existing transfer log");
    } else {
        match run_pass(session, layout, &files, ctx.options, cancel, log) {
            Ok(summary) if summary.interrupted => return NightStatus::Interrupted,
            Ok(_) => {}
            Err(e) => {
                log.report_warning(format!("Could not write transfer log: {}", e));
                completion::write_failure_report(&ctx.report_path, log);
                return NightStatus::Failed;
            }
        }
    }

    let decision = completion::check_night(session, layout, files.len(), log);
    completion::apply_decision(&decision, layout, ctx.removable_root.as_deref(), &ctx.report_path, log);

    if decision.pass {
        NightStatus::Passed
    } else {
        NightStatus::Failed
    }
}
