//! Final check of a night.
//!
//! The decision is a pure function of the local file count, the remote
//! entry count and the manifest lines. Only [`apply_decision`] touches the
//! file system: it marks the removable drive's directories for deletion on
//! a pass, or writes the report on a failure.

use std::fs;
use std::path::Path;

use super::manifest::{read_manifest, ManifestLine};
use crate::fs::layout::{NightLayout, OK_TO_DELETE_PREFIX};
use crate::remote::session::RemoteSession;
use crate::utils::logger::ReportLine;
use crate::utils::{NightLog, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionDecision {
    pub source_count: usize,
    pub remote_count: usize,
    pub manifest_success_count: usize,
    pub manifest_fail_count: usize,
    pub pass: bool,
}

impl CompletionDecision {
    pub fn manifest_count(&self) -> usize {
        self.manifest_success_count + self.manifest_fail_count
    }
}

/// Evaluate all three checks without short-circuiting, so every problem
/// ends up in the report.
pub fn evaluate(
    source_count: usize,
    remote_count: usize,
    manifest: &Result<Vec<ManifestLine>>,
) -> (CompletionDecision, Vec<ReportLine>) {
    let mut report = vec![
        ReportLine::info("Starting final check of files for night"),
        ReportLine::info(format!("  Found {} files on local drive", source_count)),
        ReportLine::info(format!("  Found {} files on remote drive", remote_count)),
    ];

    let counts_match = source_count == remote_count;
    report.push(if counts_match {
        ReportLine::info("  Number of source and destination files match.  PASS")
    } else {
        ReportLine::warning("  Number of source and destination files do NOT match.  FAIL")
    });

    report.push(ReportLine::info("Checking for reported success in transfer log"));

    let unreadable: Vec<ManifestLine> = Vec::new();
    let lines: &[ManifestLine] = match manifest {
        Ok(lines) => lines,
        Err(e) => {
            report.push(ReportLine::warning(format!("  Could not read transfer log: {}", e)));
            &unreadable
        }
    };

    let log_count_matches = manifest.is_ok() && lines.len() == source_count;
    report.push(if log_count_matches {
        ReportLine::info("  Number of source files and log lines match.  PASS")
    } else {
        ReportLine::warning("  Number of source files and log lines do NOT match.  FAIL")
    });

    let mut success = 0;
    let mut failed = 0;
    for line in lines {
        if line.is_success() {
            success += 1;
        } else {
            failed += 1;
            report.push(ReportLine::warning(format!("Failure in Log: {}", line.raw)));
        }
    }

    let decision = CompletionDecision {
        source_count,
        remote_count,
        manifest_success_count: success,
        manifest_fail_count: failed,
        pass: counts_match && log_count_matches && failed == 0,
    };
    (decision, report)
}

/// Count what the archive host holds for the night.
pub fn count_remote<S>(session: &mut S, layout: &NightLayout, log: &mut NightLog) -> usize
where
    S: RemoteSession + ?Sized,
{
    let command = layout.remote_listing_command();
    log.debug(format!("  Counting files on remote machine using \"{}\"", command));
    session
        .execute(&command, log)
        .stdout
        .iter()
        .filter(|line| !line.trim().is_empty())
        .count()
}

/// Gather the inputs, evaluate them and feed the findings into the night's
/// report buffer.
pub fn check_night<S>(
    session: &mut S,
    layout: &NightLayout,
    source_count: usize,
    log: &mut NightLog,
) -> CompletionDecision
where
    S: RemoteSession + ?Sized,
{
    let remote_count = count_remote(session, layout, log);
    let manifest = read_manifest(&layout.manifest_path());

    let (decision, lines) = evaluate(source_count, remote_count, &manifest);
    for line in lines {
        log.report(line);
    }
    log.info(format!(
        "Final check: {} local, {} remote, {} log lines ({} failed)",
        decision.source_count,
        decision.remote_count,
        decision.manifest_count(),
        decision.manifest_fail_count
    ));
    decision
}

/// Act on a decision: mark directories on a pass, write the report on a
/// failure. Never both.
pub fn apply_decision(
    decision: &CompletionDecision,
    layout: &NightLayout,
    removable_root: Option<&Path>,
    report_path: &Path,
    log: &mut NightLog,
) {
    if !decision.pass {
        write_failure_report(report_path, log);
        return;
    }

    let Some(root) = removable_root else {
        log.report_warning("Can't find path for external drive, nothing marked for deletion");
        return;
    };

    let date = layout.date().as_str();
    mark_ok_to_delete(root, "Images", date, log);
    mark_ok_to_delete(root, "Logs", date, log);
}

/// Rename `<root>/<category>/<date>` to `<root>/<category>/ok2delete_<date>`.
pub fn mark_ok_to_delete(root: &Path, category: &str, date: &str, log: &mut NightLog) {
    let from = root.join(category).join(date);
    let marked = format!("{}{}", OK_TO_DELETE_PREFIX, date);
    let to = root.join(category).join(&marked);

    if !from.is_dir() {
        log.report_info(format!("No {}/{} found.  Already deleted?", category, date));
        return;
    }
    if to.exists() {
        log.report_warning(format!(
            "{}/{} already exists, leaving {}/{} in place",
            category, marked, category, date
        ));
        return;
    }

    log.report_info(format!(
        "Renaming {}/{} on USB drive to {}/{}",
        category, date, category, marked
    ));
    if let Err(e) = fs::rename(&from, &to) {
        log.report_warning(format!("Failed to rename {}: {}", from.display(), e));
    }
}

pub fn write_failure_report(report_path: &Path, log: &mut NightLog) {
    match log.write_report(report_path) {
        Ok(()) => log.info(format!("Wrote failure report to {}", report_path.display())),
        Err(e) => log.error(format!("Could not write failure report: {}", e)),
    }
}
