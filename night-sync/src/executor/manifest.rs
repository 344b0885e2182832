//! Per-night transfer manifest.
//!
//! One line per enumerated file, in enumeration order, each a JSON object:
//!
//! ```text
//! {"outcome":"success","local_path":"...","local_hash":"...","remote_host":"user@host","remote_path":"...","remote_hash":"..."}
//! ```
//!
//! The reader also understands the older comma-separated lines
//! (`Success: <local>,<hash>,<user>@<host>:<remote>,<hash>` and
//! `Failed: <local>,<hash>,,,`) so manifests written by earlier tooling can
//! still be trusted.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use crate::utils::errors::{io_err, Result, SyncError};

/// A local file scheduled for replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub local_path: PathBuf,
    /// Empty when the local file could not be read.
    pub local_hash: String,
    pub remote_path: String,
}

/// Result of one file in one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success {
        remote_host: String,
        remote_path: String,
        remote_hash: String,
    },
    Failed,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub outcome: Outcome,
    pub local_path: String,
    pub local_hash: String,
    #[serde(default)]
    pub remote_host: String,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default)]
    pub remote_hash: String,
}

impl ManifestEntry {
    pub fn new(record: &FileRecord, outcome: &SyncOutcome) -> Self {
        let local_path = record.local_path.to_string_lossy().into_owned();
        let local_hash = record.local_hash.clone();
        match outcome {
            SyncOutcome::Success {
                remote_host,
                remote_path,
                remote_hash,
            } => Self {
                outcome: Outcome::Success,
                local_path,
                local_hash,
                remote_host: remote_host.clone(),
                remote_path: remote_path.clone(),
                remote_hash: remote_hash.clone(),
            },
            SyncOutcome::Failed => Self {
                outcome: Outcome::Failed,
                local_path,
                local_hash,
                remote_host: String::new(),
                remote_path: String::new(),
                remote_hash: String::new(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.starts_with('{') {
            return Ok(serde_json::from_str(line)?);
        }
        if let Some(rest) = line.strip_prefix("Success:") {
            return decode_legacy_success(rest.trim_start())
                .ok_or_else(|| SyncError::Manifest(format!("malformed line: {}", line)));
        }
        if let Some(rest) = line.strip_prefix("Failed:") {
            return Ok(decode_legacy_failed(rest.trim_start()));
        }
        Err(SyncError::Manifest(format!("unrecognized line: {}", line)))
    }
}

fn decode_legacy_success(rest: &str) -> Option<ManifestEntry> {
    let mut fields = rest.rsplitn(3, ',');
    let remote_hash = fields.next()?;
    let remote = fields.next()?;
    let (local_path, local_hash) = fields.next()?.rsplit_once(',')?;
    let (remote_host, remote_path) = remote.split_once(':')?;

    Some(ManifestEntry {
        outcome: Outcome::Success,
        local_path: local_path.to_string(),
        local_hash: local_hash.to_string(),
        remote_host: remote_host.to_string(),
        remote_path: remote_path.to_string(),
        remote_hash: remote_hash.to_string(),
    })
}

fn decode_legacy_failed(rest: &str) -> ManifestEntry {
    let local = rest.trim_end_matches([',', ':']);
    let (local_path, local_hash) = local.rsplit_once(',').unwrap_or((local, ""));

    ManifestEntry {
        outcome: Outcome::Failed,
        local_path: local_path.to_string(),
        local_hash: local_hash.to_string(),
        remote_host: String::new(),
        remote_path: String::new(),
        remote_hash: String::new(),
    }
}

/// A line read back from a manifest file. Lines that do not decode still
/// count, and never count as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    pub raw: String,
    pub entry: Option<ManifestEntry>,
}

impl ManifestLine {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            entry: ManifestEntry::decode(raw).ok(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.entry.as_ref().is_some_and(ManifestEntry::is_success)
    }
}

/// Append-only writer, truncating any previous manifest for the night.
pub struct ManifestWriter {
    path: PathBuf,
    writer: LineWriter<File>,
    written: usize,
}

impl ManifestWriter {
    /// The manifest directory is created if needed, but never its parent.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.is_dir()) {
            fs::create_dir(dir).map_err(|e| io_err(dir, e))?;
        }
        let file = File::create(path).map_err(|e| io_err(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: LineWriter::new(file),
            written: 0,
        })
    }

    /// Write one entry and flush it to disk before returning.
    pub fn append(&mut self, entry: &ManifestEntry) -> Result<()> {
        let line = entry.encode()?;
        writeln!(self.writer, "{}", line).map_err(|e| io_err(&self.path, e))?;
        self.writer.flush().map_err(|e| io_err(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every non-blank line of a manifest.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestLine>> {
    let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(ManifestLine::parse)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str) -> FileRecord {
        FileRecord {
            local_path: PathBuf::from(format!("/Volumes/Drobo/V5/Images/20240315UT/{}", name)),
            local_hash: "aa11".to_string(),
            remote_path: format!("/archive/V5/Images/20240315UT/{}", name),
        }
    }

    fn success(name: &str) -> SyncOutcome {
        SyncOutcome::Success {
            remote_host: "vysosuser@archive".to_string(),
            remote_path: format!("/archive/V5/Images/20240315UT/{}", name),
            remote_hash: "aa11".to_string(),
        }
    }

    #[test]
    fn test_entry_encoding_keeps_commas() {
        let entry = ManifestEntry::new(&record("M42,v2.fts"), &success("M42,v2.fts"));
        let line = entry.encode().unwrap();
        assert!(line.starts_with(r#"{"outcome":"success","#));
        assert_eq!(ManifestEntry::decode(&line).unwrap(), entry);
    }

    #[test]
    fn test_failed_entry_has_no_remote_fields() {
        let entry = ManifestEntry::new(&record("a.fts"), &SyncOutcome::Failed);
        assert!(!entry.is_success());
        assert_eq!(entry.local_hash, "aa11");
        assert!(entry.remote_host.is_empty());
        assert!(entry.remote_path.is_empty());
        assert!(entry.remote_hash.is_empty());
    }

    #[test]
    fn test_decode_legacy_success() {
        let entry = ManifestEntry::decode(
            "Success: /Volumes/Drobo/V5/Logs/20240315UT/a.log,aa11,vysosuser@trapezium:/archive/V5/Logs/20240315UT/a.log,aa11",
        )
        .unwrap();
        assert!(entry.is_success());
        assert_eq!(entry.local_path, "/Volumes/Drobo/V5/Logs/20240315UT/a.log");
        assert_eq!(entry.remote_host, "vysosuser@trapezium");
        assert_eq!(entry.remote_path, "/archive/V5/Logs/20240315UT/a.log");
        assert_eq!(entry.remote_hash, "aa11");
    }

    #[test]
    fn test_decode_legacy_failed_variants() {
        for line in ["Failed: /d/a.fts,aa11,,,", "Failed: /d/a.fts,aa11,:,"] {
            let entry = ManifestEntry::decode(line).unwrap();
            assert!(!entry.is_success());
            assert_eq!(entry.local_path, "/d/a.fts");
            assert_eq!(entry.local_hash, "aa11");
        }
    }

    #[test]
    fn test_garbage_line_counts_as_failure() {
        let line = ManifestLine::parse("truncated {\"outc");
        assert!(line.entry.is_none());
        assert!(!line.is_success());
        assert_eq!(line.raw, "truncated {\"outc");
    }

    #[test]
    fn test_writer_truncates_and_reader_round_trips_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("transfer_logs").join("remote_V5_20240315UT.jsonl");

        {
            let mut old = ManifestWriter::create(&path).unwrap();
            for name in ["x.fts", "y.fts", "z.fts"] {
                old.append(&ManifestEntry::new(&record(name), &SyncOutcome::Failed))
                    .unwrap();
            }
        }

        let mut writer = ManifestWriter::create(&path).unwrap();
        assert!(writer.is_empty());
        writer
            .append(&ManifestEntry::new(&record("b.fts"), &success("b.fts")))
            .unwrap();
        writer
            .append(&ManifestEntry::new(&record("a.fts"), &SyncOutcome::Failed))
            .unwrap();
        assert_eq!(writer.len(), 2);

        let lines = read_manifest(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_success());
        assert!(lines[0].raw.contains("b.fts"));
        assert!(!lines[1].is_success());
        assert!(lines[1].raw.contains("a.fts"));
    }

    #[test]
    fn test_writer_does_not_create_missing_archive_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("V5");
        let path = root.join("transfer_logs").join("remote_V5_20240315UT.jsonl");

        assert!(ManifestWriter::create(&path).is_err());
        assert!(!root.exists());
    }

    #[test]
    fn test_read_missing_manifest_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(read_manifest(&temp.path().join("nope.jsonl")).is_err());
    }
}
