//! On-disk layout of one observing night.
//!
//! Local data lives under `<data_root>/<telescope>`:
//!
//! ```text
//! Images/<date>/*.*
//! Images/<date>/Calibration/*.fts
//! Images/<date>/AutoFlat/*.fts
//! Logs/<date>/*.*
//! transfer_logs/remote_<telescope>_<date>.jsonl
//! ```
//!
//! The archive host mirrors the same tree under the site's remote root.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Telescope;
use crate::remote::checksum::escape_remote_path;
use crate::utils::errors::{Result, SyncError};

pub const CALIBRATION_DIR: &str = "Calibration";
pub const AUTOFLAT_DIR: &str = "AutoFlat";
pub const OK_TO_DELETE_PREFIX: &str = "ok2delete_";

/// A night token: eight date digits followed by `UT`, e.g. `20240315UT`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NightDate(String);

impl NightDate {
    /// Parse an explicit `YYYYMMDDUT` token.
    pub fn parse(token: &str) -> Result<Self> {
        let digits = token
            .strip_suffix("UT")
            .filter(|d| d.len() == 8 && d.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| SyncError::InvalidDate(token.to_string()))?;

        NaiveDate::parse_from_str(digits, "%Y%m%d")
            .map_err(|_| SyncError::InvalidDate(token.to_string()))?;

        Ok(Self(token.to_string()))
    }

    /// Resolve a CLI token: an explicit date, `today` or `yesterday` (UTC).
    pub fn resolve(token: &str, now: DateTime<Utc>) -> Result<Self> {
        match token {
            "today" => Ok(Self::from_datetime(now)),
            "yesterday" => Ok(Self::from_datetime(now - Duration::days(1))),
            other => Self::parse(other),
        }
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y%m%dUT").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NightDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for NightDate {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s, Utc::now())
    }
}

/// Paths for one telescope and one night, local and remote.
#[derive(Debug, Clone)]
pub struct NightLayout {
    telescope: Telescope,
    date: NightDate,
    archive_root: PathBuf,
    remote_root: String,
    calibration_suffixes: Vec<String>,
}

impl NightLayout {
    pub fn new(
        data_root: &Path,
        telescope: Telescope,
        remote_root: &str,
        date: NightDate,
        calibration_suffixes: &[String],
    ) -> Self {
        Self {
            telescope,
            date,
            archive_root: data_root.join(telescope.as_str()),
            remote_root: remote_root.trim_end_matches('/').to_string(),
            calibration_suffixes: calibration_suffixes.to_vec(),
        }
    }

    pub fn telescope(&self) -> Telescope {
        self.telescope
    }

    pub fn date(&self) -> &NightDate {
        &self.date
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.archive_root.join("Images").join(self.date.as_str())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.archive_root.join("Logs").join(self.date.as_str())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.archive_root.join("transfer_logs").join(format!(
            "remote_{}_{}.jsonl",
            self.telescope,
            self.date
        ))
    }

    /// Enumerate the night's files in a stable order: primary images,
    /// Calibration, AutoFlat, then logs. Each group is sorted by name.
    pub fn enumerate(&self) -> std::io::Result<Vec<PathBuf>> {
        let images = self.images_dir();
        let mut files = list_files(&images, has_extension)?;

        for sub in [CALIBRATION_DIR, AUTOFLAT_DIR] {
            let dir = images.join(sub);
            if dir.is_dir() {
                files.extend(list_files(&dir, |name| {
                    self.calibration_suffixes.iter().any(|s| name.ends_with(s.as_str()))
                })?);
            }
        }

        files.extend(list_files(&self.logs_dir(), has_extension)?);
        Ok(files)
    }

    /// Map a local file to its destination on the archive host.
    pub fn remote_path_for(&self, local: &Path) -> Option<String> {
        let relative = local.strip_prefix(&self.archive_root).ok()?;
        let mut remote = self.remote_root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    remote.push('/');
                    remote.push_str(&part.to_string_lossy());
                }
                _ => return None,
            }
        }
        Some(remote)
    }

    /// One shell line listing everything the night should have on the
    /// archive host; each output line is one entry.
    pub fn remote_listing_command(&self) -> String {
        let images = format!("{}/Images/{}", self.remote_root, self.date);
        let logs = format!("{}/Logs/{}", self.remote_root, self.date);
        [
            format!("ls -1 {}/*.*", escape_remote_path(&images)),
            format!("ls -1 {}/{}", escape_remote_path(&images), CALIBRATION_DIR),
            format!("ls -1 {}/{}", escape_remote_path(&images), AUTOFLAT_DIR),
            format!("ls -1 {}", escape_remote_path(&logs)),
        ]
        .join(" ; ")
    }
}

fn has_extension(name: &str) -> bool {
    name.contains('.')
}

/// Regular, non-hidden files directly inside `dir` accepted by `accept`,
/// sorted by name. A missing directory yields no files.
fn list_files<F>(dir: &Path, accept: F) -> std::io::Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || !accept(&name) {
            continue;
        }
        files.push(entry.into_path());
    }

    files.sort();
    Ok(files)
}

/// First removable volume that holds data for `telescope`, as
/// `<volume>/<telescope>`.
pub fn find_removable_root(volumes: &[PathBuf], telescope: Telescope) -> Option<PathBuf> {
    volumes
        .iter()
        .map(|v| v.join(telescope.as_str()))
        .find(|p| p.is_dir())
}

/// Night directories pending under `<removable root>/Images`, oldest first.
pub fn discover_nights(removable_root: &Path) -> std::io::Result<Vec<NightDate>> {
    let images = removable_root.join("Images");
    if !images.is_dir() {
        return Ok(Vec::new());
    }

    let mut nights = Vec::new();
    for entry in WalkDir::new(&images).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Ok(date) = NightDate::parse(&entry.file_name().to_string_lossy()) {
            nights.push(date);
        }
    }

    nights.sort();
    Ok(nights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn layout(root: &Path) -> NightLayout {
        NightLayout::new(
            root,
            Telescope::V5,
            "/archive/VYSOS5_Data/",
            NightDate::parse("20240315UT").unwrap(),
            &[".fts".to_string()],
        )
    }

    #[test]
    fn test_parse_night_date() {
        assert_eq!(NightDate::parse("20240315UT").unwrap().as_str(), "20240315UT");
        assert!(NightDate::parse("20240315").is_err());
        assert!(NightDate::parse("2024031UT").is_err());
        assert!(NightDate::parse("20241345UT").is_err());
        assert!(NightDate::parse("ok2delete_20240315UT").is_err());
    }

    #[test]
    fn test_resolve_relative_tokens() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap();
        assert_eq!(NightDate::resolve("today", now).unwrap().as_str(), "20240301UT");
        assert_eq!(NightDate::resolve("yesterday", now).unwrap().as_str(), "20240229UT");
        assert_eq!(NightDate::resolve("20240101UT", now).unwrap().as_str(), "20240101UT");
        assert!(NightDate::resolve("tomorrow", now).is_err());
    }

    #[test]
    fn test_enumerate_order_and_filters() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let l = layout(temp.path());
        let images = l.images_dir();
        fs::create_dir_all(images.join(CALIBRATION_DIR))?;
        fs::create_dir_all(images.join(AUTOFLAT_DIR))?;
        fs::create_dir_all(l.logs_dir())?;

        fs::write(images.join("b.fts"), b"b")?;
        fs::write(images.join("a.fts"), b"a")?;
        fs::write(images.join("README"), b"no extension")?;
        fs::write(images.join(".DS_Store"), b"hidden")?;
        fs::write(images.join(CALIBRATION_DIR).join("dark.fts"), b"d")?;
        fs::write(images.join(CALIBRATION_DIR).join("notes.txt"), b"n")?;
        fs::write(images.join(AUTOFLAT_DIR).join("flat.fts"), b"f")?;
        fs::write(l.logs_dir().join("night.log"), b"l")?;

        let names: Vec<String> = l
            .enumerate()?
            .iter()
            .map(|p| p.strip_prefix(l.archive_root()).unwrap().display().to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "Images/20240315UT/a.fts",
                "Images/20240315UT/b.fts",
                "Images/20240315UT/Calibration/dark.fts",
                "Images/20240315UT/AutoFlat/flat.fts",
                "Logs/20240315UT/night.log",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_enumerate_missing_night_is_empty() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        assert!(layout(temp.path()).enumerate()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_remote_mapping() {
        let l = layout(Path::new("/Volumes/Drobo"));
        let local = Path::new("/Volumes/Drobo/V5/Images/20240315UT/Calibration/dark.fts");
        assert_eq!(
            l.remote_path_for(local).as_deref(),
            Some("/archive/VYSOS5_Data/Images/20240315UT/Calibration/dark.fts")
        );
        assert_eq!(l.remote_path_for(Path::new("/elsewhere/file.fts")), None);
        assert_eq!(
            l.manifest_path(),
            PathBuf::from("/Volumes/Drobo/V5/transfer_logs/remote_V5_20240315UT.jsonl")
        );
    }

    #[test]
    fn test_remote_listing_command() {
        let l = layout(Path::new("/Volumes/Drobo"));
        assert_eq!(
            l.remote_listing_command(),
            "ls -1 /archive/VYSOS5_Data/Images/20240315UT/*.* ; \
             ls -1 /archive/VYSOS5_Data/Images/20240315UT/Calibration ; \
             ls -1 /archive/VYSOS5_Data/Images/20240315UT/AutoFlat ; \
             ls -1 /archive/VYSOS5_Data/Logs/20240315UT"
        );
    }

    #[test]
    fn test_discover_nights() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let images = temp.path().join("Images");
        fs::create_dir_all(images.join("20240316UT"))?;
        fs::create_dir_all(images.join("20240315UT"))?;
        fs::create_dir_all(images.join("ok2delete_20240301UT"))?;
        fs::create_dir_all(images.join("scratch"))?;
        fs::write(images.join("20240317UT"), b"a file, not a night")?;

        let nights: Vec<String> = discover_nights(temp.path())?
            .iter()
            .map(|d| d.to_string())
            .collect();
        assert_eq!(nights, vec!["20240315UT", "20240316UT"]);
        Ok(())
    }

    #[test]
    fn test_find_removable_root() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let first = temp.path().join("WD500B");
        let second = temp.path().join("WD500_C");
        fs::create_dir_all(second.join("V5"))?;

        let volumes = vec![first, second.clone()];
        assert_eq!(find_removable_root(&volumes, Telescope::V5), Some(second.join("V5")));
        assert_eq!(find_removable_root(&volumes, Telescope::V20), None);
        Ok(())
    }
}
