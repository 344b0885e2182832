//! Configuration management for night-sync.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Every section has defaults, so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::utils::errors::{io_err, Result, SyncError};

/// Telescope (site) identifiers known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Telescope {
    #[value(name = "V5")]
    V5,
    #[value(name = "V20")]
    V20,
}

impl Telescope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Telescope::V5 => "V5",
            Telescope::V20 => "V20",
        }
    }
}

impl fmt::Display for Telescope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub sites: BTreeMap<String, SiteConfig>,
    pub sync: SyncConfig,
    pub paths: PathsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Login name on the archive host
    pub user: String,

    /// Archive host name
    pub host: String,

    /// SSH port
    pub port: u16,

    /// Private keys tried after the ssh-agent (empty = ~/.ssh defaults)
    pub identity_files: Vec<PathBuf>,

    /// Per-call timeout for remote commands in seconds (0 = unbounded)
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Local archive root; per-telescope data lives in `<data_root>/<telescope>`
    pub data_root: PathBuf,

    /// Candidate mount points of the removable drive, first match wins
    pub removable_volumes: Vec<PathBuf>,

    /// Suffixes accepted in the Calibration and AutoFlat folders
    pub calibration_suffixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Destination root on the archive host
    pub remote_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Copy files whose remote checksum is missing or different
    pub copy: bool,

    /// Trust the existing manifest and go straight to the final check
    pub skip_file_checksums: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for per-night log files
    pub log_dir: PathBuf,

    /// Drop location for failure reports
    pub report_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: "vysosuser".to_string(),
            host: "trapezium.ifa.hawaii.edu".to_string(),
            port: 22,
            identity_files: Vec::new(),
            command_timeout_secs: 0,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/Volumes/Drobo"),
            removable_volumes: vec![
                PathBuf::from("/Volumes/WD500B"),
                PathBuf::from("/Volumes/WD500_C"),
            ],
            calibration_suffixes: vec![".fts".to_string()],
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            copy: true,
            skip_file_checksums: false,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        Self {
            log_dir: home.join("logs"),
            report_dir: home.join("Dropbox").join("DataSyncReports"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_sites() -> BTreeMap<String, SiteConfig> {
    let mut sites = BTreeMap::new();
    sites.insert(
        "V5".to_string(),
        SiteConfig {
            remote_root: "/Volumes/DroboPro1/VYSOS5_Data".to_string(),
        },
    );
    sites.insert(
        "V20".to_string(),
        SiteConfig {
            remote_root: "/Volumes/DroboPro1/VYSOS20_Data".to_string(),
        },
    );
    sites
}

impl Default for Config {
    fn default() -> Self {
        Config {
            remote: RemoteConfig::default(),
            local: LocalConfig::default(),
            sites: default_sites(),
            sync: SyncConfig::default(),
            paths: PathsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `NIGHTSYNC_*` environment overrides (a `.env` file is honored).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv();

        if let Ok(host) = std::env::var("NIGHTSYNC_REMOTE_HOST") {
            self.remote.host = host;
        }
        if let Ok(user) = std::env::var("NIGHTSYNC_REMOTE_USER") {
            self.remote.user = user;
        }
        if let Ok(port) = std::env::var("NIGHTSYNC_REMOTE_PORT") {
            self.remote.port = port
                .parse()
                .map_err(|_| SyncError::Config(format!("NIGHTSYNC_REMOTE_PORT is not a port: {}", port)))?;
        }
        if let Ok(level) = std::env::var("NIGHTSYNC_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(dir) = std::env::var("NIGHTSYNC_REPORT_DIR") {
            self.paths.report_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Site settings for a telescope; a missing entry is a fatal misconfiguration.
    pub fn site(&self, telescope: Telescope) -> Result<&SiteConfig> {
        self.sites
            .get(telescope.as_str())
            .ok_or_else(|| SyncError::UnknownSite(telescope.to_string()))
    }

    /// `<user>@<host>`, the destination prefix used for copies and manifests.
    pub fn remote_destination(&self) -> String {
        format!("{}@{}", self.remote.user, self.remote.host)
    }
}
