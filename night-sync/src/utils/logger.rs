//! Logging configuration using tracing, plus the per-night log context.
//!
//! The global subscriber only drives the console. Everything that belongs to
//! one night (its log file and the failure report) lives in a [`NightLog`]
//! that is handed to each component explicitly.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::utils::errors::{io_err, Result};

/// Initialize logging with the specified level
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}

/// One line of the failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub level: Level,
    pub message: String,
}

impl ReportLine {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::INFO,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: Level::WARN,
            message: message.into(),
        }
    }
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            Level::WARN | Level::ERROR => "WARNING",
            _ => "INFO",
        };
        write!(f, "{}: {}", tag, self.message)
    }
}

/// Log sinks for a single night: console, optional per-night file and the
/// in-memory report buffer.
pub struct NightLog {
    telescope: String,
    date: String,
    file: Option<LineWriter<File>>,
    report: Vec<ReportLine>,
}

impl NightLog {
    /// Console-only context (no per-night file).
    pub fn console(telescope: &str, date: &str) -> Self {
        Self {
            telescope: telescope.to_string(),
            date: date.to_string(),
            file: None,
            report: Vec::new(),
        }
    }

    /// Context with a per-night log file under `log_dir`.
    ///
    /// The file is appended to. If it cannot be opened the night still runs
    /// with console logging only.
    pub fn open(log_dir: &Path, telescope: &str, date: &str) -> Self {
        let mut log = Self::console(telescope, date);
        let path = Self::file_path(log_dir, telescope, date);

        let opened = fs::create_dir_all(log_dir).and_then(|_| {
            OpenOptions::new().create(true).append(true).open(&path)
        });
        match opened {
            Ok(file) => log.file = Some(LineWriter::new(file)),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not open night log file, logging to console only"
            ),
        }
        log
    }

    /// `<log_dir>/ConfirmRemoteData_<telescope>_<date>.log`
    pub fn file_path(log_dir: &Path, telescope: &str, date: &str) -> PathBuf {
        log_dir.join(format!("ConfirmRemoteData_{}_{}.log", telescope, date))
    }

    pub fn debug(&mut self, msg: impl AsRef<str>) {
        self.emit(Level::DEBUG, msg.as_ref());
    }

    pub fn info(&mut self, msg: impl AsRef<str>) {
        self.emit(Level::INFO, msg.as_ref());
    }

    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.emit(Level::WARN, msg.as_ref());
    }

    pub fn error(&mut self, msg: impl AsRef<str>) {
        self.emit(Level::ERROR, msg.as_ref());
    }

    /// Log a line and keep it for the failure report.
    pub fn report(&mut self, line: ReportLine) {
        self.emit(line.level, &line.message);
        self.report.push(line);
    }

    pub fn report_info(&mut self, msg: impl Into<String>) {
        self.report(ReportLine::info(msg));
    }

    pub fn report_warning(&mut self, msg: impl Into<String>) {
        self.report(ReportLine::warning(msg));
    }

    pub fn report_lines(&self) -> &[ReportLine] {
        &self.report
    }

    /// Persist the accumulated report, one line per message.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let mut body = String::new();
        for line in &self.report {
            body.push_str(&line.to_string());
            body.push('\n');
        }
        fs::write(path, body).map_err(|e| io_err(path, e))
    }

    fn emit(&mut self, level: Level, msg: &str) {
        let (telescope, date) = (self.telescope.as_str(), self.date.as_str());
        match level {
            Level::ERROR => tracing::error!(telescope, date, "{}", msg),
            Level::WARN => tracing::warn!(telescope, date, "{}", msg),
            Level::INFO => tracing::info!(telescope, date, "{}", msg),
            _ => tracing::debug!(telescope, date, "{}", msg),
        }

        if let Some(file) = self.file.as_mut() {
            let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            if let Err(e) = writeln!(file, "{} {:>8}: {}", stamp, level_name(level), msg) {
                tracing::warn!(error = %e, "Night log file write failed, disabling file sink");
                self.file = None;
            }
        }
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        _ => "TRACE",
    }
}
