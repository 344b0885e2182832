//! Runs the night pipeline over one date or over every pending night on the
//! removable drive, strictly one after another on a shared session.

use tokio_util::sync::CancellationToken;

use super::night::{process_night, NightContext, NightOptions, NightStatus};
use crate::config::{Config, Telescope};
use crate::fs::layout::{discover_nights, find_removable_root, NightDate, NightLayout};
use crate::remote::session::RemoteSession;
use crate::utils::{NightLog, Result};

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub nights: Vec<(NightDate, NightStatus)>,
}

impl BatchSummary {
    pub fn count(&self, status: NightStatus) -> usize {
        self.nights.iter().filter(|(_, s)| *s == status).count()
    }

    pub fn interrupted(&self) -> bool {
        self.count(NightStatus::Interrupted) > 0
    }
}

pub struct NightBatch<'a> {
    config: &'a Config,
    telescope: Telescope,
    options: NightOptions,
}

impl<'a> NightBatch<'a> {
    pub fn new(config: &'a Config, telescope: Telescope) -> Self {
        Self {
            config,
            telescope,
            options: NightOptions {
                copy: config.sync.copy,
                skip_file_checksums: config.sync.skip_file_checksums,
            },
        }
    }

    /// Nights to process: the given date, or every dated directory on the
    /// removable drive.
    pub fn pending_nights(&self, date: Option<NightDate>) -> Vec<NightDate> {
        if let Some(date) = date {
            return vec![date];
        }

        let Some(root) = find_removable_root(&self.config.local.removable_volumes, self.telescope) else {
            tracing::warn!(telescope = %self.telescope, "Can't find path for external drive, no nights to discover");
            return Vec::new();
        };

        match discover_nights(&root) {
            Ok(nights) => nights,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Failed to scan for nights");
                Vec::new()
            }
        }
    }

    pub fn context_for(&self, date: NightDate) -> Result<NightContext> {
        let site = self.config.site(self.telescope)?;
        let report_path = self
            .config
            .paths
            .report_dir
            .join(format!("{}_{}.txt", self.telescope, date));

        Ok(NightContext {
            layout: NightLayout::new(
                &self.config.local.data_root,
                self.telescope,
                &site.remote_root,
                date,
                &self.config.local.calibration_suffixes,
            ),
            removable_root: find_removable_root(&self.config.local.removable_volumes, self.telescope),
            report_path,
            options: self.options,
        })
    }

    /// Process `nights` in order. Stops early when shutdown is requested.
    pub fn run<S>(
        &self,
        session: &mut S,
        nights: Vec<NightDate>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary>
    where
        S: RemoteSession + ?Sized,
    {
        let mut summary = BatchSummary::default();
        tracing::info!(telescope = %self.telescope, nights = nights.len(), "Starting batch");

        for date in nights {
            if cancel.is_cancelled() {
                tracing::info!("Shutdown requested, not starting further nights");
                break;
            }

            let ctx = self.context_for(date.clone())?;
            if ctx.removable_root.is_none() {
                tracing::warn!(telescope = %self.telescope, "Can't find path for external drive");
            }

            let mut log = NightLog::open(&self.config.paths.log_dir, self.telescope.as_str(), date.as_str());
            let status = process_night(session, &ctx, cancel, &mut log);
            tracing::info!(telescope = %self.telescope, date = %date, ?status, "Night finished");

            summary.nights.push((date, status));
            if status == NightStatus::Interrupted {
                break;
            }
        }

        tracing::info!(
            passed = summary.count(NightStatus::Passed),
            failed = summary.count(NightStatus::Failed),
            interrupted = summary.interrupted(),
            "Batch complete"
        );
        Ok(summary)
    }
}
