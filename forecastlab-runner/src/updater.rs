//! Prediction updater: refreshes prediction files whose ticker has newer
//! scraped data than the file's last `generated_at`.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use forecastlab_core::domain::Ticker;
use forecastlab_core::staleness::prediction_file_is_stale;

use crate::predictions::{infer_ticker, list_prediction_files, PredictionFile, PredictionFileError};
use crate::trainer::{TrainError, Trainer};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("cannot infer ticker from {path} and no override was given")]
    AmbiguousTicker { path: PathBuf },

    #[error("prediction file error: {0}")]
    Predictions(#[from] PredictionFileError),

    #[error(transparent)]
    Train(#[from] TrainError),

    #[error("training failed for {ticker}: {reason}")]
    TrainingFailed { ticker: Ticker, reason: String },
}

/// Outcome of a batch update.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub succeeded: Vec<PathBuf>,
    /// Files already up to date.
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    /// Non-fatal problems, such as files whose ticker could not be inferred.
    pub warnings: Vec<String>,
}

impl UpdateReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn log_summary(&self) {
        for (path, reason) in &self.failed {
            error!(path = %path.display(), "update failed: {reason}");
        }
        for warning in &self.warnings {
            warn!("{warning}");
        }
        info!(
            succeeded = self.succeeded.len(),
            skipped = self.skipped.len(),
            failed = self.failed.len(),
            warnings = self.warnings.len(),
            "prediction update complete"
        );
    }
}

/// Re-runs the trainer for stale prediction files.
pub struct Updater {
    trainer: Trainer,
    ticker_override: Option<Ticker>,
}

impl Updater {
    pub fn new(trainer: Trainer) -> Self {
        Self {
            trainer,
            ticker_override: None,
        }
    }

    /// Ticker used when a file name does not identify one.
    pub fn with_ticker_override(mut self, ticker: Option<Ticker>) -> Self {
        self.ticker_override = ticker;
        self
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Update every prediction file in `pred_dir`.
    pub fn update_all(&self, pred_dir: &Path) -> Result<UpdateReport, UpdateError> {
        self.update_all_at(pred_dir, Utc::now())
    }

    pub fn update_all_at(
        &self,
        pred_dir: &Path,
        generated_at: DateTime<Utc>,
    ) -> Result<UpdateReport, UpdateError> {
        let files = list_prediction_files(pred_dir)?;
        info!(dir = %pred_dir.display(), files = files.len(), "checking prediction files");

        let mut report = UpdateReport::default();
        for path in files {
            match self.update_single_at(&path, generated_at) {
                Ok(true) => report.succeeded.push(path),
                Ok(false) => report.skipped.push(path),
                Err(e @ UpdateError::AmbiguousTicker { .. }) => report.warnings.push(e.to_string()),
                Err(e) => report.failed.push((path, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Update one prediction file. Returns `false` when it was already fresh
    /// or every model kind was skipped for short history.
    pub fn update_single(&self, path: &Path) -> Result<bool, UpdateError> {
        self.update_single_at(path, Utc::now())
    }

    pub fn update_single_at(
        &self,
        path: &Path,
        generated_at: DateTime<Utc>,
    ) -> Result<bool, UpdateError> {
        let ticker = infer_ticker(path)
            .or_else(|| self.ticker_override.clone())
            .ok_or_else(|| UpdateError::AmbiguousTicker {
                path: path.to_path_buf(),
            })?;

        let file = PredictionFile::open(path)?;
        let series = self.trainer.load_series(&ticker)?;
        let last_generated = file.last_generated().map(|g| g.date_naive());
        let Some(latest) = series.last_date() else {
            return Ok(false);
        };
        if !prediction_file_is_stale(last_generated, latest) {
            debug!(%ticker, path = %path.display(), ?last_generated, %latest, "prediction file is fresh");
            return Ok(false);
        }

        info!(%ticker, path = %path.display(), ?last_generated, %latest, "updating prediction file");
        let report = self.trainer.train_series(&series, path, generated_at);
        report.log_summary();
        if report.succeeded() {
            Ok(true)
        } else if report.all_skipped() {
            Ok(false)
        } else {
            let reason = report
                .error
                .clone()
                .unwrap_or_else(|| "no model succeeded".to_string());
            Err(UpdateError::TrainingFailed { ticker, reason })
        }
    }
}
