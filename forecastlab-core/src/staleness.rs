//! Cache-freshness policy as pure functions of dates and thresholds.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::ModelArtifact;

/// Cache state of one (ticker, model kind) pair before training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    /// No usable artifact (absent or corrupt).
    NoCache,
    /// Artifact is fresh enough to reuse.
    Cached,
    /// Series has moved past the training cutoff by more than the threshold.
    Stale,
}

/// True when `latest_series_date` runs more than `threshold_days` past the
/// artifact's `training_cutoff`.
pub fn is_stale(training_cutoff: NaiveDate, latest_series_date: NaiveDate, threshold_days: u32) -> bool {
    (latest_series_date - training_cutoff).num_days() > i64::from(threshold_days)
}

/// Classify a cache lookup result.
pub fn cache_state(
    artifact: Option<&ModelArtifact>,
    latest_series_date: NaiveDate,
    threshold_days: u32,
) -> CacheState {
    match artifact {
        None => CacheState::NoCache,
        Some(a) if is_stale(a.training_cutoff, latest_series_date, threshold_days) => {
            CacheState::Stale
        }
        Some(_) => CacheState::Cached,
    }
}

/// True when a prediction file needs regenerating: the latest scraped date
/// is newer than the date of its last `generated_at`, or it has no rows.
pub fn prediction_file_is_stale(
    last_generated: Option<NaiveDate>,
    latest_series_date: NaiveDate,
) -> bool {
    match last_generated {
        None => true,
        Some(generated) => latest_series_date > generated,
    }
}
