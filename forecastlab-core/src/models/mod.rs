//! Model adapters: a uniform train / predict / cache contract over the three
//! forecasting approaches.
//!
//! Each adapter implements the two kind-specific primitives (`fit` and
//! `forecast`); the trait supplies the shared behaviour on top:
//! - `train`: minimum-history check, fit, persist the artifact
//! - `predict`: forecasts for the grid dates after the series end
//! - `walk_forward`: one-step predictions over historical dates
//! - `load_cache` / `save_cache`: artifact store access with kind checks

pub mod autots;
pub mod sarima;
pub mod timemoe;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::ArtifactStore;
use crate::domain::{ModelKind, PredictionRecord, Ticker};
use crate::series::TargetSeries;

pub use autots::{AutoTsAdapter, AutoTsConfig, AutoTsState, Template};
pub use sarima::{SarimaAdapter, SarimaConfig, SarimaState};
pub use timemoe::{InferenceEngine, TimeMoeAdapter, TimeMoeConfig, TimeMoeState};

/// Current schema version for persisted artifacts.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    ARTIFACT_SCHEMA_VERSION
}

/// Errors from model adapters and the artifact cache.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{kind}: insufficient history ({available} observations, need {required})")]
    InsufficientHistory {
        kind: ModelKind,
        required: usize,
        available: usize,
    },

    #[error("{kind}: fit did not converge: {reason}")]
    FitDivergence { kind: ModelKind, reason: String },

    #[error("corrupt cache artifact {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("{kind}: model unavailable: {reason}")]
    ModelUnavailable { kind: ModelKind, reason: String },

    #[error("{kind}: artifact state does not belong to this model")]
    StateMismatch { kind: ModelKind },

    #[error("cache I/O error at {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModelError {
    /// Short machine-friendly label used in run summaries.
    pub fn label(&self) -> &'static str {
        match self {
            ModelError::InsufficientHistory { .. } => "InsufficientHistory",
            ModelError::FitDivergence { .. } => "FitDivergence",
            ModelError::CacheCorrupt { .. } => "CacheCorrupt",
            ModelError::ModelUnavailable { .. } => "ModelUnavailable",
            ModelError::StateMismatch { .. } => "StateMismatch",
            ModelError::CacheIo { .. } => "CacheIo",
        }
    }
}

/// Cached fitted-model state for one (ticker, model kind) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub ticker: Ticker,
    pub kind: ModelKind,
    /// Last series date the model was fitted on.
    pub training_cutoff: NaiveDate,
    pub trained_at: DateTime<Utc>,
    pub observations: usize,
    /// BLAKE3 fingerprint of the training series.
    pub series_hash: String,
    pub state: ArtifactState,
}

/// Kind-specific fitted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactState {
    Sarima(SarimaState),
    AutoTs(AutoTsState),
    TimeMoe(TimeMoeState),
}

impl ArtifactState {
    pub fn kind(&self) -> ModelKind {
        match self {
            ArtifactState::Sarima(_) => ModelKind::Sarima,
            ArtifactState::AutoTs(_) => ModelKind::AutoTs,
            ArtifactState::TimeMoe(_) => ModelKind::TimeMoe,
        }
    }
}

/// Uniform contract over one model kind.
///
/// Implementations are selected by configuration and used as trait objects
/// by the training orchestrator.
pub trait ModelAdapter: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Minimum series length `train` accepts.
    fn min_history(&self) -> usize;

    /// Days the latest series date may run past the training cutoff before
    /// the artifact is stale.
    fn staleness_days(&self) -> u32;

    /// Artifact store this adapter persists into.
    fn store(&self) -> &ArtifactStore;

    /// Fit kind-specific state on a series that already satisfies the
    /// minimum-history requirement.
    fn fit(&self, series: &TargetSeries) -> Result<ArtifactState, ModelError>;

    /// Forecast `steps` values following `history` with fitted `state`.
    fn forecast(
        &self,
        state: &ArtifactState,
        history: &[f64],
        steps: usize,
    ) -> Result<Vec<f64>, ModelError>;

    /// Fit on `series` and persist the artifact, overwriting any prior one.
    fn train(&self, series: &TargetSeries) -> Result<ModelArtifact, ModelError> {
        if series.len() < self.min_history() {
            return Err(ModelError::InsufficientHistory {
                kind: self.kind(),
                required: self.min_history(),
                available: series.len(),
            });
        }
        let training_cutoff = series.last_date().ok_or(ModelError::InsufficientHistory {
            kind: self.kind(),
            required: self.min_history(),
            available: 0,
        })?;

        let state = self.fit(series)?;
        let artifact = ModelArtifact {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            ticker: series.ticker.clone(),
            kind: self.kind(),
            training_cutoff,
            trained_at: Utc::now(),
            observations: series.len(),
            series_hash: series.fingerprint(),
            state,
        };
        self.save_cache(&series.ticker, &artifact)?;
        Ok(artifact)
    }

    /// Predict the `horizon` grid dates after the end of `series`, using the
    /// artifact's fitted parameters conditioned on `series`.
    fn predict(
        &self,
        artifact: &ModelArtifact,
        series: &TargetSeries,
        horizon: usize,
        generated_at: DateTime<Utc>,
    ) -> Result<Vec<PredictionRecord>, ModelError> {
        if horizon == 0 {
            return Ok(Vec::new());
        }
        let values = self.forecast(&artifact.state, &series.values, horizon)?;
        Ok(series
            .next_dates(horizon)
            .into_iter()
            .zip(values)
            .map(|(date, predicted_value)| PredictionRecord {
                date,
                ticker: series.ticker.clone(),
                model: self.kind(),
                predicted_value,
                generated_at,
            })
            .collect())
    }

    /// One-step-ahead predictions for `series.dates[from..]`, each using only
    /// the observations before that date. Dates whose prefix is too short for
    /// the fitted state are skipped.
    fn walk_forward(
        &self,
        artifact: &ModelArtifact,
        series: &TargetSeries,
        from: usize,
        generated_at: DateTime<Utc>,
    ) -> Vec<PredictionRecord> {
        (from.max(1)..series.len())
            .filter_map(|i| {
                let value = self
                    .forecast(&artifact.state, &series.values[..i], 1)
                    .ok()?
                    .into_iter()
                    .next()?;
                value.is_finite().then(|| PredictionRecord {
                    date: series.dates[i],
                    ticker: series.ticker.clone(),
                    model: self.kind(),
                    predicted_value: value,
                    generated_at,
                })
            })
            .collect()
    }

    /// Load the cached artifact for `ticker`, if any.
    ///
    /// Fails with `CacheCorrupt` when the stored artifact cannot be read or
    /// belongs to a different ticker or kind.
    fn load_cache(&self, ticker: &Ticker) -> Result<Option<ModelArtifact>, ModelError> {
        let Some(artifact) = self.store().load(self.kind(), ticker)? else {
            return Ok(None);
        };
        if artifact.kind != self.kind()
            || artifact.state.kind() != self.kind()
            || &artifact.ticker != ticker
        {
            return Err(ModelError::CacheCorrupt {
                path: self.store().artifact_path(self.kind(), ticker),
                reason: format!(
                    "artifact is for {} {}, expected {} {}",
                    artifact.ticker,
                    artifact.kind,
                    ticker,
                    self.kind()
                ),
            });
        }
        Ok(Some(artifact))
    }

    fn save_cache(&self, ticker: &Ticker, artifact: &ModelArtifact) -> Result<(), ModelError> {
        self.store().save(ticker, artifact)
    }
}
