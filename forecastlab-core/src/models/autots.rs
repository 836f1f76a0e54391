//! AutoTS-style template search.
//!
//! A fixed library of cheap forecasting templates is scored by backward
//! validation: for each of `num_validations` folds the last
//! `fold * forecast_length` observations are held out, the template forecasts
//! them from the prefix, and the mean absolute error is recorded. The best
//! template is kept unless the mean ensemble of the top three scores lower.
//! Series too short to validate anything, and forecasts that come out
//! non-finite, fall back to a trailing mean.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ArtifactState, ModelAdapter, ModelError};
use crate::cache::ArtifactStore;
use crate::domain::ModelKind;
use crate::linalg::mean;
use crate::series::TargetSeries;

const ENSEMBLE_SIZE: usize = 3;

/// AutoTS search and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTsConfig {
    pub min_history: usize,
    pub staleness_days: u32,
    /// Backward-validation folds.
    pub num_validations: usize,
    /// Steps held out per fold.
    pub forecast_length: usize,
    /// Trailing window of the fallback mean.
    pub fallback_window: usize,
}

impl Default for AutoTsConfig {
    fn default() -> Self {
        Self {
            min_history: 20,
            staleness_days: 28,
            num_validations: 2,
            forecast_length: 1,
            fallback_window: 5,
        }
    }
}

/// One forecasting template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum Template {
    /// Repeat the last observation.
    LastValue,
    /// Mean of the trailing window.
    WindowMean { window: usize },
    /// Last value plus the average step over the trailing window.
    Drift { window: usize },
    /// Simple exponential smoothing.
    Ses { alpha: f64 },
    /// Holt's linear trend.
    Holt { alpha: f64, beta: f64 },
}

impl Template {
    /// Template library searched during fitting.
    pub fn library() -> Vec<Template> {
        vec![
            Template::LastValue,
            Template::WindowMean { window: 4 },
            Template::WindowMean { window: 8 },
            Template::WindowMean { window: 13 },
            Template::WindowMean { window: 26 },
            Template::Drift { window: 4 },
            Template::Drift { window: 13 },
            Template::Drift { window: 52 },
            Template::Ses { alpha: 0.2 },
            Template::Ses { alpha: 0.5 },
            Template::Ses { alpha: 0.8 },
            Template::Holt { alpha: 0.5, beta: 0.1 },
            Template::Holt { alpha: 0.8, beta: 0.2 },
        ]
    }

    /// Shortest history the template can forecast from.
    pub fn min_history(&self) -> usize {
        match *self {
            Template::LastValue | Template::Ses { .. } => 1,
            Template::WindowMean { window } => window.max(1),
            Template::Drift { window } => window.max(1) + 1,
            Template::Holt { .. } => 2,
        }
    }

    /// Forecast `steps` values after `history`, or `None` when the history
    /// is too short.
    pub fn forecast(&self, history: &[f64], steps: usize) -> Option<Vec<f64>> {
        if history.len() < self.min_history() {
            return None;
        }
        let n = history.len();
        let last = history[n - 1];
        let values = match *self {
            Template::LastValue => vec![last; steps],
            Template::WindowMean { window } => vec![mean(&history[n - window.max(1)..]); steps],
            Template::Drift { window } => {
                let window = window.max(1);
                let slope = (last - history[n - 1 - window]) / window as f64;
                (1..=steps).map(|h| last + slope * h as f64).collect()
            }
            Template::Ses { alpha } => {
                let level = history[1..]
                    .iter()
                    .fold(history[0], |level, &x| alpha * x + (1.0 - alpha) * level);
                vec![level; steps]
            }
            Template::Holt { alpha, beta } => {
                let mut level = history[0];
                let mut trend = history[1] - history[0];
                for &x in &history[1..] {
                    let previous = level;
                    level = alpha * x + (1.0 - alpha) * (level + trend);
                    trend = beta * (level - previous) + (1.0 - beta) * trend;
                }
                (1..=steps).map(|h| level + trend * h as f64).collect()
            }
        };
        Some(values)
    }
}

/// Selected template ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTsState {
    /// Templates averaged at forecast time.
    pub members: Vec<Template>,
    /// Backward-validation MAE of the selection; `None` for the fallback.
    pub validation_mae: Option<f64>,
}

/// AutoTS model adapter.
pub struct AutoTsAdapter {
    config: AutoTsConfig,
    store: ArtifactStore,
}

impl AutoTsAdapter {
    pub fn new(config: AutoTsConfig, store: ArtifactStore) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &AutoTsConfig {
        &self.config
    }

    /// Mean absolute error of `members` over the validation folds, or `None`
    /// when any fold is too short for any member.
    fn validate(&self, members: &[Template], values: &[f64]) -> Option<f64> {
        let length = self.config.forecast_length.max(1);
        let folds = self.config.num_validations.max(1);
        let mut errors = Vec::with_capacity(folds * length);
        for fold in 1..=folds {
            let cutoff = values.len().checked_sub(fold * length)?;
            let actual = &values[cutoff..cutoff + length];
            let predicted = ensemble_forecast(members, &values[..cutoff], length)?;
            errors.extend(predicted.iter().zip(actual).map(|(p, a)| (p - a).abs()));
        }
        let mae = mean(&errors);
        mae.is_finite().then_some(mae)
    }
}

fn ensemble_forecast(members: &[Template], history: &[f64], steps: usize) -> Option<Vec<f64>> {
    if members.is_empty() {
        return None;
    }
    let mut sums = vec![0.0; steps];
    for member in members {
        let values = member.forecast(history, steps)?;
        for (sum, v) in sums.iter_mut().zip(values) {
            *sum += v;
        }
    }
    let count = members.len() as f64;
    Some(sums.into_iter().map(|s| s / count).collect())
}

impl ModelAdapter for AutoTsAdapter {
    fn kind(&self) -> ModelKind {
        ModelKind::AutoTs
    }

    fn min_history(&self) -> usize {
        self.config.min_history
    }

    fn staleness_days(&self) -> u32 {
        self.config.staleness_days
    }

    fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn fit(&self, series: &TargetSeries) -> Result<ArtifactState, ModelError> {
        let values = &series.values;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::FitDivergence {
                kind: ModelKind::AutoTs,
                reason: "series contains non-finite values".into(),
            });
        }

        let mut scored: Vec<(Template, f64)> = Template::library()
            .into_iter()
            .filter_map(|t| Some((t, self.validate(&[t], values)?)))
            .collect();
        // Stable sort keeps library order on ties
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        let Some(&(best, best_mae)) = scored.first() else {
            debug!(
                ticker = %series.ticker,
                observations = values.len(),
                "AutoTS validation impossible, using trailing mean"
            );
            return Ok(ArtifactState::AutoTs(AutoTsState {
                members: vec![Template::WindowMean {
                    window: self.config.fallback_window.min(values.len()).max(1),
                }],
                validation_mae: None,
            }));
        };

        let top: Vec<Template> = scored.iter().take(ENSEMBLE_SIZE).map(|(t, _)| *t).collect();
        let state = match self.validate(&top, values) {
            Some(ensemble_mae) if top.len() > 1 && ensemble_mae < best_mae => AutoTsState {
                members: top,
                validation_mae: Some(ensemble_mae),
            },
            _ => AutoTsState {
                members: vec![best],
                validation_mae: Some(best_mae),
            },
        };
        debug!(
            ticker = %series.ticker,
            members = ?state.members,
            mae = ?state.validation_mae,
            "AutoTS selection"
        );
        Ok(ArtifactState::AutoTs(state))
    }

    fn forecast(
        &self,
        state: &ArtifactState,
        history: &[f64],
        steps: usize,
    ) -> Result<Vec<f64>, ModelError> {
        let ArtifactState::AutoTs(state) = state else {
            return Err(ModelError::StateMismatch {
                kind: ModelKind::AutoTs,
            });
        };
        let required = state
            .members
            .iter()
            .map(Template::min_history)
            .max()
            .unwrap_or(1);
        let values = ensemble_forecast(&state.members, history, steps).ok_or(
            ModelError::InsufficientHistory {
                kind: ModelKind::AutoTs,
                required,
                available: history.len(),
            },
        )?;
        if values.iter().all(|v| v.is_finite()) {
            return Ok(values);
        }

        let window = self.config.fallback_window.clamp(1, history.len());
        let fallback = mean(&history[history.len() - window..]);
        if !fallback.is_finite() {
            return Err(ModelError::FitDivergence {
                kind: ModelKind::AutoTs,
                reason: "forecast and fallback mean are not finite".into(),
            });
        }
        debug!(window, "AutoTS forecast not finite, using trailing mean");
        Ok(vec![fallback; steps])
    }
}
