//! Seasonal ARIMA with automatic order selection.
//!
//! Search procedure:
//! 1. Seasonal differencing (D=1, period m) when seasonality is enabled and
//!    the series covers at least `2m + 10` observations.
//! 2. Regular differencing (d=1) when it more than halves the variance.
//! 3. Grid over p ∈ [0, max_p], q ∈ [0, max_q], P ∈ {0, 1}. Each candidate is
//!    fitted with the Hannan–Rissanen two-stage regression on a common
//!    sample so AIC values are comparable.
//! 4. Lowest AIC wins. Candidates with singular normal equations, non-finite
//!    coefficients or a non-invertible MA part are discarded.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ArtifactState, ModelAdapter, ModelError};
use crate::cache::ArtifactStore;
use crate::domain::ModelKind;
use crate::linalg::{least_squares, variance};
use crate::series::TargetSeries;

/// SARIMA search and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarimaConfig {
    pub min_history: usize,
    pub staleness_days: u32,
    pub max_p: usize,
    pub max_q: usize,
    pub max_d: usize,
    /// Seasonal period in observations (52 for weekly data).
    pub seasonal_period: usize,
    pub seasonal: bool,
}

impl Default for SarimaConfig {
    fn default() -> Self {
        Self {
            min_history: 50,
            staleness_days: 91,
            max_p: 3,
            max_q: 3,
            max_d: 1,
            seasonal_period: 52,
            seasonal: true,
        }
    }
}

/// Fitted SARIMA parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaState {
    /// (p, d, q)
    pub order: (usize, usize, usize),
    /// (P, D, Q, m)
    pub seasonal_order: (usize, usize, usize, usize),
    pub intercept: f64,
    pub ar: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub sigma2: f64,
    pub aic: f64,
}

impl SarimaState {
    fn period(&self) -> usize {
        self.seasonal_order.3
    }

    /// Lags the one-step predictor looks back over.
    fn max_lag(&self) -> usize {
        self.ar
            .len()
            .max(self.seasonal_ar.len() * self.period())
            .max(self.ma.len())
    }

    /// Observations of raw history needed before the first prediction.
    fn required_history(&self) -> usize {
        let (_, d, _) = self.order;
        let seasonal_d = self.seasonal_order.1;
        seasonal_d * self.period() + d + self.max_lag() + 1
    }

    fn predict_at(&self, t: usize, w: &[f64], e: &[f64]) -> f64 {
        let mut value = self.intercept;
        for (i, phi) in self.ar.iter().enumerate() {
            value += phi * w[t - i - 1];
        }
        for (j, big_phi) in self.seasonal_ar.iter().enumerate() {
            value += big_phi * w[t - (j + 1) * self.period()];
        }
        for (i, theta) in self.ma.iter().enumerate() {
            if let Some(idx) = t.checked_sub(i + 1) {
                value += theta * e[idx];
            }
        }
        value
    }
}

/// SARIMA model adapter.
pub struct SarimaAdapter {
    config: SarimaConfig,
    store: ArtifactStore,
}

impl SarimaAdapter {
    pub fn new(config: SarimaConfig, store: ArtifactStore) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &SarimaConfig {
        &self.config
    }

    fn divergence(reason: impl Into<String>) -> ModelError {
        ModelError::FitDivergence {
            kind: ModelKind::Sarima,
            reason: reason.into(),
        }
    }
}

impl ModelAdapter for SarimaAdapter {
    fn kind(&self) -> ModelKind {
        ModelKind::Sarima
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
        let y = &series.values;
        if y.iter().any(|v| !v.is_finite()) {
            return Err(Self::divergence("series contains non-finite values"));
        }

        let m = self.config.seasonal_period;
        let seasonal = self.config.seasonal && m > 1 && y.len() >= 2 * m + 10;
        let seasonal_d = usize::from(seasonal);

        let mut w = if seasonal { difference(y, m) } else { y.clone() };
        let mut d = 0;
        while d < self.config.max_d && w.len() > 3 {
            let diffed = difference(&w, 1);
            if variance(&diffed) < 0.5 * variance(&w) {
                w = diffed;
                d += 1;
            } else {
                break;
            }
        }

        let max_seasonal_p = usize::from(seasonal);
        let long_ar = (self.config.max_p.max(self.config.max_q) + 5)
            .min(w.len() / 4)
            .max(1);
        let innovations = long_ar_residuals(&w, long_ar);

        // Common sample start so AIC is comparable across candidates
        let start = self
            .config
            .max_p
            .max(max_seasonal_p * m)
            .max(if innovations.is_some() { long_ar + self.config.max_q } else { 0 });

        let mut best: Option<SarimaState> = None;
        for big_p in 0..=max_seasonal_p {
            for p in 0..=self.config.max_p {
                for q in 0..=self.config.max_q {
                    let e = match (&innovations, q) {
                        (_, 0) => None,
                        (Some(e), _) => Some(e.as_slice()),
                        (None, _) => continue,
                    };
                    let Some(state) = fit_candidate(&w, start, p, q, big_p, m, e) else {
                        continue;
                    };
                    let state = SarimaState {
                        order: (p, d, q),
                        seasonal_order: (big_p, seasonal_d, 0, if seasonal { m } else { 0 }),
                        ..state
                    };
                    debug!(
                        ticker = %series.ticker,
                        order = ?state.order,
                        seasonal_order = ?state.seasonal_order,
                        aic = state.aic,
                        "SARIMA candidate"
                    );
                    if best.as_ref().map_or(true, |b| state.aic < b.aic) {
                        best = Some(state);
                    }
                }
            }
        }

        let best = best.ok_or_else(|| Self::divergence("no candidate order produced a stable fit"))?;
        debug!(
            ticker = %series.ticker,
            order = ?best.order,
            seasonal_order = ?best.seasonal_order,
            aic = best.aic,
            "SARIMA order selected"
        );
        Ok(ArtifactState::Sarima(best))
    }

    fn forecast(
        &self,
        state: &ArtifactState,
        history: &[f64],
        steps: usize,
    ) -> Result<Vec<f64>, ModelError> {
        let ArtifactState::Sarima(state) = state else {
            return Err(ModelError::StateMismatch {
                kind: ModelKind::Sarima,
            });
        };
        if history.len() < state.required_history() {
            return Err(ModelError::InsufficientHistory {
                kind: ModelKind::Sarima,
                required: state.required_history(),
                available: history.len(),
            });
        }

        let (_, d, _) = state.order;
        let seasonal_d = state.seasonal_order.1;
        let m = state.period();

        let seasonal_base = if seasonal_d == 1 {
            difference(history, m)
        } else {
            history.to_vec()
        };
        let mut levels = vec![seasonal_base];
        for k in 0..d {
            let next = difference(&levels[k], 1);
            levels.push(next);
        }
        let mut w = levels[d].clone();

        // In-sample innovations with the fitted coefficients
        let first = state.ar.len().max(state.seasonal_ar.len() * m);
        let mut e = vec![0.0; w.len()];
        for t in first..w.len() {
            e[t] = w[t] - state.predict_at(t, &w, &e);
        }

        let mut future = Vec::with_capacity(steps);
        for _ in 0..steps {
            let t = w.len();
            let next = state.predict_at(t, &w, &e);
            w.push(next);
            e.push(0.0);
            future.push(next);
        }

        // Undo regular differencing
        for k in (0..d).rev() {
            let mut last = levels[k].last().copied().unwrap_or_default();
            future = future
                .into_iter()
                .map(|delta| {
                    last += delta;
                    last
                })
                .collect();
        }

        // Undo seasonal differencing
        if seasonal_d == 1 {
            let mut extended = history.to_vec();
            for s in future {
                let next = s + extended[extended.len() - m];
                extended.push(next);
            }
            future = extended.split_off(history.len());
        }

        if future.iter().any(|v| !v.is_finite()) {
            return Err(Self::divergence("forecast is not finite"));
        }
        Ok(future)
    }
}

/// Lag-`lag` differences: `x[t] - x[t - lag]`.
fn difference(values: &[f64], lag: usize) -> Vec<f64> {
    if values.len() <= lag {
        return Vec::new();
    }
    (lag..values.len()).map(|t| values[t] - values[t - lag]).collect()
}

/// Stage one of Hannan–Rissanen: residuals of a long AR(k) fit, zero before `k`.
fn long_ar_residuals(w: &[f64], k: usize) -> Option<Vec<f64>> {
    if w.len() <= 2 * k + 2 {
        return None;
    }
    let rows: Vec<Vec<f64>> = (k..w.len())
        .map(|t| {
            let mut row = Vec::with_capacity(k + 1);
            row.push(1.0);
            row.extend((1..=k).map(|i| w[t - i]));
            row
        })
        .collect();
    let targets = &w[k..];
    let fit = least_squares(&rows, targets, 0.0, &[])?;

    let mut residuals = vec![0.0; w.len()];
    for (offset, row) in rows.iter().enumerate() {
        let fitted: f64 = row.iter().zip(&fit.coefficients).map(|(a, b)| a * b).sum();
        residuals[k + offset] = w[k + offset] - fitted;
    }
    Some(residuals)
}

/// Stage two: OLS of `w[t]` on intercept, AR lags, seasonal AR lags and
/// lagged innovations over `t >= start`.
fn fit_candidate(
    w: &[f64],
    start: usize,
    p: usize,
    q: usize,
    big_p: usize,
    m: usize,
    innovations: Option<&[f64]>,
) -> Option<SarimaState> {
    let cols = 1 + p + big_p + q;
    if w.len() <= start || w.len() - start < cols + 3 {
        return None;
    }

    let rows: Vec<Vec<f64>> = (start..w.len())
        .map(|t| {
            let mut row = Vec::with_capacity(cols);
            row.push(1.0);
            row.extend((1..=p).map(|i| w[t - i]));
            row.extend((1..=big_p).map(|j| w[t - j * m]));
            if let Some(e) = innovations {
                row.extend((1..=q).map(|i| e[t - i]));
            }
            row
        })
        .collect();
    let fit = least_squares(&rows, &w[start..], 0.0, &[])?;

    let coefficients = fit.coefficients;
    if coefficients.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let ma = coefficients[1 + p + big_p..].to_vec();
    if ma.iter().map(|t| t.abs()).sum::<f64>() >= 1.0 {
        return None;
    }

    let n = rows.len() as f64;
    let sigma2 = (fit.rss / n).max(1e-12);
    let aic = n * sigma2.ln() + 2.0 * (cols as f64 + 1.0);

    Some(SarimaState {
        order: (p, 0, q),
        seasonal_order: (big_p, 0, 0, m),
        intercept: coefficients[0],
        ar: coefficients[1..1 + p].to_vec(),
        seasonal_ar: coefficients[1 + p..1 + p + big_p].to_vec(),
        ma,
        sigma2,
        aic,
    })
}
