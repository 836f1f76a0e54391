//! Model trainer / update orchestrator.
//!
//! Per ticker, per configured model kind:
//! 1. minimum-history check (short series are skipped, not failed)
//! 2. cache lookup; corrupt artifacts are quarantined and treated as a miss
//! 3. retrain when the cache is missing or stale, otherwise reuse it
//! 4. walk-forward records for dates not yet in the prediction file, plus
//!    `horizon` future records
//!
//! Records from all successful kinds are upserted into the ticker's
//! prediction file in one write. Each kind is isolated: an error in one never
//! affects another. A `TrainingGate` serializes work on the same
//! (ticker, kind) pair and writes to the same prediction file.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use forecastlab_core::cache::ArtifactStore;
use forecastlab_core::data::{DataError, ScrapedStore};
use forecastlab_core::domain::{ModelKind, PredictionRecord, Ticker};
use forecastlab_core::models::{
    AutoTsAdapter, ModelAdapter, ModelError, SarimaAdapter, TimeMoeAdapter,
};
use forecastlab_core::series::{SeriesError, TargetSeries};
use forecastlab_core::staleness::{cache_state, CacheState};

use crate::config::{ForecastConfig, ModelsConfig};
use crate::predictions::{prediction_filename, PredictionFile, PredictionFileError};
use crate::report::{ModelOutcome, RunReport, TickerReport};

/// Observations kept in quick test mode.
pub const TEST_RUN_OBSERVATIONS: usize = 108;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("series error for {ticker}: {source}")]
    Series {
        ticker: Ticker,
        #[source]
        source: SeriesError,
    },

    #[error("prediction file error: {0}")]
    Predictions(#[from] PredictionFileError),
}

/// Options that shape one training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerOptions {
    pub horizon: usize,
    pub backtest_window: usize,
    pub parallel: bool,
    /// Truncate each series to its first `TEST_RUN_OBSERVATIONS` observations.
    pub test_run: bool,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            horizon: 1,
            backtest_window: 52,
            parallel: false,
            test_run: false,
        }
    }
}

impl TrainerOptions {
    pub fn from_models(models: &ModelsConfig, test_run: bool) -> Self {
        Self {
            horizon: models.horizon,
            backtest_window: models.backtest_window,
            parallel: models.parallel,
            test_run,
        }
    }
}

/// Resource serialized by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GateKey {
    Model(Ticker, ModelKind),
    Predictions(PathBuf),
}

/// In-process mutual exclusion per (ticker, kind) pair and per prediction
/// file. Clones share the same locks.
#[derive(Debug, Clone, Default)]
pub struct TrainingGate {
    locks: Arc<Mutex<HashMap<GateKey, Arc<Mutex<()>>>>>,
}

impl TrainingGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: GateKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(key).or_default().clone()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: GateKey, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        f()
    }
}

/// Instantiate the configured adapters, in configured order.
pub fn build_adapters(models: &ModelsConfig, cache_dir: &Path) -> Vec<Box<dyn ModelAdapter>> {
    let store = ArtifactStore::new(cache_dir);
    models
        .enabled
        .iter()
        .map(|kind| -> Box<dyn ModelAdapter> {
            match kind {
                ModelKind::Sarima => Box::new(SarimaAdapter::new(models.sarima.clone(), store.clone())),
                ModelKind::AutoTs => Box::new(AutoTsAdapter::new(models.autots.clone(), store.clone())),
                ModelKind::TimeMoe => {
                    Box::new(TimeMoeAdapter::new(models.timemoe.clone(), store.clone()))
                }
            }
        })
        .collect()
}

/// Drives the configured model adapters for one or more tickers.
pub struct Trainer {
    adapters: Vec<Box<dyn ModelAdapter>>,
    store: ScrapedStore,
    pred_dir: PathBuf,
    target_column: String,
    options: TrainerOptions,
    gate: TrainingGate,
}

impl Trainer {
    pub fn new(
        adapters: Vec<Box<dyn ModelAdapter>>,
        store: ScrapedStore,
        pred_dir: impl Into<PathBuf>,
        target_column: impl Into<String>,
        options: TrainerOptions,
    ) -> Self {
        Self {
            adapters,
            store,
            pred_dir: pred_dir.into(),
            target_column: target_column.into(),
            options,
            gate: TrainingGate::new(),
        }
    }

    /// Build a trainer from configuration paths and model settings.
    pub fn from_config(config: &ForecastConfig, test_run: bool) -> Self {
        Self::new(
            build_adapters(&config.models, &config.paths.cache),
            ScrapedStore::new(&config.paths.scraped),
            &config.paths.predictions,
            &config.models.target_column,
            TrainerOptions::from_models(&config.models, test_run),
        )
    }

    /// Share a gate with other trainers in the same process.
    pub fn with_gate(mut self, gate: TrainingGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn options(&self) -> &TrainerOptions {
        &self.options
    }

    pub fn pred_dir(&self) -> &Path {
        &self.pred_dir
    }

    pub fn scraped_store(&self) -> &ScrapedStore {
        &self.store
    }

    /// Default prediction file for `ticker`.
    pub fn prediction_path(&self, ticker: &Ticker) -> PathBuf {
        self.pred_dir.join(prediction_filename(ticker))
    }

    /// Load the latest scraped series for `ticker` as a target series.
    pub fn load_series(&self, ticker: &Ticker) -> Result<TargetSeries, TrainError> {
        let raw = self.store.load_series(ticker)?;
        let mut series = raw
            .target(ticker, &self.target_column)
            .map_err(|source| TrainError::Series {
                ticker: ticker.clone(),
                source,
            })?;
        if self.options.test_run && series.len() > TEST_RUN_OBSERVATIONS {
            debug!(%ticker, observations = series.len(), "test run: truncating series");
            series.truncate(TEST_RUN_OBSERVATIONS);
        }
        Ok(series)
    }

    /// Train and predict all configured kinds for `ticker` into its default
    /// prediction file.
    pub fn train_ticker(&self, ticker: &Ticker, generated_at: DateTime<Utc>) -> TickerReport {
        let path = self.prediction_path(ticker);
        self.train_ticker_into(ticker, &path, generated_at)
    }

    /// As `train_ticker`, writing into an explicit prediction file.
    pub fn train_ticker_into(
        &self,
        ticker: &Ticker,
        path: &Path,
        generated_at: DateTime<Utc>,
    ) -> TickerReport {
        match self.load_series(ticker) {
            Ok(series) => self.train_series(&series, path, generated_at),
            Err(e) => {
                warn!(%ticker, error = %e, "cannot load series");
                TickerReport::failed(ticker.clone(), e.to_string())
            }
        }
    }

    /// Train every ticker in order.
    pub fn train_all(&self, tickers: &[Ticker], generated_at: DateTime<Utc>) -> RunReport {
        let mut run = RunReport::default();
        for ticker in tickers {
            run.push(self.train_ticker(ticker, generated_at));
        }
        run
    }

    /// Run every configured kind on `series` and upsert the records into `path`.
    pub fn train_series(
        &self,
        series: &TargetSeries,
        path: &Path,
        generated_at: DateTime<Utc>,
    ) -> TickerReport {
        let ticker = &series.ticker;
        let mut report = TickerReport::new(ticker.clone());
        info!(
            %ticker,
            observations = series.len(),
            last_date = ?series.last_date(),
            "training ticker"
        );

        let existing = match self.gate.with_lock(GateKey::Predictions(path.to_path_buf()), || {
            PredictionFile::open(path)
        }) {
            Ok(file) => file,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        };

        let run = |adapter: &Box<dyn ModelAdapter>| {
            let result = self.run_kind(adapter.as_ref(), series, &existing, generated_at);
            (adapter.kind(), result)
        };
        let results: Vec<(ModelKind, Result<KindRun, ModelError>)> = if self.options.parallel {
            self.adapters.par_iter().map(run).collect()
        } else {
            self.adapters.iter().map(run).collect()
        };

        let mut records = Vec::new();
        for (kind, result) in results {
            let outcome = match result {
                Ok(run) => {
                    let outcome = ModelOutcome::Succeeded {
                        retrained: run.retrained,
                        records: run.records.len(),
                        cache_state: run.cache_state,
                    };
                    records.extend(run.records);
                    outcome
                }
                Err(e) => ModelOutcome::from_error(e),
            };
            report.outcomes.push((kind, outcome));
        }

        if records.is_empty() {
            debug!(%ticker, "no records produced, prediction file untouched");
            return report;
        }

        let write = self.gate.with_lock(GateKey::Predictions(path.to_path_buf()), || {
            let mut file = PredictionFile::open(path)?;
            let summary = file.upsert(records);
            if summary.changed() || !path.exists() {
                file.save()?;
            }
            info!(
                %ticker,
                path = %path.display(),
                inserted = summary.inserted,
                replaced = summary.replaced,
                unchanged = summary.unchanged,
                "prediction file updated"
            );
            Ok::<_, PredictionFileError>(())
        });
        match write {
            Ok(()) => report.prediction_file = Some(path.to_path_buf()),
            Err(e) => report.error = Some(e.to_string()),
        }
        report
    }

    fn run_kind(
        &self,
        adapter: &dyn ModelAdapter,
        series: &TargetSeries,
        existing: &PredictionFile,
        generated_at: DateTime<Utc>,
    ) -> Result<KindRun, ModelError> {
        let kind = adapter.kind();
        let ticker = &series.ticker;
        if series.len() < adapter.min_history() {
            return Err(ModelError::InsufficientHistory {
                kind,
                required: adapter.min_history(),
                available: series.len(),
            });
        }
        let Some(latest) = series.last_date() else {
            return Err(ModelError::InsufficientHistory {
                kind,
                required: adapter.min_history(),
                available: 0,
            });
        };

        self.gate.with_lock(GateKey::Model(ticker.clone(), kind), || {
            let cached = match adapter.load_cache(ticker) {
                Ok(cached) => cached,
                Err(e @ ModelError::CacheCorrupt { .. }) => {
                    warn!(%ticker, model = %kind, error = %e, "corrupt cache, retraining");
                    None
                }
                Err(e) => return Err(e),
            };

            let state = cache_state(cached.as_ref(), latest, adapter.staleness_days());
            let (artifact, retrained) = match (state, cached) {
                (CacheState::Cached, Some(artifact)) => {
                    debug!(%ticker, model = %kind, cutoff = %artifact.training_cutoff, "reusing cached artifact");
                    (artifact, false)
                }
                (state, _) => {
                    info!(%ticker, model = %kind, cache = ?state, "training");
                    (adapter.train(series)?, true)
                }
            };

            let from = match existing.latest_date(kind) {
                Some(recorded) => series.dates.partition_point(|d| *d <= recorded),
                None => series.len().saturating_sub(self.options.backtest_window),
            };
            let mut records: Vec<PredictionRecord> =
                adapter.walk_forward(&artifact, series, from, generated_at);
            records.extend(adapter.predict(&artifact, series, self.options.horizon, generated_at)?);

            Ok(KindRun {
                retrained,
                cache_state: state,
                records,
            })
        })
    }
}

struct KindRun {
    retrained: bool,
    cache_state: CacheState,
    records: Vec<PredictionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn gate_serializes_same_key() {
        let gate = TrainingGate::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let key = GateKey::Model(Ticker::parse("AAPL").unwrap(), ModelKind::Sarima);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                let key = key.clone();
                thread::spawn(move || {
                    gate.with_lock(key, || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gate_keys_are_independent() {
        let gate = TrainingGate::new();
        let a = GateKey::Model(Ticker::parse("AAPL").unwrap(), ModelKind::Sarima);
        let b = GateKey::Model(Ticker::parse("AAPL").unwrap(), ModelKind::AutoTs);
        // Nested locking on distinct keys must not deadlock
        let value = gate.with_lock(a, || gate.with_lock(b, || 7));
        assert_eq!(value, 7);
    }

    #[test]
    fn adapters_follow_enabled_order() {
        let models = ModelsConfig {
            enabled: vec![ModelKind::AutoTs, ModelKind::Sarima],
            ..ModelsConfig::default()
        };
        let tmp = tempfile::tempdir().unwrap();
        let kinds: Vec<ModelKind> = build_adapters(&models, tmp.path())
            .iter()
            .map(|a| a.kind())
            .collect();
        assert_eq!(kinds, vec![ModelKind::AutoTs, ModelKind::Sarima]);
    }

    #[test]
    fn options_come_from_models_config() {
        let options = TrainerOptions::from_models(&ModelsConfig::default(), true);
        assert_eq!(
            options,
            TrainerOptions {
                horizon: 1,
                backtest_window: 52,
                parallel: false,
                test_run: true,
            }
        );
    }
}
