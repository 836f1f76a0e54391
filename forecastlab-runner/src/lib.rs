//! ForecastLab Runner: training orchestration, prediction updates, forecast
//! combination and the end-to-end pipeline.
//!
//! This crate builds on `forecastlab-core` to provide:
//! - TOML configuration with defaults for every section
//! - Prediction files keyed by (date, model) with idempotent upsert
//! - The trainer: cache-aware fitting, walk-forward backfill, horizon forecasts
//! - The updater for stale prediction files
//! - The forecast combiner (model selection, ridge stacking, JSON output)
//! - The scrape stage and the scrape → model → forecast pipeline

pub mod combiner;
pub mod config;
pub mod pipeline;
pub mod predictions;
pub mod report;
pub mod scrape;
pub mod trainer;
pub mod updater;

pub use combiner::{
    combine, combine_with_diagnostics, load_ticker_predictions, write_forecast, Combination,
    CombineError, CombinedFeatureRow, ForecastArtifacts, ForecastOutput, TickerForecast,
    TickerPredictions,
};
pub use config::{
    CombineConfig, ConfigError, ForecastConfig, ModelsConfig, PathsConfig, ScrapeConfig,
    DEFAULT_CONFIG_PATH,
};
pub use pipeline::{
    run_forecast, run_model, run_pipeline, run_scrape, run_stages, PipelineOptions,
    PipelineReport, Stage, StageStatus,
};
pub use predictions::{
    infer_ticker, prediction_filename, PredictionFile, PredictionFileError, UpsertSummary,
};
pub use report::{ModelOutcome, RunReport, TickerReport, TickerStatus};
pub use scrape::{scrape_companies, scrape_market, scrape_tickers, ScrapeSummary};
pub use trainer::{
    build_adapters, GateKey, TrainError, Trainer, TrainerOptions, TrainingGate,
    TEST_RUN_OBSERVATIONS,
};
pub use updater::{UpdateError, UpdateReport, Updater};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn trainer_is_send_sync() {
        assert_send::<Trainer>();
        assert_sync::<Trainer>();
        assert_send::<TrainingGate>();
        assert_sync::<TrainingGate>();
    }

    #[test]
    fn reports_are_send() {
        assert_send::<TickerReport>();
        assert_send::<RunReport>();
        assert_send::<UpdateReport>();
        assert_send::<PipelineReport>();
    }

    #[test]
    fn config_is_send_sync() {
        assert_send::<ForecastConfig>();
        assert_sync::<ForecastConfig>();
        assert_send::<PredictionFile>();
        assert_sync::<PredictionFile>();
    }
}
