//! Pipeline orchestrator: scrape → model → forecast, strictly in order.
//!
//! A failed stage marks every later stage `NotRun` unless `keep_going` is
//! set. Skip flags mark a stage `Skipped` without running it; a skipped stage
//! never blocks the ones after it.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{error, info, warn};

use forecastlab_core::data::{DataProvider, FredProvider, ScrapedStore, YahooProvider};

use crate::combiner::{
    combine_with_diagnostics, load_ticker_predictions, write_forecast, ForecastArtifacts,
};
use crate::config::ForecastConfig;
use crate::scrape::{scrape_companies, scrape_market, scrape_tickers};
use crate::trainer::Trainer;
use crate::updater::Updater;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Scrape,
    Model,
    Forecast,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Scrape, Stage::Model, Stage::Forecast];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::Model => "model",
            Stage::Forecast => "forecast",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Skipped,
    Failed(String),
    /// An earlier stage failed.
    NotRun,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub skip_scraping: bool,
    pub skip_modeling: bool,
    pub skip_forecasting: bool,
    /// Run later stages even after a failure.
    pub keep_going: bool,
}

impl PipelineOptions {
    fn skips(&self, stage: Stage) -> bool {
        match stage {
            Stage::Scrape => self.skip_scraping,
            Stage::Model => self.skip_modeling,
            Stage::Forecast => self.skip_forecasting,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub stages: Vec<(Stage, StageStatus)>,
}

impl PipelineReport {
    pub fn status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, st)| st)
    }

    /// No stage failed or was prevented from running.
    pub fn all_succeeded(&self) -> bool {
        self.stages
            .iter()
            .all(|(_, st)| matches!(st, StageStatus::Completed | StageStatus::Skipped))
    }

    pub fn log_summary(&self) {
        for (stage, status) in &self.stages {
            match status {
                StageStatus::Completed => info!(%stage, "stage completed"),
                StageStatus::Skipped => info!(%stage, "stage skipped"),
                StageStatus::Failed(reason) => error!(%stage, "stage failed: {reason}"),
                StageStatus::NotRun => warn!(%stage, "stage not run"),
            }
        }
    }
}

/// Run the stages in order, calling `run` for each one that is not skipped.
pub fn run_stages<F>(options: &PipelineOptions, mut run: F) -> PipelineReport
where
    F: FnMut(Stage) -> anyhow::Result<()>,
{
    let mut report = PipelineReport::default();
    let mut blocked = false;

    for stage in Stage::ALL {
        let status = if options.skips(stage) {
            StageStatus::Skipped
        } else if blocked {
            StageStatus::NotRun
        } else {
            info!(%stage, "stage starting");
            match run(stage) {
                Ok(()) => StageStatus::Completed,
                Err(e) => {
                    error!(%stage, "stage failed: {e:#}");
                    blocked = !options.keep_going;
                    StageStatus::Failed(format!("{e:#}"))
                }
            }
        };
        report.stages.push((stage, status));
    }
    report
}

/// Run the full pipeline against live providers and the configured folders.
pub fn run_pipeline(config: &ForecastConfig, options: &PipelineOptions) -> PipelineReport {
    let report = run_stages(options, |stage| match stage {
        Stage::Scrape => run_scrape(config, false),
        Stage::Model => run_model(config, Utc::now()),
        Stage::Forecast => run_forecast(config).map(|_| ()),
    });
    report.log_summary();
    report
}

/// Scrape company series and market data.
pub fn run_scrape(config: &ForecastConfig, force: bool) -> anyhow::Result<()> {
    let store = ScrapedStore::new(&config.paths.scraped);
    let today = Utc::now().date_naive();
    let yahoo = YahooProvider::new().context("create Yahoo Finance client")?;

    let tickers = scrape_tickers(&config.scrape, &store).context("list scraped tickers")?;
    let summary = scrape_companies(&yahoo, &store, &tickers, &config.scrape, today, force);

    let fred = match FredProvider::from_env() {
        Ok(provider) => Some(provider),
        Err(e) => {
            warn!(error = %e, "FRED provider unavailable");
            None
        }
    };
    let market = scrape_market(
        &yahoo,
        fred.as_ref().map(|p| p as &dyn DataProvider),
        &store,
        &config.scrape,
        today,
    );

    if !summary.all_succeeded() {
        let failed: Vec<&str> = summary.errors.iter().map(|(s, _)| s.as_str()).collect();
        bail!("scrape failed for {}", failed.join(", "));
    }
    market.context("market data scrape")?;
    Ok(())
}

/// Update existing prediction files, then train scraped tickers that have none.
///
/// Tickers whose every kind was skipped for short history do not fail the
/// stage. They have no prediction file yet and are picked up again next run.
pub fn run_model(config: &ForecastConfig, generated_at: DateTime<Utc>) -> anyhow::Result<()> {
    let updater = Updater::new(Trainer::from_config(config, false));
    let update = updater
        .update_all_at(&config.paths.predictions, generated_at)
        .context("update prediction files")?;
    update.log_summary();

    let trainer = updater.trainer();
    let missing: Vec<_> = trainer
        .scraped_store()
        .tickers()
        .context("list scraped tickers")?
        .into_iter()
        .filter(|t| !trainer.prediction_path(t).exists())
        .collect();
    let run = trainer.train_all(&missing, generated_at);
    run.log_summary();

    let mut failures: Vec<String> = update
        .failed
        .iter()
        .map(|(path, reason)| format!("{}: {reason}", path.display()))
        .collect();
    failures.extend(run.failed_tickers().map(|t| t.ticker.to_string()));
    if !failures.is_empty() {
        bail!("modeling failed for {}", failures.join(", "));
    }
    Ok(())
}

/// Combine prediction files with market data and write the forecast artifacts.
pub fn run_forecast(config: &ForecastConfig) -> anyhow::Result<ForecastArtifacts> {
    let store = ScrapedStore::new(&config.paths.scraped);
    let inputs = load_ticker_predictions(&config.paths.predictions, &store, &config.models.target_column)
        .context("load prediction files")?;
    let market = store.load_market().context("load market data")?;

    let combination = combine_with_diagnostics(&inputs, &market, &config.forecast);
    if combination.output.predictions.is_empty() {
        bail!("no ticker could be combined ({} excluded)", combination.excluded.len());
    }
    write_forecast(&config.paths.forecasts, &combination)
}
