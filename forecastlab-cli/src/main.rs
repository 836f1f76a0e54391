//! ForecastLab CLI: train, update, forecast, scrape and pipeline commands.
//!
//! Commands:
//! - `train`: fit every enabled model for one ticker and write its prediction file
//! - `update`: refresh prediction files that are older than the scraped data
//! - `forecast`: combine prediction files into `next_friday_predictions.json`
//! - `scrape`: fetch company closes and market indicators
//! - `pipeline`: scrape → model → forecast

mod logging;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use forecastlab_core::domain::Ticker;
use forecastlab_runner::{
    run_forecast, run_pipeline, run_scrape, ForecastConfig, PipelineOptions, TickerStatus, Trainer,
    Updater, DEFAULT_CONFIG_PATH,
};

use logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser)]
#[command(
    name = "forecastlab",
    version,
    about = "ForecastLab CLI: weekly stock price forecasting pipeline"
)]
struct Cli {
    /// Log verbosity (RUST_LOG takes precedence).
    #[arg(long, global = true, value_enum, ignore_case = true, default_value = "INFO")]
    log_level: LogLevel,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train all enabled models for one ticker.
    Train {
        /// Ticker to train (e.g., AAPL).
        #[arg(long)]
        ticker: String,

        /// Only use the first 108 observations.
        #[arg(long, default_value_t = false)]
        test_run: bool,

        /// Model artifact cache. Overrides [paths].cache.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Scraped data folder. Overrides [paths].scraped.
        #[arg(long)]
        scraped_folder: Option<PathBuf>,

        /// TOML configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config_path: PathBuf,

        /// Prediction file directory. Overrides [paths].predictions.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Refresh stale prediction files.
    Update {
        /// Prediction file directory. Overrides [paths].predictions.
        #[arg(long)]
        pred_dir: Option<PathBuf>,

        /// Scraped data folder. Overrides [paths].scraped.
        #[arg(long)]
        scraped_folder: Option<PathBuf>,

        /// Model artifact cache. Overrides [paths].cache.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Ticker for files whose name does not identify one.
        #[arg(long)]
        ticker: Option<String>,

        /// Update only this prediction file.
        #[arg(long)]
        single_file: Option<PathBuf>,

        /// TOML configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config_path: PathBuf,
    },
    /// Combine prediction files and market data into the weekly forecast.
    Forecast {
        /// Prediction file directory. Overrides [paths].predictions.
        #[arg(long)]
        pred_dir: Option<PathBuf>,

        /// Scraped data folder. Overrides [paths].scraped.
        #[arg(long)]
        scraped_folder: Option<PathBuf>,

        /// Forecast output directory. Overrides [paths].forecasts.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// TOML configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config_path: PathBuf,
    },
    /// Scrape company closes and market data.
    Scrape {
        /// Re-scrape tickers even when their data is recent.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Scraped data folder. Overrides [paths].scraped.
        #[arg(long)]
        scraped_folder: Option<PathBuf>,

        /// TOML configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config_path: PathBuf,
    },
    /// Run scrape → model → forecast.
    Pipeline {
        #[arg(long, default_value_t = false)]
        skip_scraping: bool,

        #[arg(long, default_value_t = false)]
        skip_modeling: bool,

        #[arg(long, default_value_t = false)]
        skip_forecasting: bool,

        /// Run later stages even when an earlier one fails.
        #[arg(long, default_value_t = false)]
        keep_going: bool,

        /// TOML configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config_path: PathBuf,
    },
}

/// Command-line path overrides applied on top of the configuration file.
#[derive(Default)]
struct PathOverrides {
    scraped: Option<PathBuf>,
    cache: Option<PathBuf>,
    predictions: Option<PathBuf>,
    forecasts: Option<PathBuf>,
}

fn load_config(path: &std::path::Path, overrides: PathOverrides) -> Result<ForecastConfig> {
    let mut config = ForecastConfig::load_or_default(path)
        .with_context(|| format!("load config {}", path.display()))?;
    if let Some(dir) = overrides.scraped {
        config.paths.scraped = dir;
    }
    if let Some(dir) = overrides.cache {
        config.paths.cache = dir;
    }
    if let Some(dir) = overrides.predictions {
        config.paths.predictions = dir;
    }
    if let Some(dir) = overrides.forecasts {
        config.paths.forecasts = dir;
    }
    Ok(config)
}

fn parse_ticker(raw: &str) -> Result<Ticker> {
    Ticker::parse(raw).with_context(|| format!("invalid ticker '{raw}'"))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_format)?;

    let ok = match cli.command {
        Commands::Train {
            ticker,
            test_run,
            cache_dir,
            scraped_folder,
            config_path,
            output_dir,
        } => {
            let config = load_config(
                &config_path,
                PathOverrides {
                    scraped: scraped_folder,
                    cache: cache_dir,
                    predictions: output_dir,
                    ..PathOverrides::default()
                },
            )?;
            run_train(&config, &parse_ticker(&ticker)?, test_run)
        }
        Commands::Update {
            pred_dir,
            scraped_folder,
            cache_dir,
            ticker,
            single_file,
            config_path,
        } => {
            let config = load_config(
                &config_path,
                PathOverrides {
                    scraped: scraped_folder,
                    cache: cache_dir,
                    predictions: pred_dir,
                    ..PathOverrides::default()
                },
            )?;
            let ticker = ticker.as_deref().map(parse_ticker).transpose()?;
            run_update(&config, ticker, single_file)?
        }
        Commands::Forecast {
            pred_dir,
            scraped_folder,
            output_dir,
            config_path,
        } => {
            let config = load_config(
                &config_path,
                PathOverrides {
                    scraped: scraped_folder,
                    predictions: pred_dir,
                    forecasts: output_dir,
                    ..PathOverrides::default()
                },
            )?;
            let artifacts = run_forecast(&config)?;
            info!(path = %artifacts.forecast.display(), "forecast complete");
            true
        }
        Commands::Scrape {
            force,
            scraped_folder,
            config_path,
        } => {
            let config = load_config(
                &config_path,
                PathOverrides {
                    scraped: scraped_folder,
                    ..PathOverrides::default()
                },
            )?;
            run_scrape(&config, force)?;
            true
        }
        Commands::Pipeline {
            skip_scraping,
            skip_modeling,
            skip_forecasting,
            keep_going,
            config_path,
        } => {
            let config = load_config(&config_path, PathOverrides::default())?;
            let options = PipelineOptions {
                skip_scraping,
                skip_modeling,
                skip_forecasting,
                keep_going,
            };
            run_pipeline(&config, &options).all_succeeded()
        }
    };

    if !ok {
        error!("run finished with failures");
        std::process::exit(1);
    }
    Ok(())
}

/// A ticker whose every kind was skipped for short history exits 0.
fn run_train(config: &ForecastConfig, ticker: &Ticker, test_run: bool) -> bool {
    let trainer = Trainer::from_config(config, test_run);
    let report = trainer.train_ticker(ticker, Utc::now());
    report.log_summary();
    report.status() != TickerStatus::Failed
}

fn run_update(
    config: &ForecastConfig,
    ticker: Option<Ticker>,
    single_file: Option<PathBuf>,
) -> Result<bool> {
    let updater = Updater::new(Trainer::from_config(config, false)).with_ticker_override(ticker);
    match single_file {
        Some(path) => {
            let updated = updater
                .update_single(&path)
                .with_context(|| format!("update {}", path.display()))?;
            info!(path = %path.display(), updated, "single file update complete");
            Ok(true)
        }
        None => {
            let report = updater.update_all(&config.paths.predictions)?;
            report.log_summary();
            Ok(report.all_succeeded())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use clap::CommandFactory;
    use forecastlab_core::data::ScrapedStore;
    use forecastlab_core::domain::ModelKind;
    use forecastlab_core::series::RawSeries;
    use forecastlab_runner::prediction_filename;

    fn workspace_config(root: &std::path::Path) -> ForecastConfig {
        let mut config = ForecastConfig::default();
        config.paths.scraped = root.join("scraped");
        config.paths.cache = root.join("cache");
        config.paths.predictions = root.join("predictions");
        config.paths.forecasts = root.join("forecasts");
        config.models.enabled = vec![ModelKind::AutoTs];
        config
    }

    fn weekly_closes(weeks: i64) -> RawSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let rows = (0..weeks)
            .map(|i| (start + Duration::weeks(i), vec![Some(100.0 + i as f64)]))
            .collect();
        RawSeries::from_rows(&["close".to_string()], rows)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn train_requires_ticker() {
        assert!(Cli::try_parse_from(["forecastlab", "train"]).is_err());
        let cli = Cli::try_parse_from(["forecastlab", "train", "--ticker", "AAPL", "--test-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Train { test_run: true, .. }));
    }

    #[test]
    fn log_level_is_global_and_case_insensitive() {
        let cli = Cli::try_parse_from(["forecastlab", "update", "--log-level", "warning"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Warning);
        let cli = Cli::try_parse_from(["forecastlab", "--log-level", "DEBUG", "forecast"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn train_with_short_history_exits_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let config = workspace_config(tmp.path());
        let zzz9 = Ticker::parse("ZZZ9").unwrap();
        ScrapedStore::new(&config.paths.scraped)
            .write_series(&zzz9, &weekly_closes(10))
            .unwrap();

        assert!(run_train(&config, &zzz9, false));
        assert!(!config.paths.predictions.join(prediction_filename(&zzz9)).exists());
    }

    #[test]
    fn train_without_scraped_data_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let config = workspace_config(tmp.path());
        assert!(!run_train(&config, &Ticker::parse("MSFT").unwrap(), false));
    }

    #[test]
    fn overrides_replace_config_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(
            &tmp.path().join("missing.toml"),
            PathOverrides {
                cache: Some(PathBuf::from("/tmp/cache")),
                ..PathOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.paths.cache, PathBuf::from("/tmp/cache"));
        assert_eq!(config.paths.scraped, ForecastConfig::default().paths.scraped);
    }
}
