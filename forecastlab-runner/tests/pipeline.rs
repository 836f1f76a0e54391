//! End-to-end: scraped folders → model stage → forecast stage.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::fs;

use forecastlab_core::data::ScrapedStore;
use forecastlab_core::domain::{ModelKind, Ticker};
use forecastlab_core::series::RawSeries;
use forecastlab_runner::{
    prediction_filename, run_forecast, run_model, run_stages, ForecastConfig, ForecastOutput,
    PipelineOptions, Stage, StageStatus,
};

const WEEKS: i64 = 80;

fn friday(week: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 7).unwrap() + Duration::days(7 * week)
}

fn company(base: f64, slope: f64) -> RawSeries {
    let rows = (0..WEEKS)
        .map(|w| {
            let t = w as f64;
            (friday(w), vec![Some(base + slope * t + (t * 0.9).sin())])
        })
        .collect();
    RawSeries::from_rows(&["close".to_string()], rows)
}

fn market() -> RawSeries {
    let rows = (0..WEEKS)
        .map(|w| (friday(w), vec![Some(4000.0 + 3.0 * w as f64), Some(18.0 + (w % 5) as f64)]))
        .collect();
    RawSeries::from_rows(&["SP500".to_string(), "VIX".to_string()], rows)
}

fn setup(tmp: &std::path::Path) -> ForecastConfig {
    let mut config = ForecastConfig::default();
    config.paths.scraped = tmp.join("scraped");
    config.paths.cache = tmp.join("cache");
    config.paths.predictions = tmp.join("predictions");
    config.paths.forecasts = tmp.join("forecasts");
    config.models.enabled = vec![ModelKind::AutoTs];

    let store = ScrapedStore::new(&config.paths.scraped);
    store
        .write_series(&Ticker::parse("AAPL").unwrap(), &company(150.0, 0.8))
        .unwrap();
    store
        .write_series(&Ticker::parse("MSFT").unwrap(), &company(300.0, -0.5))
        .unwrap();
    store.write_market(&market()).unwrap();
    config
}

#[test]
fn model_then_forecast_produces_next_friday_predictions() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path());
    let generated_at = Utc.with_ymd_and_hms(2023, 7, 17, 9, 30, 0).unwrap();

    run_model(&config, generated_at).unwrap();
    for name in ["AAPL", "MSFT"] {
        let path = config
            .paths
            .predictions
            .join(prediction_filename(&Ticker::parse(name).unwrap()));
        assert!(path.exists(), "{name} prediction file missing");
    }

    let artifacts = run_forecast(&config).unwrap();
    let json = fs::read_to_string(&artifacts.forecast).unwrap();
    assert!(json.ends_with('\n'));
    let output: ForecastOutput = serde_json::from_str(&json).unwrap();
    assert_eq!(output.generated_at, "2023-07-17T09:30:00Z");
    assert_eq!(output.predictions.keys().collect::<Vec<_>>(), vec!["AAPL", "MSFT"]);
    for forecast in output.predictions.values() {
        assert!(forecast.next_friday_close.is_finite());
        assert!(!forecast.model.is_empty());
    }

    let combined = artifacts.combined.unwrap();
    assert_eq!(
        combined.file_name().unwrap().to_str().unwrap(),
        format!("combined_data_until_{}.csv", friday(WEEKS - 1).format("%Y%m%d"))
    );
}

#[test]
fn rerunning_with_unchanged_inputs_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path());
    let generated_at = Utc.with_ymd_and_hms(2023, 7, 17, 9, 30, 0).unwrap();
    let aapl_file = config
        .paths
        .predictions
        .join(prediction_filename(&Ticker::parse("AAPL").unwrap()));

    run_model(&config, generated_at).unwrap();
    let first_forecast = fs::read(run_forecast(&config).unwrap().forecast).unwrap();
    let first_predictions = fs::read(&aapl_file).unwrap();

    run_model(&config, Utc.with_ymd_and_hms(2023, 7, 18, 9, 30, 0).unwrap()).unwrap();
    let second_forecast = fs::read(run_forecast(&config).unwrap().forecast).unwrap();

    assert_eq!(fs::read(&aapl_file).unwrap(), first_predictions);
    assert_eq!(second_forecast, first_forecast);
}

/// Closes for the last `weeks` grid Fridays only.
fn recent_listing(weeks: i64) -> RawSeries {
    let rows = (WEEKS - weeks..WEEKS)
        .map(|w| (friday(w), vec![Some(20.0 + w as f64)]))
        .collect();
    RawSeries::from_rows(&["close".to_string()], rows)
}

#[test]
fn short_history_ticker_does_not_block_the_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path());
    let zzz9 = Ticker::parse("ZZZ9").unwrap();
    ScrapedStore::new(&config.paths.scraped)
        .write_series(&zzz9, &recent_listing(10))
        .unwrap();
    let generated_at = Utc.with_ymd_and_hms(2023, 7, 17, 9, 30, 0).unwrap();

    let report = run_stages(
        &PipelineOptions {
            skip_scraping: true,
            ..PipelineOptions::default()
        },
        |stage| match stage {
            Stage::Scrape => unreachable!("scrape is skipped"),
            Stage::Model => run_model(&config, generated_at),
            Stage::Forecast => run_forecast(&config).map(|_| ()),
        },
    );
    assert_eq!(report.status(Stage::Model), Some(&StageStatus::Completed));
    assert_eq!(report.status(Stage::Forecast), Some(&StageStatus::Completed));
    assert!(report.all_succeeded());
    assert!(!config.paths.predictions.join(prediction_filename(&zzz9)).exists());

    let artifacts = run_forecast(&config).unwrap();
    let output: ForecastOutput =
        serde_json::from_str(&fs::read_to_string(artifacts.forecast).unwrap()).unwrap();
    assert_eq!(output.predictions.keys().collect::<Vec<_>>(), vec!["AAPL", "MSFT"]);

    // Still short on the next run: retried and skipped again
    run_model(&config, Utc.with_ymd_and_hms(2023, 7, 18, 9, 30, 0).unwrap()).unwrap();
    assert!(!config.paths.predictions.join(prediction_filename(&zzz9)).exists());
}

#[test]
fn forecast_without_market_data_fails_the_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path());
    run_model(&config, Utc::now()).unwrap();
    for entry in fs::read_dir(&config.paths.scraped).unwrap() {
        let path = entry.unwrap().path();
        if path.file_name().unwrap().to_str().unwrap().starts_with("market_data") {
            fs::remove_dir_all(path).unwrap();
        }
    }

    let options = PipelineOptions {
        skip_scraping: true,
        ..PipelineOptions::default()
    };
    let report = run_stages(&options, |stage| match stage {
        Stage::Scrape => unreachable!("scrape is skipped"),
        Stage::Model => run_model(&config, Utc::now()),
        Stage::Forecast => run_forecast(&config).map(|_| ()),
    });
    assert_eq!(report.status(Stage::Model), Some(&StageStatus::Completed));
    assert!(matches!(report.status(Stage::Forecast), Some(StageStatus::Failed(reason)) if reason.contains("market")));
    assert!(!report.all_succeeded());
}
