//! Forecast combiner: merges per-ticker model predictions with lagged market
//! features into the final next-period forecast.
//!
//! For each ticker:
//! - the forecast row is the record dated the Friday after the last actual
//!   value, or failing that the earliest record after it
//! - market features for a row dated `t` come from the latest market row at
//!   or before `t - feature_lag_days`, if it lies within `max_gap_days`
//! - history rows (dates with an actual value and every forecast-row model)
//!   score the candidates: each raw model, the mean ensemble, and a ridge
//!   regression on predictions plus market features (k-fold out-of-fold MAE)
//!
//! Output is deterministic: ordered maps, values rounded to 4 decimals and a
//! `generated_at` taken from the inputs rather than the clock.

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use forecastlab_core::data::{DataError, ScrapedStore};
use forecastlab_core::domain::{next_friday, ModelKind, PredictionRecord, Ticker, DATE_FORMAT};
use forecastlab_core::linalg::{least_squares, mean, variance};
use forecastlab_core::series::RawSeries;

use crate::config::CombineConfig;
use crate::predictions::{infer_ticker, list_prediction_files, PredictionFile, PredictionFileError};

pub const FORECAST_FILENAME: &str = "next_friday_predictions.json";
pub const COMBINED_DATA_PREFIX: &str = "combined_data_until_";

const ENSEMBLE_LABEL: &str = "Ensemble";
const RIDGE_LABEL: &str = "Ridge";

#[derive(Debug, Error)]
pub enum CombineError {
    #[error("prediction file error: {0}")]
    Predictions(#[from] PredictionFileError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("no prediction files found in {0}")]
    NoPredictions(PathBuf),
}

/// Model output and known actuals for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerPredictions {
    pub ticker: Ticker,
    pub records: Vec<PredictionRecord>,
    /// Known actual values by date, ascending.
    pub actuals: Vec<(NaiveDate, f64)>,
}

/// One joined row: predictions, actual and market features for a date.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedFeatureRow {
    pub date: NaiveDate,
    pub ticker: Ticker,
    pub predictions: BTreeMap<ModelKind, f64>,
    pub actual: Option<f64>,
    pub features: BTreeMap<String, f64>,
}

/// Final forecast artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutput {
    pub generated_at: String,
    pub predictions: BTreeMap<String, TickerForecast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerForecast {
    pub next_friday_close: f64,
    pub model: String,
}

impl ForecastOutput {
    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Forecast plus the rows and exclusions behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    pub output: ForecastOutput,
    pub rows: Vec<CombinedFeatureRow>,
    /// Tickers left out, with the reason.
    pub excluded: Vec<(Ticker, String)>,
}

/// Combine per-ticker predictions with market data into one forecast.
pub fn combine(
    tickers: &[TickerPredictions],
    market: &RawSeries,
    config: &CombineConfig,
) -> ForecastOutput {
    combine_with_diagnostics(tickers, market, config).output
}

pub fn combine_with_diagnostics(
    tickers: &[TickerPredictions],
    market: &RawSeries,
    config: &CombineConfig,
) -> Combination {
    let mut market = market.clone();
    market.forward_fill();

    let mut ordered: Vec<&TickerPredictions> = tickers.iter().collect();
    ordered.sort_by(|a, b| a.ticker.cmp(&b.ticker));

    let mut predictions = BTreeMap::new();
    let mut rows = Vec::new();
    let mut excluded = Vec::new();
    let mut generated_at: Option<DateTime<Utc>> = None;

    for input in ordered {
        match combine_ticker(input, &market, config) {
            Ok(combined) => {
                debug!(
                    ticker = %input.ticker,
                    model = %combined.model,
                    history_rows = combined.rows.len() - 1,
                    "ticker combined"
                );
                generated_at = generated_at.max(Some(combined.generated_at));
                predictions.insert(
                    input.ticker.to_string(),
                    TickerForecast {
                        next_friday_close: round4(combined.value),
                        model: combined.model,
                    },
                );
                rows.extend(combined.rows);
            }
            Err(reason) => {
                warn!(ticker = %input.ticker, "excluded from forecast: {reason}");
                excluded.push((input.ticker.clone(), reason));
            }
        }
    }

    let generated_at = generated_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Combination {
        output: ForecastOutput {
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            predictions,
        },
        rows,
        excluded,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

struct TickerCombination {
    value: f64,
    model: String,
    generated_at: DateTime<Utc>,
    /// History rows followed by the forecast row.
    rows: Vec<CombinedFeatureRow>,
}

/// Market row for a prediction dated `date`, honouring the lag and gap limits.
fn market_index(market: &RawSeries, date: NaiveDate, config: &CombineConfig) -> Option<usize> {
    let lookup = date - Duration::days(config.feature_lag_days);
    let idx = market.asof_index(lookup)?;
    ((lookup - market.dates[idx]).num_days() <= config.max_gap_days).then_some(idx)
}

fn combine_ticker(
    input: &TickerPredictions,
    market: &RawSeries,
    config: &CombineConfig,
) -> Result<TickerCombination, String> {
    let mut by_date: BTreeMap<NaiveDate, BTreeMap<ModelKind, &PredictionRecord>> = BTreeMap::new();
    for record in input.records.iter().filter(|r| r.predicted_value.is_finite()) {
        by_date.entry(record.date).or_default().insert(record.model, record);
    }
    let actuals: BTreeMap<NaiveDate, f64> = input.actuals.iter().copied().collect();
    let last_actual = actuals.keys().next_back().copied();

    let forecast_date = match last_actual {
        Some(last) => {
            let friday = next_friday(last);
            if by_date.contains_key(&friday) {
                Some(friday)
            } else {
                by_date.range(last + Duration::days(1)..).next().map(|(d, _)| *d)
            }
        }
        None => by_date.keys().next().copied(),
    }
    .ok_or_else(|| "no prediction after the last actual value".to_string())?;

    let forecast_models = &by_date[&forecast_date];
    let kinds: Vec<ModelKind> = forecast_models.keys().copied().collect();
    let market_idx = market_index(market, forecast_date, config).ok_or_else(|| {
        format!(
            "no market data within {} days of {}",
            config.max_gap_days,
            forecast_date - Duration::days(config.feature_lag_days)
        )
    })?;
    let feature_columns: Vec<&String> = market
        .columns
        .iter()
        .filter(|(_, values)| values[market_idx].is_some())
        .map(|(name, _)| name)
        .collect();

    let features_at = |idx: usize| -> Option<BTreeMap<String, f64>> {
        feature_columns
            .iter()
            .map(|name| Some(((*name).clone(), market.columns[*name][idx]?)))
            .collect()
    };
    let make_row = |date: NaiveDate, models: &BTreeMap<ModelKind, &PredictionRecord>, idx: usize| {
        Some(CombinedFeatureRow {
            date,
            ticker: input.ticker.clone(),
            predictions: kinds
                .iter()
                .map(|k| Some((*k, models.get(k)?.predicted_value)))
                .collect::<Option<_>>()?,
            actual: actuals.get(&date).copied(),
            features: features_at(idx)?,
        })
    };

    let mut history: Vec<CombinedFeatureRow> = by_date
        .range(..forecast_date)
        .filter(|(date, _)| actuals.contains_key(date))
        .filter_map(|(date, models)| {
            let idx = market_index(market, *date, config)?;
            make_row(*date, models, idx)
        })
        .collect();
    let forecast_row = make_row(forecast_date, forecast_models, market_idx)
        .ok_or_else(|| "incomplete forecast row".to_string())?;

    let (value, model) = select_model(&history, &forecast_row, &kinds, config);
    let generated_at = forecast_models
        .values()
        .map(|r| r.generated_at)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    history.push(forecast_row);
    Ok(TickerCombination {
        value,
        model,
        generated_at,
        rows: history,
    })
}

fn ensemble(row: &CombinedFeatureRow) -> f64 {
    let values: Vec<f64> = row.predictions.values().copied().collect();
    mean(&values)
}

/// Design row: predictions in kind order, then market features in name order.
fn design(row: &CombinedFeatureRow) -> Vec<f64> {
    row.predictions
        .values()
        .chain(row.features.values())
        .copied()
        .collect()
}

/// Pick the lowest-MAE candidate and return its forecast and label.
fn select_model(
    history: &[CombinedFeatureRow],
    forecast: &CombinedFeatureRow,
    kinds: &[ModelKind],
    config: &CombineConfig,
) -> (f64, String) {
    let fallback = (ensemble(forecast), ENSEMBLE_LABEL.to_string());
    if history.is_empty() {
        return fallback;
    }

    let actual = |row: &CombinedFeatureRow| row.actual.unwrap_or(f64::NAN);
    let mae_of = |predict: &dyn Fn(&CombinedFeatureRow) -> f64| -> f64 {
        let errors: Vec<f64> = history.iter().map(|r| (predict(r) - actual(r)).abs()).collect();
        mean(&errors)
    };

    let mut candidates: Vec<(String, f64, f64)> = Vec::new();
    for kind in kinds {
        let mae = mae_of(&|r: &CombinedFeatureRow| r.predictions[kind]);
        candidates.push((kind.name().to_string(), mae, forecast.predictions[kind]));
    }
    candidates.push((ENSEMBLE_LABEL.to_string(), mae_of(&ensemble), ensemble(forecast)));

    let n_features = design(forecast).len();
    if history.len() >= n_features + 3 && history.len() >= config.cv_folds {
        if let Some((mae, value)) = ridge_candidate(history, forecast, config) {
            candidates.push((RIDGE_LABEL.to_string(), mae, value));
        }
    }

    let mut best: Option<&(String, f64, f64)> = None;
    for candidate in &candidates {
        if !candidate.1.is_finite() || !candidate.2.is_finite() {
            continue;
        }
        if best.map_or(true, |b| candidate.1 < b.1) {
            best = Some(candidate);
        }
    }
    for (label, mae, _) in &candidates {
        debug!(ticker = %forecast.ticker, candidate = %label, mae, "combiner candidate");
    }
    best.map(|(label, _, value)| (*value, label.clone()))
        .unwrap_or(fallback)
}

/// Out-of-fold MAE over contiguous folds, and the forecast from a fit on
/// all history rows.
fn ridge_candidate(
    history: &[CombinedFeatureRow],
    forecast: &CombinedFeatureRow,
    config: &CombineConfig,
) -> Option<(f64, f64)> {
    let x: Vec<Vec<f64>> = history.iter().map(design).collect();
    let y: Vec<f64> = history.iter().map(|r| r.actual).collect::<Option<_>>()?;
    let n = x.len();
    let folds = config.cv_folds.max(2).min(n);

    let mut errors = Vec::with_capacity(n);
    for fold in 0..folds {
        let start = fold * n / folds;
        let end = (fold + 1) * n / folds;
        let train_idx: Vec<usize> = (0..n).filter(|i| *i < start || *i >= end).collect();
        let train_x: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
        let train_y: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();
        let predicted = ridge_fit_predict(&train_x, &train_y, &x[start..end], config.ridge_lambda)?;
        errors.extend(predicted.iter().zip(&y[start..end]).map(|(p, a)| (p - a).abs()));
    }

    let value = ridge_fit_predict(&x, &y, &[design(forecast)], config.ridge_lambda)?
        .into_iter()
        .next()?;
    Some((mean(&errors), value))
}

/// Fit ridge on standardized columns (intercept unpenalized) and predict `test`.
fn ridge_fit_predict(
    train: &[Vec<f64>],
    y: &[f64],
    test: &[Vec<f64>],
    lambda: f64,
) -> Option<Vec<f64>> {
    let cols = train.first()?.len();
    let scale: Vec<(f64, f64)> = (0..cols)
        .map(|j| {
            let column: Vec<f64> = train.iter().map(|row| row[j]).collect();
            let m = mean(&column);
            let sd = variance(&column).sqrt();
            (m, if sd > 1e-12 { sd } else { 1.0 })
        })
        .collect();
    let standardize = |row: &Vec<f64>| -> Vec<f64> {
        std::iter::once(1.0)
            .chain(row.iter().zip(&scale).map(|(v, (m, sd))| (v - m) / sd))
            .collect()
    };

    let rows: Vec<Vec<f64>> = train.iter().map(standardize).collect();
    let fit = least_squares(&rows, y, lambda, &[0])?;
    let predictions: Vec<f64> = test
        .iter()
        .map(|row| {
            standardize(row)
                .iter()
                .zip(&fit.coefficients)
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect();
    predictions.iter().all(|v| v.is_finite()).then_some(predictions)
}

/// Load every prediction file in `pred_dir` with actuals from the scraped store.
pub fn load_ticker_predictions(
    pred_dir: &Path,
    store: &ScrapedStore,
    target_column: &str,
) -> Result<Vec<TickerPredictions>, CombineError> {
    let files = list_prediction_files(pred_dir)?;
    if files.is_empty() {
        return Err(CombineError::NoPredictions(pred_dir.to_path_buf()));
    }

    let mut by_ticker: BTreeMap<Ticker, Vec<PredictionRecord>> = BTreeMap::new();
    for path in files {
        let Some(ticker) = infer_ticker(&path) else {
            warn!(path = %path.display(), "cannot infer ticker, ignoring prediction file");
            continue;
        };
        let file = PredictionFile::open(&path)?;
        by_ticker.entry(ticker).or_default().extend(file.records().cloned());
    }

    let mut out = Vec::with_capacity(by_ticker.len());
    for (ticker, records) in by_ticker {
        let actuals = match store
            .load_series(&ticker)
            .map_err(|e| e.to_string())
            .and_then(|raw| raw.target(&ticker, target_column).map_err(|e| e.to_string()))
        {
            Ok(series) => series.dates.into_iter().zip(series.values).collect(),
            Err(e) => {
                warn!(%ticker, error = %e, "no actuals for ticker");
                Vec::new()
            }
        };
        out.push(TickerPredictions {
            ticker,
            records,
            actuals,
        });
    }
    Ok(out)
}

/// Paths written by `write_forecast`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastArtifacts {
    pub forecast: PathBuf,
    pub combined: Option<PathBuf>,
}

/// Write the forecast JSON and the combined-rows CSV into `dir`, removing
/// older combined-data files.
pub fn write_forecast(dir: &Path, combination: &Combination) -> anyhow::Result<ForecastArtifacts> {
    fs::create_dir_all(dir).with_context(|| format!("create output dir {}", dir.display()))?;

    let forecast = dir.join(FORECAST_FILENAME);
    let json = combination.output.to_json().context("serialize forecast")?;
    write_atomic(&forecast, json.as_bytes())?;
    info!(
        path = %forecast.display(),
        tickers = combination.output.predictions.len(),
        "forecast written"
    );

    let until = combination
        .rows
        .iter()
        .filter(|r| r.actual.is_some())
        .map(|r| r.date)
        .max()
        .or_else(|| combination.rows.iter().map(|r| r.date).max());
    let Some(until) = until else {
        return Ok(ForecastArtifacts {
            forecast,
            combined: None,
        });
    };

    let combined = dir.join(format!("{COMBINED_DATA_PREFIX}{}.csv", until.format(DATE_FORMAT)));
    let mut buf = Vec::new();
    write_rows(&mut buf, &combination.rows).context("serialize combined rows")?;
    write_atomic(&combined, &buf)?;

    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_old = path != combined
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(COMBINED_DATA_PREFIX) && n.ends_with(".csv"));
        if is_old {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            debug!(path = %path.display(), "removed old combined data");
        }
    }

    Ok(ForecastArtifacts {
        forecast,
        combined: Some(combined),
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// CSV of combined rows: `date,ticker,<models>,actual,<features>`.
fn write_rows<W: std::io::Write>(writer: W, rows: &[CombinedFeatureRow]) -> Result<(), csv::Error> {
    let kinds: BTreeSet<ModelKind> = rows.iter().flat_map(|r| r.predictions.keys().copied()).collect();
    let features: BTreeSet<&String> = rows.iter().flat_map(|r| r.features.keys()).collect();

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["date".to_string(), "ticker".to_string()];
    header.extend(kinds.iter().map(|k| k.name().to_string()));
    header.push("actual".to_string());
    header.extend(features.iter().map(|f| f.to_string()));
    wtr.write_record(&header)?;

    let cell = |v: Option<f64>| v.map(|x| round4(x).to_string()).unwrap_or_default();
    for row in rows {
        let mut record = vec![row.date.to_string(), row.ticker.to_string()];
        record.extend(kinds.iter().map(|k| cell(row.predictions.get(k).copied())));
        record.push(cell(row.actual));
        record.extend(features.iter().map(|f| cell(row.features.get(*f).copied())));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn friday(week: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap() + Duration::days(7 * week)
    }

    fn record(ticker: &str, week: i64, kind: ModelKind, value: f64, hour: u32) -> PredictionRecord {
        PredictionRecord {
            date: friday(week),
            ticker: Ticker::parse(ticker).unwrap(),
            model: kind,
            predicted_value: value,
            generated_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        }
    }

    fn market(weeks: i64) -> RawSeries {
        let rows = (-2..weeks)
            .map(|w| (friday(w), vec![Some(4000.0 + w as f64), Some(15.0)]))
            .collect();
        RawSeries::from_rows(&["SP500".to_string(), "VIX".to_string()], rows)
    }

    /// Ticker whose SARIMA predictions are exact and AutoTS is off by 2.
    fn ticker_input(name: &str, weeks: i64) -> TickerPredictions {
        let actual = |w: i64| 100.0 + 0.5 * w as f64;
        let mut records = Vec::new();
        for w in 0..=weeks {
            records.push(record(name, w, ModelKind::Sarima, actual(w), 9));
            records.push(record(name, w, ModelKind::AutoTs, actual(w) + 2.0, 10));
        }
        TickerPredictions {
            ticker: Ticker::parse(name).unwrap(),
            records,
            actuals: (0..weeks).map(|w| (friday(w), actual(w))).collect(),
        }
    }

    #[test]
    fn picks_most_accurate_model_for_next_friday() {
        let output = combine(&[ticker_input("AAPL", 20)], &market(21), &CombineConfig::default());
        let forecast = &output.predictions["AAPL"];
        assert_eq!(forecast.model, "SARIMA");
        assert_eq!(forecast.next_friday_close, 110.0);
        assert_eq!(output.generated_at, "2024-06-01T10:00:00Z");
    }

    #[test]
    fn no_history_uses_ensemble() {
        let input = TickerPredictions {
            ticker: Ticker::parse("MSFT").unwrap(),
            records: vec![
                record("MSFT", 3, ModelKind::Sarima, 10.0, 9),
                record("MSFT", 3, ModelKind::AutoTs, 11.0, 9),
            ],
            actuals: vec![(friday(2), 9.5)],
        };
        let output = combine(&[input], &market(5), &CombineConfig::default());
        assert_eq!(output.predictions["MSFT"].model, "Ensemble");
        assert_eq!(output.predictions["MSFT"].next_friday_close, 10.5);
    }

    #[test]
    fn stale_market_data_excludes_ticker() {
        // Market data stops 5 weeks before the forecast date
        let combination =
            combine_with_diagnostics(&[ticker_input("AAPL", 20)], &market(15), &CombineConfig::default());
        assert!(combination.output.predictions.is_empty());
        assert_eq!(combination.excluded.len(), 1);
        assert_eq!(combination.excluded[0].0.as_str(), "AAPL");
        assert_eq!(combination.output.generated_at, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn ticker_without_future_record_is_excluded() {
        let mut input = ticker_input("NFLX", 10);
        input.actuals.push((friday(10), 105.0));
        let combination = combine_with_diagnostics(&[input], &market(12), &CombineConfig::default());
        assert!(combination.output.predictions.is_empty());
        assert!(combination.excluded[0].1.contains("no prediction"));
    }

    #[test]
    fn earliest_record_used_when_next_friday_missing() {
        let mut input = ticker_input("TSLA", 5);
        input.records.retain(|r| r.date != friday(5));
        input.records.push(record("TSLA", 7, ModelKind::Sarima, 200.0, 9));
        let combination = combine_with_diagnostics(&[input], &market(8), &CombineConfig::default());
        let last = combination.rows.last().unwrap();
        assert_eq!(last.date, friday(7));
        assert_eq!(combination.output.predictions["TSLA"].next_friday_close, 200.0);
    }

    #[test]
    fn identical_inputs_give_identical_bytes() {
        let inputs = vec![ticker_input("MSFT", 30), ticker_input("AAPL", 30)];
        let mut reversed = inputs.clone();
        reversed.reverse();
        let config = CombineConfig::default();

        let a = combine(&inputs, &market(31), &config).to_json().unwrap();
        let b = combine(&reversed, &market(31), &config).to_json().unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with("}\n"));
        assert!(a.find("AAPL").unwrap() < a.find("MSFT").unwrap());
    }

    #[test]
    fn ridge_is_scored_when_history_is_long_enough() {
        // Both models biased; a linear combination recovers the actual
        let actual = |w: i64| 50.0 + (w as f64 * 0.7).sin() * 3.0;
        let mut records = Vec::new();
        for w in 0..=40 {
            records.push(record("NVDA", w, ModelKind::Sarima, actual(w) * 0.5, 9));
            records.push(record("NVDA", w, ModelKind::AutoTs, actual(w) * 0.5 + 1.0, 9));
        }
        let input = TickerPredictions {
            ticker: Ticker::parse("NVDA").unwrap(),
            records,
            actuals: (0..40).map(|w| (friday(w), actual(w))).collect(),
        };
        let config = CombineConfig {
            ridge_lambda: 1e-6,
            ..CombineConfig::default()
        };
        let output = combine(&[input], &market(41), &config);
        assert_eq!(output.predictions["NVDA"].model, "Ridge");
        assert!((output.predictions["NVDA"].next_friday_close - actual(40)).abs() < 1e-3);
    }

    #[test]
    fn artifacts_are_written_and_old_combined_files_removed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("combined_data_until_20200101.csv"), "old").unwrap();

        let combination =
            combine_with_diagnostics(&[ticker_input("AAPL", 20)], &market(21), &CombineConfig::default());
        let artifacts = write_forecast(tmp.path(), &combination).unwrap();
        let first = fs::read(&artifacts.forecast).unwrap();

        let combined = artifacts.combined.unwrap();
        assert_eq!(
            combined.file_name().unwrap().to_str().unwrap(),
            format!("combined_data_until_{}.csv", friday(19).format("%Y%m%d"))
        );
        assert!(!tmp.path().join("combined_data_until_20200101.csv").exists());
        let csv = fs::read_to_string(&combined).unwrap();
        assert!(csv.starts_with("date,ticker,SARIMA,AutoTS,actual,SP500,VIX\n"));

        write_forecast(tmp.path(), &combination).unwrap();
        assert_eq!(fs::read(&artifacts.forecast).unwrap(), first);
    }

    #[test]
    fn values_are_rounded_to_four_decimals() {
        assert_eq!(round4(1.234_567), 1.2346);
        assert_eq!(round4(-0.000_04), -0.0);
    }
}
