//! Scrape stage: fetches company closes and market indicators into the
//! scraped store.
//!
//! Company series are resampled to Friday-ending weeks and written one folder
//! per ticker. Every fetch ends at the last completed Friday, so an
//! unfinished week is never stored under the Friday still to come. Market data merges index closes and FRED series on a weekly
//! Friday grid and forward-fills the gaps. There are no retries: once a
//! provider reports itself unavailable the remaining symbols fail straight
//! away.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use forecastlab_core::data::{DataError, DataProvider, ScrapedStore};
use forecastlab_core::domain::{last_completed_friday, Ticker};
use forecastlab_core::series::{resample_weekly, week_ending_friday, Observation, RawSeries};

use crate::config::ScrapeConfig;

/// Column holding weekly closes in company series.
pub const CLOSE_COLUMN: &str = "close";

/// Summary of a batch scrape.
#[derive(Debug, Default)]
pub struct ScrapeSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Tickers skipped because their data is recent.
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<(String, DataError)>,
}

impl ScrapeSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, symbol: &str, result: Result<(), DataError>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                warn!(symbol, error = %e, "scrape failed");
                self.errors.push((symbol.to_string(), e));
                self.failed += 1;
            }
        }
    }
}

/// Configured tickers plus those already present in the store, deduplicated.
pub fn scrape_tickers(config: &ScrapeConfig, store: &ScrapedStore) -> Result<Vec<Ticker>, DataError> {
    let mut tickers: BTreeSet<Ticker> = config.tickers.iter().cloned().collect();
    tickers.extend(store.tickers()?);
    Ok(tickers.into_iter().collect())
}

/// Scrape weekly closes for every ticker up to the last Friday completed by
/// `today`.
///
/// A ticker whose latest folder ends within `config.recent_days` of `today`
/// is skipped unless `force` is set.
pub fn scrape_companies(
    provider: &dyn DataProvider,
    store: &ScrapedStore,
    tickers: &[Ticker],
    config: &ScrapeConfig,
    today: NaiveDate,
    force: bool,
) -> ScrapeSummary {
    let mut summary = ScrapeSummary {
        total: tickers.len(),
        ..ScrapeSummary::default()
    };
    let end = last_completed_friday(today);

    for (i, ticker) in tickers.iter().enumerate() {
        if !force {
            match store.latest_folder(ticker) {
                Ok(Some(folder)) if (today - folder.end).num_days() <= config.recent_days => {
                    debug!(%ticker, end = %folder.end, "scraped data is recent, skipping");
                    summary.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => warn!(%ticker, error = %e, "cannot inspect scraped store"),
            }
        }

        let result = scrape_single(provider, store, ticker, config.start_date, end);
        summary.record(ticker.as_str(), result);

        if !provider.is_available() {
            for rest in &tickers[i + 1..] {
                summary.record(
                    rest.as_str(),
                    Err(DataError::DataSourceUnavailable(format!(
                        "{} is unavailable for this run",
                        provider.name()
                    ))),
                );
            }
            break;
        }
    }

    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        "company scrape complete"
    );
    summary
}

fn scrape_single(
    provider: &dyn DataProvider,
    store: &ScrapedStore,
    ticker: &Ticker,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), DataError> {
    let fetched = provider.fetch(ticker.as_str(), start, end)?;
    let weekly: Vec<Observation> = resample_weekly(&fetched.observations)
        .into_iter()
        .filter(|o| o.date <= end)
        .collect();
    if weekly.is_empty() {
        return Err(DataError::SymbolNotFound {
            symbol: ticker.to_string(),
        });
    }
    let rows = weekly.iter().map(|o| (o.date, vec![Some(o.value)])).collect();
    let series = RawSeries::from_rows(&[CLOSE_COLUMN.to_string()], rows);
    store.write_series(ticker, &series)?;
    Ok(())
}

/// Scrape market indexes and FRED series into one forward-filled weekly table.
///
/// Any failed symbol fails the whole market scrape; a partial table would
/// silently drop combiner features.
pub fn scrape_market(
    index_provider: &dyn DataProvider,
    macro_provider: Option<&dyn DataProvider>,
    store: &ScrapedStore,
    config: &ScrapeConfig,
    today: NaiveDate,
) -> Result<RawSeries, DataError> {
    let end = last_completed_friday(today);
    let mut columns: BTreeMap<String, Vec<Observation>> = BTreeMap::new();

    for (name, symbol) in &config.indexes {
        let fetched = index_provider.fetch(symbol, config.start_date, end)?;
        debug!(column = %name, symbol = %symbol, rows = fetched.observations.len(), "index fetched");
        columns.insert(name.clone(), fetched.observations);
    }

    if !config.fred_series.is_empty() {
        let provider = macro_provider.ok_or_else(|| {
            DataError::AuthenticationRequired("FRED_API_KEY is not set".to_string())
        })?;
        for (name, series_id) in &config.fred_series {
            let fetched = provider.fetch(series_id, config.start_date, end)?;
            debug!(column = %name, series = %series_id, rows = fetched.observations.len(), "FRED series fetched");
            columns.insert(name.clone(), fetched.observations);
        }
    }

    let series = weekly_grid(&columns, config.start_date, end);
    if series.is_empty() {
        return Err(DataError::SymbolNotFound {
            symbol: "market_data".to_string(),
        });
    }
    store.write_market(&series)?;
    Ok(series)
}

/// Merge observation lists onto every Friday from `start` to `end`, then
/// forward-fill.
fn weekly_grid(
    columns: &BTreeMap<String, Vec<Observation>>,
    start: NaiveDate,
    end: NaiveDate,
) -> RawSeries {
    let names: Vec<String> = columns.keys().cloned().collect();
    let weekly: Vec<BTreeMap<NaiveDate, f64>> = columns
        .values()
        .map(|obs| resample_weekly(obs).into_iter().map(|o| (o.date, o.value)).collect())
        .collect();

    let mut rows = Vec::new();
    let mut friday = week_ending_friday(start);
    while friday <= end {
        rows.push((friday, weekly.iter().map(|col| col.get(&friday).copied()).collect()));
        friday += Duration::days(7);
    }

    let mut series = RawSeries::from_rows(&names, rows);
    series.forward_fill();

    // Drop leading rows where nothing has been observed yet
    let first_observed = (0..series.len())
        .find(|&i| series.columns.values().any(|col| col[i].is_some()))
        .unwrap_or(series.len());
    if first_observed > 0 {
        series.dates.drain(..first_observed);
        for col in series.columns.values_mut() {
            col.drain(..first_observed);
        }
    }
    series
}
