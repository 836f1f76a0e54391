//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over remote sources (Yahoo Finance chart
//! API, FRED observations API) so the scrape stage can swap implementations
//! and tests can use in-memory fakes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::series::{Observation, SeriesError};

/// Structured error types for data acquisition and the scraped data store.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("no scraped data for '{ticker}' under {root}")]
    NoScrapedData { ticker: String, root: String },

    #[error("no market data folder under {0}")]
    NoMarketData(String),

    #[error("series error in {path}: {source}")]
    Series {
        path: String,
        #[source]
        source: SeriesError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    YahooFinance,
    Fred,
    Fixture,
}

/// Result of a successful fetch for a single symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub observations: Vec<Observation>,
    pub source: DataSource,
}

/// Trait for remote data sources.
///
/// Implementations make exactly one request per call; there are no internal
/// retries. A provider that has been blocked reports `is_available() == false`
/// for the rest of the run.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch dated observations for a symbol over an inclusive date range.
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<FetchResult, DataError>;

    /// Whether the provider still accepts requests.
    fn is_available(&self) -> bool;
}
