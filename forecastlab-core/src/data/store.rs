//! Scraped data store.
//!
//! Layout under the scraped folder:
//! - `{TICKER}_{YYYYMMDD}_{YYYYMMDD}/{TICKER}_data.csv`: one company series
//! - `market_data_{YYYYMMDD}_{YYYYMMDD}/market_data.csv`: market-wide features
//!
//! Folder names carry the covered date range. The latest folder (by end
//! date) wins when several exist for the same ticker. Writes go to a `.tmp`
//! file first and are renamed into place.

use super::provider::DataError;
use crate::domain::{Ticker, DATE_FORMAT};
use crate::series::RawSeries;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Folder-name prefix of market data folders.
pub const MARKET_DATA_PREFIX: &str = "market_data";

/// File name of the market data CSV inside its folder.
pub const MARKET_DATA_FILENAME: &str = "market_data.csv";

/// One dated folder in the scraped store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedFolder {
    /// Ticker, or `market_data` for the market folder.
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub path: PathBuf,
}

impl ScrapedFolder {
    /// Parse `{NAME}_{YYYYMMDD}_{YYYYMMDD}`.
    pub fn parse(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let mut parts = file_name.rsplitn(3, '_');
        let end = NaiveDate::parse_from_str(parts.next()?, DATE_FORMAT).ok()?;
        let start = NaiveDate::parse_from_str(parts.next()?, DATE_FORMAT).ok()?;
        let name = parts.next()?.to_string();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name,
            start,
            end,
            path: path.to_path_buf(),
        })
    }
}

/// Read/write access to the scraped folder.
#[derive(Debug, Clone)]
pub struct ScrapedStore {
    root: PathBuf,
}

impl ScrapedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All well-formed dated folders, sorted by name then end date.
    pub fn folders(&self) -> Result<Vec<ScrapedFolder>, DataError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut folders = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match ScrapedFolder::parse(&path) {
                Some(folder) => folders.push(folder),
                None => debug!(path = %path.display(), "ignoring folder without a date range"),
            }
        }
        folders.sort_by(|a, b| a.name.cmp(&b.name).then(a.end.cmp(&b.end)));
        Ok(folders)
    }

    /// Tickers with at least one scraped folder.
    pub fn tickers(&self) -> Result<Vec<Ticker>, DataError> {
        let mut tickers = BTreeSet::new();
        for folder in self.folders()? {
            if folder.name == MARKET_DATA_PREFIX {
                continue;
            }
            if let Ok(ticker) = Ticker::parse(&folder.name) {
                tickers.insert(ticker);
            }
        }
        Ok(tickers.into_iter().collect())
    }

    /// The most recent folder for `ticker`.
    pub fn latest_folder(&self, ticker: &Ticker) -> Result<Option<ScrapedFolder>, DataError> {
        self.latest_named(ticker.as_str())
    }

    /// The most recent market data folder.
    pub fn latest_market_folder(&self) -> Result<Option<ScrapedFolder>, DataError> {
        self.latest_named(MARKET_DATA_PREFIX)
    }

    fn latest_named(&self, name: &str) -> Result<Option<ScrapedFolder>, DataError> {
        Ok(self
            .folders()?
            .into_iter()
            .filter(|f| f.name == name)
            .max_by_key(|f| (f.end, f.start)))
    }

    /// Load the latest scraped series for `ticker`.
    pub fn load_series(&self, ticker: &Ticker) -> Result<RawSeries, DataError> {
        let folder = self
            .latest_folder(ticker)?
            .ok_or_else(|| DataError::NoScrapedData {
                ticker: ticker.to_string(),
                root: self.root.display().to_string(),
            })?;
        let path = folder.path.join(series_filename(ticker));
        read_series(&path)
    }

    /// Load the latest market data.
    pub fn load_market(&self) -> Result<RawSeries, DataError> {
        let folder = self
            .latest_market_folder()?
            .ok_or_else(|| DataError::NoMarketData(self.root.display().to_string()))?;
        read_series(&folder.path.join(MARKET_DATA_FILENAME))
    }

    /// Write a company series into a new dated folder and remove older
    /// folders for the same ticker.
    pub fn write_series(&self, ticker: &Ticker, series: &RawSeries) -> Result<PathBuf, DataError> {
        let path = self.write_dated(ticker.as_str(), &series_filename(ticker), series)?;
        info!(%ticker, path = %path.display(), rows = series.len(), "saved scraped series");
        Ok(path)
    }

    /// Write market data into a new dated folder and remove older market folders.
    pub fn write_market(&self, series: &RawSeries) -> Result<PathBuf, DataError> {
        let path = self.write_dated(MARKET_DATA_PREFIX, MARKET_DATA_FILENAME, series)?;
        info!(path = %path.display(), rows = series.len(), "saved market data");
        Ok(path)
    }

    fn write_dated(&self, name: &str, file_name: &str, series: &RawSeries) -> Result<PathBuf, DataError> {
        let (Some(start), Some(end)) = (series.first_date(), series.last_date()) else {
            return Err(DataError::SymbolNotFound {
                symbol: name.to_string(),
            });
        };

        let dir = self.root.join(format!(
            "{name}_{}_{}",
            start.format(DATE_FORMAT),
            end.format(DATE_FORMAT)
        ));
        fs::create_dir_all(&dir)?;

        let path = dir.join(file_name);
        let tmp_path = path.with_extension("csv.tmp");
        let file = fs::File::create(&tmp_path)?;
        series.write_csv(file).map_err(|source| DataError::Series {
            path: tmp_path.display().to_string(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            e
        })?;

        for old in self.folders()?.into_iter().filter(|f| f.name == name && f.path != dir) {
            if let Err(e) = fs::remove_dir_all(&old.path) {
                warn!(path = %old.path.display(), error = %e, "failed to remove superseded folder");
            } else {
                debug!(path = %old.path.display(), "removed superseded folder");
            }
        }

        Ok(path)
    }
}

/// `{TICKER}_data.csv`
pub fn series_filename(ticker: &Ticker) -> String {
    format!("{ticker}_data.csv")
}

fn read_series(path: &Path) -> Result<RawSeries, DataError> {
    let file = fs::File::open(path)?;
    RawSeries::read_csv(file).map_err(|source| DataError::Series {
        path: path.display().to_string(),
        source,
    })
}
