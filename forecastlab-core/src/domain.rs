//! Domain types shared by every stage of the pipeline.
//!
//! - `Ticker`: validated stock symbol
//! - `ModelKind`: the three supported forecasting approaches
//! - `PredictionRecord`: one row of a prediction file

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Date format used in directory and file names (`20240105`).
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Timestamp format used in legacy prediction file names (`20240105_153000`).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ticker '{0}'")]
pub struct InvalidTicker(pub String);

/// A stock symbol identifying one company's time series.
///
/// Uppercase ASCII, starting with a letter; digits, `.` and `-` are allowed
/// after the first character (`AAPL`, `BRK.B`, `ZZZ9`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub const MAX_LEN: usize = 12;

    pub fn parse(raw: &str) -> Result<Self, InvalidTicker> {
        let mut chars = raw.chars();
        let first_ok = chars.next().is_some_and(|c| c.is_ascii_uppercase());
        let rest_ok = chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');
        if !first_ok || !rest_ok || raw.len() > Self::MAX_LEN {
            return Err(InvalidTicker(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Ticker {
    type Err = InvalidTicker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Ticker {
    type Error = InvalidTicker;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(t: Ticker) -> Self {
        t.0
    }
}

/// Forecasting approach. Wire names match the prediction-file `model` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    /// Seasonal statistical model.
    #[serde(rename = "SARIMA", alias = "sarima")]
    Sarima,
    /// Automated ensemble search.
    #[serde(rename = "AutoTS", alias = "autots")]
    AutoTs,
    /// Pretrained transformer.
    #[serde(rename = "TimeMOE", alias = "timemoe")]
    TimeMoe,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Sarima, ModelKind::AutoTs, ModelKind::TimeMoe];

    /// Name written to prediction files and forecast provenance.
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Sarima => "SARIMA",
            ModelKind::AutoTs => "AutoTS",
            ModelKind::TimeMoe => "TimeMOE",
        }
    }

    /// Subdirectory of the cache root holding this kind's artifacts.
    pub fn cache_subdir(self) -> &'static str {
        match self {
            ModelKind::Sarima => "sarima",
            ModelKind::AutoTs => "autots",
            ModelKind::TimeMoe => "timemoe",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown model kind '{0}' (expected SARIMA, AutoTS or TimeMOE)")]
pub struct UnknownModelKind(pub String);

impl FromStr for ModelKind {
    type Err = UnknownModelKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownModelKind(s.to_string()))
    }
}

/// One row of a prediction file.
///
/// Column order matches the CSV header `date,ticker,model,predicted_value,generated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub date: NaiveDate,
    pub ticker: Ticker,
    pub model: ModelKind,
    pub predicted_value: f64,
    pub generated_at: DateTime<Utc>,
}

/// The next Friday strictly after `from`.
pub fn next_friday(from: NaiveDate) -> NaiveDate {
    let weekday = from.weekday().num_days_from_monday() as i64;
    let mut days_ahead = 4 - weekday;
    if days_ahead <= 0 {
        days_ahead += 7;
    }
    from + Duration::days(days_ahead)
}

/// The latest Friday whose trading week has closed as of `today`.
///
/// On a weekend that is the Friday just gone. On a weekday, Friday included,
/// the current week is still open, so it is the Friday of the week before.
pub fn last_completed_friday(today: NaiveDate) -> NaiveDate {
    let weekday = today.weekday().num_days_from_monday() as i64;
    let days_back = if weekday >= 5 { weekday - 4 } else { weekday + 3 };
    today - Duration::days(days_back)
}
