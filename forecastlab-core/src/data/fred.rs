//! FRED (Federal Reserve Economic Data) observations provider.
//!
//! Symbols are FRED series ids (`CPIAUCSL`, `UNRATE`, `FEDFUNDS`, ...).
//! Missing observations are reported by FRED as `"."` and are dropped.

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use crate::series::Observation;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

/// Environment variable holding the FRED API key.
pub const FRED_API_KEY_VAR: &str = "FRED_API_KEY";

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

/// FRED observations API client.
pub struct FredProvider {
    client: reqwest::blocking::Client,
    api_key: String,
}

impl FredProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::DataSourceUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    /// Build a provider from `FRED_API_KEY`.
    pub fn from_env() -> Result<Self, DataError> {
        let key = std::env::var(FRED_API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                DataError::AuthenticationRequired(format!("{FRED_API_KEY_VAR} is not set"))
            })?;
        Self::new(key)
    }

    fn parse_observations(body: ObservationsResponse) -> Vec<Observation> {
        body.observations
            .into_iter()
            .filter_map(|raw| {
                let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d").ok()?;
                let value = raw.value.parse::<f64>().ok().filter(|v| v.is_finite())?;
                Some(Observation { date, value })
            })
            .collect()
    }
}

impl DataProvider for FredProvider {
    fn name(&self) -> &str {
        "fred"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let start_param = start.format("%Y-%m-%d").to_string();
        let end_param = end.format("%Y-%m-%d").to_string();
        let resp = self
            .client
            .get("https://api.stlouisfed.org/fred/series/observations")
            .query(&[
                ("series_id", symbol),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("observation_start", start_param.as_str()),
                ("observation_end", end_param.as_str()),
            ])
            .send()
            .map_err(|e| DataError::DataSourceUnavailable(format!("{symbol}: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(DataError::DataSourceUnavailable(format!(
                "FRED answered HTTP {status} for {symbol}"
            )));
        }

        let body: ObservationsResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse FRED response for {symbol}: {e}"))
        })?;

        let observations = Self::parse_observations(body);
        if observations.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(FetchResult {
            symbol: symbol.to_string(),
            observations,
            source: DataSource::Fred,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
