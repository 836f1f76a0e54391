//! Yahoo Finance data provider.
//!
//! Fetches daily closes from Yahoo's v8 chart API, preferring the adjusted
//! close when the response carries one. One request per symbol, no retries:
//! a 403 or 429 marks the provider blocked for the rest of the run so the
//! scrape stage can fail the remaining symbols fast.

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use crate::series::Observation;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    blocked: AtomicBool,
}

impl YahooProvider {
    pub fn new() -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::DataSourceUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            blocked: AtomicBool::new(false),
        })
    }

    fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = (end + chrono::Duration::days(1))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp();
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true"
        )
    }

    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<Vec<Observation>, DataError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => DataError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        let timestamps = data
            .timestamp
            .ok_or_else(|| DataError::ResponseFormatChanged("no timestamps".into()))?;

        let closes = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?
            .close;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let mut observations = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let adjusted = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten());
            let close = closes.get(i).copied().flatten();

            // Holidays come back as all-null rows
            if let Some(value) = adjusted.or(close) {
                observations.push(Observation { date, value });
            }
        }

        if observations.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(observations)
    }
}

impl DataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        if !self.is_available() {
            return Err(DataError::DataSourceUnavailable(
                "Yahoo Finance has blocked requests for this run".into(),
            ));
        }

        let url = Self::chart_url(symbol, start, end);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| DataError::DataSourceUnavailable(format!("{symbol}: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            self.blocked.store(true, Ordering::SeqCst);
            return Err(DataError::DataSourceUnavailable(format!(
                "Yahoo Finance answered HTTP {status} for {symbol}"
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "Yahoo Finance requires authentication".into(),
            ));
        }
        if !status.is_success() {
            return Err(DataError::DataSourceUnavailable(format!(
                "HTTP {status} for {symbol}"
            )));
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;

        let mut observations = Self::parse_response(symbol, chart)?;
        observations.retain(|o| o.date >= start && o.date <= end);

        Ok(FetchResult {
            symbol: symbol.to_string(),
            observations,
            source: DataSource::YahooFinance,
        })
    }

    fn is_available(&self) -> bool {
        !self.blocked.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Vec<Observation>, DataError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        YahooProvider::parse_response("AAPL", resp)
    }

    #[test]
    fn parse_prefers_adjusted_close_and_skips_null_rows() {
        let json = r#"{"chart":{"result":[{"timestamp":[1704447000,1704706200,1704792600],
            "indicators":{"quote":[{"close":[181.0,null,185.0]}],
            "adjclose":[{"adjclose":[180.5,null,184.4]}]}}],"error":null}}"#;
        let obs = parse(json).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].value, 180.5);
        assert_eq!(obs[0].date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(obs[1].value, 184.4);
    }

    #[test]
    fn parse_falls_back_to_close() {
        let json = r#"{"chart":{"result":[{"timestamp":[1704447000],
            "indicators":{"quote":[{"close":[181.0]}]}}],"error":null}}"#;
        assert_eq!(parse(json).unwrap()[0].value, 181.0);
    }

    #[test]
    fn parse_maps_not_found() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        assert!(matches!(parse(json), Err(DataError::SymbolNotFound { .. })));
    }

    #[test]
    fn chart_url_covers_end_date() {
        let url = YahooProvider::chart_url(
            "AAPL",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        );
        assert!(url.contains("period1=1704067200"));
        assert!(url.contains("period2=1704240000"));
    }
}
