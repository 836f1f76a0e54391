//! TOML run configuration (`forecastlab.toml`).
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. Sections:
//! - `[paths]`: scraped data, artifact cache, prediction and forecast dirs
//! - `[models]`: enabled kinds, horizon, backtest window, per-kind settings
//! - `[forecast]`: combiner feature lag, gap tolerance and ridge settings
//! - `[scrape]`: ticker list, start date, market symbols

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use forecastlab_core::domain::{ModelKind, Ticker};
use forecastlab_core::models::{AutoTsConfig, SarimaConfig, TimeMoeConfig};

/// Config file looked up when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "forecastlab.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub paths: PathsConfig,
    pub models: ModelsConfig,
    pub forecast: CombineConfig,
    pub scrape: ScrapeConfig,
}

impl ForecastConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load `path`, or defaults with a warning when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.models.enabled.is_empty() {
            return Err(ConfigError::Invalid("models.enabled is empty".into()));
        }
        if self.forecast.cv_folds < 2 {
            return Err(ConfigError::Invalid("forecast.cv_folds must be at least 2".into()));
        }
        if self.forecast.ridge_lambda < 0.0 || !self.forecast.ridge_lambda.is_finite() {
            return Err(ConfigError::Invalid(
                "forecast.ridge_lambda must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

/// Directory layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub scraped: PathBuf,
    pub cache: PathBuf,
    pub predictions: PathBuf,
    pub forecasts: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scraped: PathBuf::from("data/scraped"),
            cache: PathBuf::from("data/cache"),
            predictions: PathBuf::from("data/predictions"),
            forecasts: PathBuf::from("data/forecasts"),
        }
    }
}

/// Model selection and training options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model kinds to run, in report order. Names are case-insensitive.
    #[serde(deserialize_with = "deserialize_kinds")]
    pub enabled: Vec<ModelKind>,
    /// Future grid dates predicted per run.
    pub horizon: usize,
    /// Historical dates covered by walk-forward predictions on first run.
    pub backtest_window: usize,
    /// RawSeries column to model.
    pub target_column: String,
    /// Run model kinds on rayon worker threads.
    pub parallel: bool,
    pub sarima: SarimaConfig,
    pub autots: AutoTsConfig,
    pub timemoe: TimeMoeConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            enabled: ModelKind::ALL.to_vec(),
            horizon: 1,
            backtest_window: 52,
            target_column: "close".to_string(),
            parallel: false,
            sarima: SarimaConfig::default(),
            autots: AutoTsConfig::default(),
            timemoe: TimeMoeConfig::default(),
        }
    }
}

fn deserialize_kinds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ModelKind>, D::Error> {
    let raw = Vec::<String>::deserialize(deserializer)?;
    let mut kinds = Vec::with_capacity(raw.len());
    for name in raw {
        let kind: ModelKind = name.parse().map_err(serde::de::Error::custom)?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Forecast combiner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    /// Market features for a row dated `t` come from `t - feature_lag_days`.
    pub feature_lag_days: i64,
    /// Maximum distance between the lookup date and the market row used.
    pub max_gap_days: i64,
    pub cv_folds: usize,
    pub ridge_lambda: f64,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            feature_lag_days: 7,
            max_gap_days: 7,
            cv_folds: 5,
            ridge_lambda: 1.0,
        }
    }
}

/// Scrape stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub tickers: Vec<Ticker>,
    pub start_date: NaiveDate,
    /// Tickers whose latest folder ends within this many days are skipped.
    pub recent_days: i64,
    /// Market index column name → Yahoo symbol.
    pub indexes: BTreeMap<String, String>,
    /// Macro column name → FRED series id.
    pub fred_series: BTreeMap<String, String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        let tickers = [
            "AAPL", "NFLX", "ADBE", "AMZN", "GOOGL", "MSFT", "TSLA", "META", "NVDA", "PYPL",
        ]
        .iter()
        .filter_map(|t| Ticker::parse(t).ok())
        .collect();
        let pairs = |items: &[(&str, &str)]| -> BTreeMap<String, String> {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        Self {
            tickers,
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            recent_days: 7,
            indexes: pairs(&[("SP500", "^GSPC"), ("NASDAQ", "^IXIC"), ("VIX", "^VIX")]),
            fred_series: pairs(&[
                ("CPI", "CPIAUCSL"),
                ("UnemploymentRate", "UNRATE"),
                ("FEDFUNDS", "FEDFUNDS"),
                ("DFF", "DFF"),
                ("GDP", "GDP"),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let config = ForecastConfig::from_toml(include_str!("../../forecastlab.toml")).unwrap();
        assert_eq!(config, ForecastConfig::default());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ForecastConfig::from_toml("").unwrap();
        assert_eq!(config, ForecastConfig::default());
        assert_eq!(config.models.enabled, ModelKind::ALL.to_vec());
        assert_eq!(config.models.sarima.min_history, 50);
        assert_eq!(config.models.sarima.staleness_days, 91);
        assert_eq!(config.models.autots.staleness_days, 28);
        assert_eq!(config.models.timemoe.staleness_days, 0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ForecastConfig::from_toml(
            r#"
[paths]
cache = "/tmp/cache"

[models]
enabled = ["sarima", "AUTOTS"]
horizon = 2

[models.sarima]
min_history = 80

[scrape]
tickers = ["AAPL", "BRK.B"]
start_date = "2018-01-01"
"#,
        )
        .unwrap();
        assert_eq!(config.paths.cache, PathBuf::from("/tmp/cache"));
        assert_eq!(config.paths.scraped, PathBuf::from("data/scraped"));
        assert_eq!(config.models.enabled, vec![ModelKind::Sarima, ModelKind::AutoTs]);
        assert_eq!(config.models.horizon, 2);
        assert_eq!(config.models.backtest_window, 52);
        assert_eq!(config.models.sarima.min_history, 80);
        assert_eq!(config.models.sarima.max_p, 3);
        assert_eq!(config.scrape.tickers.len(), 2);
        assert_eq!(config.scrape.start_date, NaiveDate::from_ymd_opt(2018, 1, 1).unwrap());
        assert_eq!(config.scrape.indexes.len(), 3);
    }

    #[test]
    fn unknown_model_kind_is_rejected() {
        let err = ForecastConfig::from_toml("[models]\nenabled = [\"prophet\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_enabled_list_is_invalid() {
        let err = ForecastConfig::from_toml("[models]\nenabled = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn toml_roundtrip() {
        let config = ForecastConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(ForecastConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ForecastConfig::load_or_default(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config, ForecastConfig::default());
    }
}
