//! ForecastLab Core: domain types, data store, artifact cache and model adapters.
//!
//! This crate contains everything below the orchestration layer:
//! - Domain types (tickers, model kinds, prediction records)
//! - Raw and gap-filled target series with CSV I/O
//! - Scraped-data store and market data providers (Yahoo, FRED)
//! - Artifact cache with atomic writes and corrupt-file quarantine
//! - Pure staleness policy
//! - SARIMA, AutoTS and TimeMOE adapters behind one `ModelAdapter` trait

pub mod cache;
pub mod data;
pub mod domain;
pub mod linalg;
pub mod models;
pub mod series;
pub mod staleness;

pub use cache::ArtifactStore;
pub use domain::{ModelKind, PredictionRecord, Ticker};
pub use models::{ModelAdapter, ModelArtifact, ModelError};
pub use series::{RawSeries, TargetSeries};
