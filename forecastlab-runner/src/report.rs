//! Run reports: per-kind outcomes collected per ticker, and batch summaries.

use std::path::PathBuf;

use tracing::{error, info, warn};

use forecastlab_core::domain::{ModelKind, Ticker};
use forecastlab_core::models::ModelError;
use forecastlab_core::staleness::CacheState;

/// Result of running one model kind for one ticker.
#[derive(Debug)]
pub enum ModelOutcome {
    Succeeded {
        /// The artifact was (re)fitted in this run.
        retrained: bool,
        /// Records produced (walk-forward plus horizon).
        records: usize,
        /// Cache state observed before training.
        cache_state: CacheState,
    },
    /// Not attempted to completion for an expected reason (short history).
    Skipped(ModelError),
    Failed(ModelError),
}

impl ModelOutcome {
    /// Classify an adapter error: short history is a skip, anything else a failure.
    pub fn from_error(err: ModelError) -> Self {
        match err {
            ModelError::InsufficientHistory { .. } => ModelOutcome::Skipped(err),
            other => ModelOutcome::Failed(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ModelOutcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ModelOutcome::Failed(_))
    }
}

/// Overall verdict for one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerStatus {
    /// At least one kind produced records.
    Succeeded,
    /// Every kind was skipped for an expected reason and nothing failed.
    /// The ticker is retried on a later run.
    Skipped,
    Failed,
}

/// Outcomes for one ticker.
#[derive(Debug)]
pub struct TickerReport {
    pub ticker: Ticker,
    /// Outcomes in configured kind order.
    pub outcomes: Vec<(ModelKind, ModelOutcome)>,
    /// Prediction file written, when any kind produced records.
    pub prediction_file: Option<PathBuf>,
    /// Ticker-level error (series load or prediction file write).
    pub error: Option<String>,
}

impl TickerReport {
    pub fn new(ticker: Ticker) -> Self {
        Self {
            ticker,
            outcomes: Vec::new(),
            prediction_file: None,
            error: None,
        }
    }

    /// A ticker failed before any model ran.
    pub fn failed(ticker: Ticker, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(ticker)
        }
    }

    /// At least one kind succeeded and no ticker-level error occurred.
    pub fn succeeded(&self) -> bool {
        self.status() == TickerStatus::Succeeded
    }

    /// Every kind was skipped, none failed, and no ticker-level error occurred.
    pub fn all_skipped(&self) -> bool {
        self.status() == TickerStatus::Skipped
    }

    pub fn status(&self) -> TickerStatus {
        if self.error.is_some() {
            TickerStatus::Failed
        } else if self.outcomes.iter().any(|(_, o)| o.is_success()) {
            TickerStatus::Succeeded
        } else if !self.outcomes.is_empty()
            && self.outcomes.iter().all(|(_, o)| matches!(o, ModelOutcome::Skipped(_)))
        {
            TickerStatus::Skipped
        } else {
            TickerStatus::Failed
        }
    }

    pub fn outcome(&self, kind: ModelKind) -> Option<&ModelOutcome> {
        self.outcomes.iter().find(|(k, _)| *k == kind).map(|(_, o)| o)
    }

    /// One log line per kind plus the ticker verdict.
    pub fn log_summary(&self) {
        for (kind, outcome) in &self.outcomes {
            match outcome {
                ModelOutcome::Succeeded {
                    retrained,
                    records,
                    cache_state,
                } => info!(
                    ticker = %self.ticker,
                    model = %kind,
                    retrained,
                    records,
                    cache = ?cache_state,
                    "model succeeded"
                ),
                ModelOutcome::Skipped(reason) => warn!(
                    ticker = %self.ticker,
                    model = %kind,
                    reason = reason.label(),
                    "model skipped: {reason}"
                ),
                ModelOutcome::Failed(reason) => error!(
                    ticker = %self.ticker,
                    model = %kind,
                    reason = reason.label(),
                    "model failed: {reason}"
                ),
            }
        }
        match (&self.error, self.status()) {
            (Some(err), _) => error!(ticker = %self.ticker, "ticker failed: {err}"),
            (None, TickerStatus::Skipped) => warn!(ticker = %self.ticker, "every model skipped"),
            (None, TickerStatus::Failed) => error!(ticker = %self.ticker, "no model succeeded"),
            (None, TickerStatus::Succeeded) => {}
        }
    }
}

/// Summary across several tickers.
#[derive(Debug, Default)]
pub struct RunReport {
    pub tickers: Vec<TickerReport>,
}

impl RunReport {
    pub fn push(&mut self, report: TickerReport) {
        self.tickers.push(report);
    }

    fn count(&self, status: TickerStatus) -> usize {
        self.tickers.iter().filter(|t| t.status() == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(TickerStatus::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(TickerStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(TickerStatus::Failed)
    }

    pub fn failed_tickers(&self) -> impl Iterator<Item = &TickerReport> {
        self.tickers
            .iter()
            .filter(|t| t.status() == TickerStatus::Failed)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn log_summary(&self) {
        for ticker in &self.tickers {
            ticker.log_summary();
        }
        info!(
            total = self.tickers.len(),
            succeeded = self.succeeded(),
            skipped = self.skipped(),
            failed = self.failed(),
            "training run complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker() -> Ticker {
        Ticker::parse("AAPL").unwrap()
    }

    #[test]
    fn insufficient_history_is_a_skip() {
        let outcome = ModelOutcome::from_error(ModelError::InsufficientHistory {
            kind: ModelKind::Sarima,
            required: 50,
            available: 10,
        });
        assert!(matches!(outcome, ModelOutcome::Skipped(_)));

        let outcome = ModelOutcome::from_error(ModelError::FitDivergence {
            kind: ModelKind::Sarima,
            reason: "nan".into(),
        });
        assert!(outcome.is_failure());
    }

    #[test]
    fn ticker_succeeds_with_one_successful_kind() {
        let mut report = TickerReport::new(ticker());
        report.outcomes.push((
            ModelKind::Sarima,
            ModelOutcome::Failed(ModelError::FitDivergence {
                kind: ModelKind::Sarima,
                reason: "nan".into(),
            }),
        ));
        assert!(!report.succeeded());
        report.outcomes.push((
            ModelKind::AutoTs,
            ModelOutcome::Succeeded {
                retrained: true,
                records: 53,
                cache_state: CacheState::NoCache,
            },
        ));
        assert!(report.succeeded());

        report.error = Some("disk full".into());
        assert!(!report.succeeded());
    }

    fn short_history(kind: ModelKind) -> ModelOutcome {
        ModelOutcome::from_error(ModelError::InsufficientHistory {
            kind,
            required: 20,
            available: 10,
        })
    }

    #[test]
    fn all_skipped_ticker_is_not_a_failure() {
        let mut report = TickerReport::new(ticker());
        report.outcomes.push((ModelKind::AutoTs, short_history(ModelKind::AutoTs)));
        report.outcomes.push((ModelKind::TimeMoe, short_history(ModelKind::TimeMoe)));
        assert_eq!(report.status(), TickerStatus::Skipped);
        assert!(report.all_skipped());
        assert!(!report.succeeded());

        report.outcomes.push((
            ModelKind::Sarima,
            ModelOutcome::Failed(ModelError::FitDivergence {
                kind: ModelKind::Sarima,
                reason: "nan".into(),
            }),
        ));
        assert_eq!(report.status(), TickerStatus::Failed);
    }

    #[test]
    fn ticker_without_outcomes_is_failed() {
        assert_eq!(TickerReport::new(ticker()).status(), TickerStatus::Failed);
    }

    #[test]
    fn run_report_counts() {
        let mut run = RunReport::default();
        run.push(TickerReport::failed(ticker(), "no data"));
        let mut skipped = TickerReport::new(Ticker::parse("ZZZ9").unwrap());
        skipped.outcomes.push((ModelKind::AutoTs, short_history(ModelKind::AutoTs)));
        run.push(skipped);

        assert_eq!(run.failed(), 1);
        assert_eq!(run.skipped(), 1);
        assert_eq!(run.succeeded(), 0);
        assert_eq!(run.failed_tickers().count(), 1);
        assert!(!run.all_succeeded());
    }
}
