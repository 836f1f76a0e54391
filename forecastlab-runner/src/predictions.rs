//! Per-ticker prediction files with idempotent upsert.
//!
//! Layout: `{pred_dir}/model_predictions_{TICKER}.csv` with columns
//! `date,ticker,model,predicted_value,generated_at`.
//!
//! Features:
//! - Lenient reads: rows that fail to parse are skipped with a warning, so a
//!   partially written file is reconciled by the next upsert
//! - Upsert keyed by (date, model); an unchanged value keeps the stored row
//! - Rows sorted by (date, model); atomic write (.tmp then rename)
//! - Ticker inference from current and legacy file names

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use forecastlab_core::domain::{ModelKind, PredictionRecord, Ticker, DATE_FORMAT, TIMESTAMP_FORMAT};

pub const PREDICTION_FILE_PREFIX: &str = "model_predictions_";

#[derive(Debug, Error)]
pub enum PredictionFileError {
    #[error("prediction file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prediction file CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// `model_predictions_{TICKER}.csv`
pub fn prediction_filename(ticker: &Ticker) -> String {
    format!("{PREDICTION_FILE_PREFIX}{ticker}.csv")
}

/// Infer the ticker from a prediction file name.
///
/// Accepts `model_predictions_{TICKER}.csv` and the legacy
/// `model_predictions_{YYYYMMDD}_{HHMMSS}_{TICKER}_{YYYYMMDD}_{YYYYMMDD}.csv`.
/// Anything else is ambiguous and yields `None`.
pub fn infer_ticker(path: &Path) -> Option<Ticker> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(PREDICTION_FILE_PREFIX)?.strip_suffix(".csv")?;
    let parts: Vec<&str> = stem.split('_').collect();
    match parts.as_slice() {
        [ticker] => Ticker::parse(ticker).ok(),
        [day, time, ticker, start, end] => {
            NaiveDateTime::parse_from_str(&format!("{day}_{time}"), TIMESTAMP_FORMAT).ok()?;
            NaiveDate::parse_from_str(start, DATE_FORMAT).ok()?;
            NaiveDate::parse_from_str(end, DATE_FORMAT).ok()?;
            Ticker::parse(ticker).ok()
        }
        _ => None,
    }
}

/// All `model_predictions_*.csv` files in `dir`, sorted by name.
pub fn list_prediction_files(dir: &Path) -> Result<Vec<PathBuf>, PredictionFileError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PredictionFileError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(PREDICTION_FILE_PREFIX) && n.ends_with(".csv"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Parse prediction rows, returning the records and the number of rows skipped.
pub fn read_records<R: Read>(reader: R) -> (Vec<PredictionRecord>, usize) {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();
    let mut skipped = 0;
    for (line, row) in rdr.deserialize::<PredictionRecord>().enumerate() {
        match row {
            Ok(record) if record.predicted_value.is_finite() => records.push(record),
            Ok(_) => {
                skipped += 1;
                warn!(row = line + 1, "skipping prediction row with non-finite value");
            }
            Err(e) => {
                skipped += 1;
                warn!(row = line + 1, error = %e, "skipping unparseable prediction row");
            }
        }
    }
    (records, skipped)
}

pub fn write_records<W: Write>(writer: W, records: &[PredictionRecord]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Counts from one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

impl UpsertSummary {
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }
}

/// In-memory view of one prediction file.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionFile {
    path: PathBuf,
    rows: BTreeMap<(NaiveDate, ModelKind), PredictionRecord>,
}

impl PredictionFile {
    /// Open `path`; a missing file is an empty prediction set.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PredictionFileError> {
        let path = path.into();
        let mut rows = BTreeMap::new();
        match fs::File::open(&path) {
            Ok(file) => {
                let (records, skipped) = read_records(file);
                if skipped > 0 {
                    warn!(path = %path.display(), skipped, "prediction file had unreadable rows");
                }
                for record in records {
                    rows.insert((record.date, record.model), record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(PredictionFileError::Io { path, source }),
        }
        Ok(Self { path, rows })
    }

    /// Open the prediction file for `ticker` inside `dir`.
    pub fn for_ticker(dir: &Path, ticker: &Ticker) -> Result<Self, PredictionFileError> {
        Self::open(dir.join(prediction_filename(ticker)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in (date, model) order.
    pub fn records(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.rows.values()
    }

    /// Latest `generated_at` across all rows.
    pub fn last_generated(&self) -> Option<DateTime<Utc>> {
        self.rows.values().map(|r| r.generated_at).max()
    }

    /// Latest forecast date recorded for `kind`.
    pub fn latest_date(&self, kind: ModelKind) -> Option<NaiveDate> {
        self.rows.keys().filter(|(_, k)| *k == kind).map(|(d, _)| *d).max()
    }

    /// Insert or overwrite records by (date, model).
    pub fn upsert(&mut self, incoming: impl IntoIterator<Item = PredictionRecord>) -> UpsertSummary {
        let mut summary = UpsertSummary::default();
        for record in incoming {
            let key = (record.date, record.model);
            match self.rows.get(&key) {
                Some(existing) if existing.predicted_value == record.predicted_value => {
                    summary.unchanged += 1;
                }
                Some(_) => {
                    summary.replaced += 1;
                    self.rows.insert(key, record);
                }
                None => {
                    summary.inserted += 1;
                    self.rows.insert(key, record);
                }
            }
        }
        summary
    }

    /// Write all rows atomically.
    pub fn save(&self) -> Result<(), PredictionFileError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PredictionFileError::Io { path, source }
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let tmp_path = self.path.with_extension("csv.tmp");
        let file = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        let records: Vec<PredictionRecord> = self.rows.values().cloned().collect();
        if let Err(e) = write_records(file, &records) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        fs::rename(&tmp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            PredictionFileError::Io {
                path: self.path.clone(),
                source,
            }
        })?;
        debug!(path = %self.path.display(), rows = records.len(), "saved prediction file");
        Ok(())
    }
}
