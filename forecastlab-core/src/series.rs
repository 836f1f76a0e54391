//! Date-indexed series: the scraped `RawSeries` and the gap-filled
//! `TargetSeries` that model adapters consume.
//!
//! Features:
//! - CSV load/save with a case-insensitive `date` column
//! - Frequency inference (daily, business-daily, weekly)
//! - Forward-fill onto a contiguous date grid
//! - Weekly (Friday-ending) resampling of daily observations

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use thiserror::Error;

use crate::domain::Ticker;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("missing '{0}' column")]
    MissingColumn(String),

    #[error("row {row}: invalid date '{value}'")]
    InvalidDate { row: usize, value: String },

    #[error("series has no observations in column '{0}'")]
    Empty(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Sampling frequency of a gap-filled series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Every calendar day.
    Daily,
    /// Monday to Friday.
    BusinessDaily,
    /// Every seven days.
    Weekly,
}

impl Frequency {
    /// Infer the frequency from observed dates (sorted ascending).
    pub fn infer(dates: &[NaiveDate]) -> Self {
        let mut gaps: Vec<i64> = dates
            .windows(2)
            .map(|w| (w[1] - w[0]).num_days())
            .filter(|&d| d > 0)
            .collect();
        if gaps.is_empty() {
            return Frequency::BusinessDaily;
        }
        gaps.sort_unstable();
        if gaps[gaps.len() / 2] >= 5 {
            return Frequency::Weekly;
        }
        let has_weekend = dates
            .iter()
            .any(|d| matches!(d.weekday(), Weekday::Sat | Weekday::Sun));
        if has_weekend {
            Frequency::Daily
        } else {
            Frequency::BusinessDaily
        }
    }

    /// The grid date following `date`.
    pub fn step(self, date: NaiveDate) -> NaiveDate {
        match self {
            Frequency::Daily => date + Duration::days(1),
            Frequency::Weekly => date + Duration::days(7),
            Frequency::BusinessDaily => {
                let mut next = date + Duration::days(1);
                while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
                    next += Duration::days(1);
                }
                next
            }
        }
    }
}

/// A scraped, date-indexed table of numeric columns.
///
/// Missing cells are `None`. Dates are strictly ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeries {
    pub dates: Vec<NaiveDate>,
    pub columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl RawSeries {
    /// Build a series from rows, sorting by date. Later duplicates win.
    pub fn from_rows(column_names: &[String], rows: Vec<(NaiveDate, Vec<Option<f64>>)>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
        for (date, values) in rows {
            by_date.insert(date, values);
        }

        let mut columns: BTreeMap<String, Vec<Option<f64>>> = column_names
            .iter()
            .map(|name| (name.clone(), Vec::with_capacity(by_date.len())))
            .collect();
        let mut dates = Vec::with_capacity(by_date.len());
        for (date, values) in by_date {
            dates.push(date);
            for (i, name) in column_names.iter().enumerate() {
                if let Some(col) = columns.get_mut(name) {
                    col.push(values.get(i).copied().flatten());
                }
            }
        }
        Self { dates, columns }
    }

    /// Parse CSV with a `date` header (any case) and numeric columns.
    ///
    /// Cells that are empty or not finite numbers become `None`. Dates may
    /// carry a time suffix (`2024-01-05 00:00:00`), which is ignored.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, SeriesError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let date_idx = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("date"))
            .ok_or_else(|| SeriesError::MissingColumn("date".into()))?;
        let column_names: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != date_idx)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let raw_date = record.get(date_idx).unwrap_or_default();
            let date = parse_date(raw_date).ok_or_else(|| SeriesError::InvalidDate {
                row: row + 1,
                value: raw_date.to_string(),
            })?;
            let values = record
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != date_idx)
                .map(|(_, cell)| cell.parse::<f64>().ok().filter(|v| v.is_finite()))
                .collect();
            rows.push((date, values));
        }

        Ok(Self::from_rows(&column_names, rows))
    }

    /// Write the series as CSV with a leading `date` column.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), SeriesError> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["date".to_string()];
        header.extend(self.columns.keys().cloned());
        wtr.write_record(&header)?;

        for (i, date) in self.dates.iter().enumerate() {
            let mut row = vec![date.format("%Y-%m-%d").to_string()];
            for values in self.columns.values() {
                row.push(values[i].map(|v| v.to_string()).unwrap_or_default());
            }
            wtr.write_record(&row)?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    /// Latest scraped date.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Find a column by name, ignoring ASCII case.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Carry the last observed value forward into missing cells, per column.
    pub fn forward_fill(&mut self) {
        for values in self.columns.values_mut() {
            let mut last = None;
            for v in values.iter_mut() {
                if let Some(x) = *v {
                    last = Some(x);
                } else {
                    *v = last;
                }
            }
        }
    }

    /// Index of the latest row dated at or before `date`.
    pub fn asof_index(&self, date: NaiveDate) -> Option<usize> {
        match self.dates.binary_search(&date) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }

    /// Extract one column as a contiguous, gap-filled series.
    pub fn target(&self, ticker: &Ticker, column: &str) -> Result<TargetSeries, SeriesError> {
        let values = self
            .column(column)
            .ok_or_else(|| SeriesError::MissingColumn(column.to_string()))?;

        let observed: Vec<(NaiveDate, f64)> = self
            .dates
            .iter()
            .zip(values)
            .filter_map(|(d, v)| v.map(|x| (*d, x)))
            .collect();
        if observed.is_empty() {
            return Err(SeriesError::Empty(column.to_string()));
        }

        let observed_dates: Vec<NaiveDate> = observed.iter().map(|(d, _)| *d).collect();
        let frequency = Frequency::infer(&observed_dates);
        let first = observed[0].0;
        let last = observed[observed.len() - 1].0;

        let mut dates = Vec::with_capacity(observed.len());
        let mut filled = Vec::with_capacity(observed.len());
        let mut cursor = 0;
        let mut current = observed[0].1;
        let mut date = first;
        while date <= last {
            while cursor < observed.len() && observed[cursor].0 <= date {
                current = observed[cursor].1;
                cursor += 1;
            }
            dates.push(date);
            filled.push(current);
            date = frequency.step(date);
        }

        Ok(TargetSeries {
            ticker: ticker.clone(),
            frequency,
            dates,
            values: filled,
        })
    }
}

/// A contiguous, gap-filled numeric series for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSeries {
    pub ticker: Ticker,
    pub frequency: Frequency,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl TargetSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// The `horizon` grid dates after the last observation.
    pub fn next_dates(&self, horizon: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(horizon);
        let Some(mut date) = self.last_date() else {
            return out;
        };
        for _ in 0..horizon {
            date = self.frequency.step(date);
            out.push(date);
        }
        out
    }

    /// Keep only the first `n` observations.
    pub fn truncate(&mut self, n: usize) {
        self.dates.truncate(n);
        self.values.truncate(n);
    }

    /// BLAKE3 fingerprint of the dates and values.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.ticker.as_str().as_bytes());
        for (d, v) in self.dates.iter().zip(&self.values) {
            hasher.update(&d.num_days_from_ce().to_le_bytes());
            hasher.update(&v.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// A single dated value from a data provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

/// Resample observations to weeks ending on Friday, keeping the last value
/// of each week and labelling it with that Friday.
pub fn resample_weekly(observations: &[Observation]) -> Vec<Observation> {
    let mut weeks: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut sorted: Vec<&Observation> = observations.iter().filter(|o| o.value.is_finite()).collect();
    sorted.sort_by_key(|o| o.date);
    for obs in sorted {
        weeks.insert(week_ending_friday(obs.date), obs.value);
    }
    weeks
        .into_iter()
        .map(|(date, value)| Observation { date, value })
        .collect()
}

/// The Friday that closes the week containing `date` (Saturday and Sunday
/// belong to the following week).
pub fn week_ending_friday(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_monday() as i64;
    let days = (4 - weekday).rem_euclid(7);
    date + Duration::days(days)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn aapl() -> Ticker {
        Ticker::parse("AAPL").unwrap()
    }

    #[test]
    fn read_csv_finds_date_column_in_any_case() {
        let csv = "Date,Weekly_Close,Volume\n2024-01-12,186.5,100\n2024-01-05,181.2,\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        assert_eq!(series.dates, vec![d(2024, 1, 5), d(2024, 1, 12)]);
        assert_eq!(series.column("weekly_close").unwrap(), &[Some(181.2), Some(186.5)]);
        assert_eq!(series.column("Volume").unwrap(), &[None, Some(100.0)]);
    }

    #[test]
    fn read_csv_rejects_missing_date_column() {
        let csv = "day,close\n2024-01-05,1.0\n";
        assert!(matches!(
            RawSeries::read_csv(csv.as_bytes()),
            Err(SeriesError::MissingColumn(_))
        ));
    }

    #[test]
    fn read_csv_ignores_time_suffix() {
        let csv = "date,close\n2024-01-05 00:00:00,1.0\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        assert_eq!(series.dates, vec![d(2024, 1, 5)]);
    }

    #[test]
    fn duplicate_dates_keep_last_row() {
        let csv = "date,close\n2024-01-05,1.0\n2024-01-05,2.0\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.column("close").unwrap(), &[Some(2.0)]);
    }

    #[test]
    fn csv_write_then_read_preserves_values() {
        let csv = "date,close,vix\n2024-01-05,1.5,\n2024-01-12,2.5,13.1\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        let mut buf = Vec::new();
        series.write_csv(&mut buf).unwrap();
        let back = RawSeries::read_csv(buf.as_slice()).unwrap();
        assert_eq!(series, back);
    }

    #[test]
    fn weekly_frequency_inferred_from_spacing() {
        let dates = vec![d(2024, 1, 5), d(2024, 1, 12), d(2024, 1, 19), d(2024, 1, 25)];
        assert_eq!(Frequency::infer(&dates), Frequency::Weekly);
    }

    #[test]
    fn business_daily_inferred_without_weekends() {
        let dates = vec![d(2024, 1, 4), d(2024, 1, 5), d(2024, 1, 8), d(2024, 1, 9)];
        assert_eq!(Frequency::infer(&dates), Frequency::BusinessDaily);
    }

    #[test]
    fn target_forward_fills_missing_weeks() {
        let csv = "date,close\n2024-01-05,10\n2024-01-12,\n2024-01-26,12\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        let target = series.target(&aapl(), "close").unwrap();
        assert_eq!(target.frequency, Frequency::Weekly);
        assert_eq!(
            target.dates,
            vec![d(2024, 1, 5), d(2024, 1, 12), d(2024, 1, 19), d(2024, 1, 26)]
        );
        assert_eq!(target.values, vec![10.0, 10.0, 10.0, 12.0]);
    }

    #[test]
    fn target_drops_leading_missing_values() {
        let csv = "date,close\n2024-01-04,\n2024-01-05,5\n2024-01-08,6\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        let target = series.target(&aapl(), "close").unwrap();
        assert_eq!(target.dates[0], d(2024, 1, 5));
        assert_eq!(target.values, vec![5.0, 6.0]);
    }

    #[test]
    fn target_fails_on_all_missing() {
        let csv = "date,close\n2024-01-05,\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        assert!(matches!(series.target(&aapl(), "close"), Err(SeriesError::Empty(_))));
    }

    #[test]
    fn next_dates_continue_the_grid() {
        let csv = "date,close\n2024-01-04,1\n2024-01-05,2\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        let target = series.target(&aapl(), "close").unwrap();
        assert_eq!(target.next_dates(2), vec![d(2024, 1, 8), d(2024, 1, 9)]);
    }

    #[test]
    fn asof_index_picks_preceding_row() {
        let csv = "date,x\n2024-01-05,1\n2024-01-12,2\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        assert_eq!(series.asof_index(d(2024, 1, 4)), None);
        assert_eq!(series.asof_index(d(2024, 1, 5)), Some(0));
        assert_eq!(series.asof_index(d(2024, 1, 10)), Some(0));
        assert_eq!(series.asof_index(d(2024, 2, 1)), Some(1));
    }

    #[test]
    fn forward_fill_carries_values() {
        let csv = "date,cpi\n2024-01-05,300\n2024-01-12,\n2024-01-19,\n";
        let mut series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        series.forward_fill();
        assert_eq!(series.column("cpi").unwrap(), &[Some(300.0); 3]);
    }

    #[test]
    fn weekly_resample_keeps_last_value_of_week() {
        let obs = vec![
            Observation { date: d(2024, 1, 2), value: 1.0 },
            Observation { date: d(2024, 1, 4), value: 2.0 },
            Observation { date: d(2024, 1, 8), value: 3.0 },
            Observation { date: d(2024, 1, 12), value: 4.0 },
        ];
        let weekly = resample_weekly(&obs);
        assert_eq!(
            weekly,
            vec![
                Observation { date: d(2024, 1, 5), value: 2.0 },
                Observation { date: d(2024, 1, 12), value: 4.0 },
            ]
        );
    }

    #[test]
    fn fingerprint_changes_with_values() {
        let csv = "date,close\n2024-01-05,1\n2024-01-12,2\n";
        let series = RawSeries::read_csv(csv.as_bytes()).unwrap();
        let a = series.target(&aapl(), "close").unwrap();
        let mut b = a.clone();
        b.values[1] = 3.0;
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
