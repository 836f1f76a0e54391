//! Integration tests: scraped store → target series → model adapters → cache.

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

use forecastlab_core::cache::ArtifactStore;
use forecastlab_core::data::ScrapedStore;
use forecastlab_core::domain::{ModelKind, Ticker};
use forecastlab_core::models::{
    AutoTsAdapter, AutoTsConfig, ModelAdapter, ModelError, SarimaAdapter, SarimaConfig,
    TimeMoeAdapter, TimeMoeConfig,
};
use forecastlab_core::series::{Frequency, RawSeries};
use forecastlab_core::staleness::{cache_state, CacheState};

fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(n);
    let mut date = start;
    while out.len() < n {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(date);
        }
        date += Duration::days(1);
    }
    out
}

fn close_series(n: usize) -> RawSeries {
    let dates = business_days(NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), n);
    let rows = dates
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let t = i as f64;
            (d, vec![Some(150.0 + 0.1 * t + (t * 0.3).sin() * 2.0)])
        })
        .collect();
    RawSeries::from_rows(&["close".to_string()], rows)
}

fn adapters(cache: &ArtifactStore) -> Vec<Box<dyn ModelAdapter>> {
    vec![
        Box::new(SarimaAdapter::new(SarimaConfig::default(), cache.clone())),
        Box::new(AutoTsAdapter::new(AutoTsConfig::default(), cache.clone())),
        Box::new(TimeMoeAdapter::new(TimeMoeConfig::default(), cache.clone())),
    ]
}

#[test]
fn aapl_with_400_days_trains_sarima_and_predicts_the_future() {
    let tmp = tempfile::tempdir().unwrap();
    let scraped = ScrapedStore::new(tmp.path().join("scraped"));
    let cache = ArtifactStore::new(tmp.path().join("cache"));
    let aapl = Ticker::parse("AAPL").unwrap();

    scraped.write_series(&aapl, &close_series(400)).unwrap();
    let series = scraped.load_series(&aapl).unwrap().target(&aapl, "close").unwrap();
    assert_eq!(series.frequency, Frequency::BusinessDaily);
    assert_eq!(series.len(), 400);

    let sarima = SarimaAdapter::new(SarimaConfig::default(), cache.clone());
    let artifact = sarima.train(&series).unwrap();
    assert!(cache.contains(ModelKind::Sarima, &aapl));
    assert_eq!(artifact.observations, 400);

    let generated_at = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
    let records = sarima.predict(&artifact, &series, 1, generated_at).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].date > series.last_date().unwrap());
    assert!(records[0].predicted_value.is_finite());
    assert_eq!(records[0].model, ModelKind::Sarima);

    let cached = sarima.load_cache(&aapl).unwrap();
    assert_eq!(
        cache_state(cached.as_ref(), series.last_date().unwrap(), sarima.staleness_days()),
        CacheState::Cached
    );
}

#[test]
fn zzz9_with_10_days_is_insufficient_for_every_kind() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ArtifactStore::new(tmp.path());
    let zzz9 = Ticker::parse("ZZZ9").unwrap();
    let series = close_series(10).target(&zzz9, "close").unwrap();

    for adapter in adapters(&cache) {
        let err = adapter.train(&series).unwrap_err();
        assert!(
            matches!(err, ModelError::InsufficientHistory { available: 10, .. }),
            "{}: {err}",
            adapter.kind()
        );
        assert!(!cache.contains(adapter.kind(), &zzz9));
    }
}

#[test]
fn walk_forward_only_uses_earlier_data() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ArtifactStore::new(tmp.path());
    let msft = Ticker::parse("MSFT").unwrap();
    let series = close_series(120).target(&msft, "close").unwrap();

    let autots = AutoTsAdapter::new(AutoTsConfig::default(), cache);
    let artifact = autots.train(&series).unwrap();
    let generated_at = Utc::now();
    let records = autots.walk_forward(&artifact, &series, series.len() - 52, generated_at);
    assert_eq!(records.len(), 52);

    // Truncating the series after a date must not change its prediction
    let mut prefix = series.clone();
    prefix.truncate(series.len() - 10);
    let shorter = autots.walk_forward(&artifact, &prefix, series.len() - 52, generated_at);
    assert_eq!(&records[..shorter.len()], &shorter[..]);
}

#[test]
fn corrupt_artifact_reads_as_corrupt_then_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ArtifactStore::new(tmp.path());
    let aapl = Ticker::parse("AAPL").unwrap();
    let path = cache.artifact_path(ModelKind::AutoTs, &aapl);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "[1, 2").unwrap();

    let autots = AutoTsAdapter::new(AutoTsConfig::default(), cache);
    assert!(matches!(
        autots.load_cache(&aapl),
        Err(ModelError::CacheCorrupt { .. })
    ));
    assert!(autots.load_cache(&aapl).unwrap().is_none());
}

#[test]
fn artifact_for_another_ticker_is_corrupt() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ArtifactStore::new(tmp.path());
    let aapl = Ticker::parse("AAPL").unwrap();
    let msft = Ticker::parse("MSFT").unwrap();
    let autots = AutoTsAdapter::new(AutoTsConfig::default(), cache.clone());

    let artifact = autots.train(&close_series(40).target(&msft, "close").unwrap()).unwrap();
    // Stored under the wrong name
    cache.save(&aapl, &artifact).unwrap();
    assert!(matches!(
        autots.load_cache(&aapl),
        Err(ModelError::CacheCorrupt { .. })
    ));
}
