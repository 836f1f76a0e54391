//! Artifact cache store: one JSON file per (ticker, model kind).
//!
//! Layout: `{cache_dir}/{kind_subdir}/{TICKER}.json`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Corrupt artifacts are quarantined (`{TICKER}.json.quarantined`) and
//!   reported as `CacheCorrupt` so callers can treat them as a miss

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::{ModelKind, Ticker};
use crate::models::{ModelArtifact, ModelError};

/// Cache for fitted model artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cache_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `cache_dir`. Directories are created lazily
    /// on the first write.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the artifact for a (kind, ticker) pair.
    pub fn artifact_path(&self, kind: ModelKind, ticker: &Ticker) -> PathBuf {
        self.kind_dir(kind).join(format!("{ticker}.json"))
    }

    fn kind_dir(&self, kind: ModelKind) -> PathBuf {
        self.cache_dir.join(kind.cache_subdir())
    }

    /// Checks if an artifact file exists for the pair.
    pub fn contains(&self, kind: ModelKind, ticker: &Ticker) -> bool {
        self.artifact_path(kind, ticker).exists()
    }

    /// Retrieves the cached artifact.
    ///
    /// Returns `Ok(None)` when nothing is cached. An unreadable artifact is
    /// moved aside and reported as `CacheCorrupt`.
    pub fn load(&self, kind: ModelKind, ticker: &Ticker) -> Result<Option<ModelArtifact>, ModelError> {
        let path = self.artifact_path(kind, ticker);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ModelError::CacheIo { path, source }),
        };

        match serde_json::from_str::<ModelArtifact>(&json) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                let quarantine = path.with_extension("json.quarantined");
                warn!(
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt cache artifact"
                );
                let _ = fs::rename(&path, &quarantine);
                Err(ModelError::CacheCorrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stores an artifact, replacing any previous one for the pair.
    pub fn save(&self, ticker: &Ticker, artifact: &ModelArtifact) -> Result<(), ModelError> {
        let dir = self.kind_dir(artifact.kind);
        fs::create_dir_all(&dir).map_err(|source| ModelError::CacheIo {
            path: dir.clone(),
            source,
        })?;

        let path = self.artifact_path(artifact.kind, ticker);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(artifact).map_err(|e| ModelError::CacheIo {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        fs::write(&tmp_path, json).map_err(|source| ModelError::CacheIo {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            ModelError::CacheIo {
                path: path.clone(),
                source,
            }
        })?;
        Ok(())
    }

    /// Removes the artifact for the pair, if present.
    pub fn remove(&self, kind: ModelKind, ticker: &Ticker) -> Result<(), ModelError> {
        let path = self.artifact_path(kind, ticker);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ModelError::CacheIo { path, source }),
        }
    }

    /// Tickers with a cached artifact for `kind`, sorted.
    pub fn tickers(&self, kind: ModelKind) -> Vec<Ticker> {
        let Ok(entries) = fs::read_dir(self.kind_dir(kind)) else {
            return Vec::new();
        };
        let mut tickers: Vec<Ticker> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json"))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?;
                Ticker::parse(stem).ok()
            })
            .collect();
        tickers.sort();
        tickers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactState, AutoTsState, Template, ARTIFACT_SCHEMA_VERSION};
    use chrono::{NaiveDate, Utc};

    fn artifact(ticker: &str) -> ModelArtifact {
        ModelArtifact {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            ticker: Ticker::parse(ticker).unwrap(),
            kind: ModelKind::AutoTs,
            training_cutoff: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            trained_at: Utc::now(),
            observations: 100,
            series_hash: "abc".into(),
            state: ArtifactState::AutoTs(AutoTsState {
                members: vec![Template::WindowMean { window: 4 }],
                validation_mae: Some(0.5),
            }),
        }
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let aapl = Ticker::parse("AAPL").unwrap();

        assert!(!store.contains(ModelKind::AutoTs, &aapl));
        assert!(store.load(ModelKind::AutoTs, &aapl).unwrap().is_none());

        let a = artifact("AAPL");
        store.save(&aapl, &a).unwrap();

        assert!(store.contains(ModelKind::AutoTs, &aapl));
        assert_eq!(store.load(ModelKind::AutoTs, &aapl).unwrap(), Some(a));
        assert!(tmp.path().join("autots/AAPL.json").exists());
        assert_eq!(store.tickers(ModelKind::AutoTs), vec![aapl]);
    }

    #[test]
    fn corrupt_artifact_is_quarantined() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let aapl = Ticker::parse("AAPL").unwrap();
        let path = store.artifact_path(ModelKind::Sarima, &aapl);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let err = store.load(ModelKind::Sarima, &aapl).unwrap_err();
        assert!(matches!(err, ModelError::CacheCorrupt { .. }));
        assert!(!path.exists());
        assert!(path.with_extension("json.quarantined").exists());

        // Second load is a plain miss
        assert!(store.load(ModelKind::Sarima, &aapl).unwrap().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let aapl = Ticker::parse("AAPL").unwrap();
        store.save(&aapl, &artifact("AAPL")).unwrap();
        store.remove(ModelKind::AutoTs, &aapl).unwrap();
        store.remove(ModelKind::AutoTs, &aapl).unwrap();
        assert!(!store.contains(ModelKind::AutoTs, &aapl));
    }
}
