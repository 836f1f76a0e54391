//! TimeMOE pretrained transformer adapter.
//!
//! There is no fitting step: "training" pins the checkpoint (path and BLAKE3
//! hash) and context length into the artifact. Forecasting z-normalises the
//! trailing context window, asks an [`InferenceEngine`] for the next
//! normalised value and rolls forward autoregressively.
//!
//! The ONNX Runtime engine is compiled in with the `onnx` feature. Without
//! it, or without a configured checkpoint, the adapter reports
//! `ModelUnavailable`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::{ArtifactState, ModelAdapter, ModelError};
use crate::cache::ArtifactStore;
use crate::domain::ModelKind;
use crate::series::TargetSeries;

/// TimeMOE settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeMoeConfig {
    pub min_history: usize,
    pub staleness_days: u32,
    /// Trailing observations fed to the model.
    pub context_length: usize,
    /// ONNX export of the checkpoint.
    pub checkpoint: Option<PathBuf>,
    pub model_name: String,
    /// Name of the graph input tensor.
    pub input_name: String,
}

impl Default for TimeMoeConfig {
    fn default() -> Self {
        Self {
            min_history: 20,
            staleness_days: 0,
            context_length: 10,
            checkpoint: None,
            model_name: "Maple728/TimeMoE-50M".to_string(),
            input_name: "input".to_string(),
        }
    }
}

/// Checkpoint reference recorded at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeMoeState {
    pub model_name: String,
    pub checkpoint: Option<String>,
    pub checkpoint_hash: Option<String>,
    pub context_length: usize,
}

/// Next-value predictor over a normalised context window.
pub trait InferenceEngine: Send + Sync {
    fn next_value(&self, context: &[f32]) -> Result<f32, ModelError>;
}

/// TimeMOE model adapter.
pub struct TimeMoeAdapter {
    config: TimeMoeConfig,
    store: ArtifactStore,
    engine: Result<Arc<dyn InferenceEngine>, String>,
    checkpoint_hash: Option<String>,
}

impl TimeMoeAdapter {
    /// Creates the adapter, loading the configured checkpoint. A checkpoint
    /// that cannot be loaded is not an error here; `train` and `predict`
    /// report it as `ModelUnavailable`.
    pub fn new(config: TimeMoeConfig, store: ArtifactStore) -> Self {
        let checkpoint_hash = config.checkpoint.as_ref().and_then(|p| hash_file(p));
        let engine = load_engine(&config);
        if let Err(reason) = &engine {
            tracing::debug!(reason = %reason, "TimeMOE engine unavailable");
        }
        Self {
            config,
            store,
            engine,
            checkpoint_hash,
        }
    }

    /// Creates the adapter around an already constructed engine.
    pub fn with_engine(
        config: TimeMoeConfig,
        store: ArtifactStore,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        let checkpoint_hash = config.checkpoint.as_ref().and_then(|p| hash_file(p));
        Self {
            config,
            store,
            engine: Ok(engine),
            checkpoint_hash,
        }
    }

    pub fn config(&self) -> &TimeMoeConfig {
        &self.config
    }

    fn engine(&self) -> Result<&Arc<dyn InferenceEngine>, ModelError> {
        self.engine
            .as_ref()
            .map_err(|reason| ModelError::ModelUnavailable {
                kind: ModelKind::TimeMoe,
                reason: reason.clone(),
            })
    }
}

fn hash_file(path: &std::path::Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(feature = "onnx")]
fn load_engine(config: &TimeMoeConfig) -> Result<Arc<dyn InferenceEngine>, String> {
    let path = config
        .checkpoint
        .as_ref()
        .ok_or_else(|| "no checkpoint configured".to_string())?;
    let engine = onnx::OnnxEngine::load(path, &config.input_name)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "onnx"))]
fn load_engine(_config: &TimeMoeConfig) -> Result<Arc<dyn InferenceEngine>, String> {
    Err("built without the `onnx` feature".to_string())
}

impl ModelAdapter for TimeMoeAdapter {
    fn kind(&self) -> ModelKind {
        ModelKind::TimeMoe
    }

    fn min_history(&self) -> usize {
        self.config.min_history
    }

    fn staleness_days(&self) -> u32 {
        self.config.staleness_days
    }

    fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn fit(&self, _series: &TargetSeries) -> Result<ArtifactState, ModelError> {
        self.engine()?;
        Ok(ArtifactState::TimeMoe(TimeMoeState {
            model_name: self.config.model_name.clone(),
            checkpoint: self
                .config
                .checkpoint
                .as_ref()
                .map(|p| p.display().to_string()),
            checkpoint_hash: self.checkpoint_hash.clone(),
            context_length: self.config.context_length.max(1),
        }))
    }

    fn forecast(
        &self,
        state: &ArtifactState,
        history: &[f64],
        steps: usize,
    ) -> Result<Vec<f64>, ModelError> {
        let ArtifactState::TimeMoe(state) = state else {
            return Err(ModelError::StateMismatch {
                kind: ModelKind::TimeMoe,
            });
        };
        let engine = self.engine()?;
        if history.is_empty() {
            return Err(ModelError::InsufficientHistory {
                kind: ModelKind::TimeMoe,
                required: 1,
                available: 0,
            });
        }

        let window = &history[history.len().saturating_sub(state.context_length.max(1))..];
        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let std = (window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };

        let mut context: Vec<f32> = window.iter().map(|v| ((v - mean) / scale) as f32).collect();
        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            let next = engine.next_value(&context)?;
            if !next.is_finite() {
                return Err(ModelError::FitDivergence {
                    kind: ModelKind::TimeMoe,
                    reason: "engine produced a non-finite value".into(),
                });
            }
            out.push(f64::from(next) * scale + mean);
            context.remove(0);
            context.push(next);
        }
        Ok(out)
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use tracing::info;

    use super::InferenceEngine;
    use crate::domain::ModelKind;
    use crate::models::ModelError;

    /// ONNX Runtime session over an exported TimeMOE checkpoint.
    pub struct OnnxEngine {
        session: Mutex<Session>,
        input_name: String,
    }

    impl OnnxEngine {
        pub fn load(path: &Path, input_name: &str) -> Result<Self, String> {
            if !path.exists() {
                return Err(format!("checkpoint not found: {}", path.display()));
            }
            let session = Session::builder()
                .map_err(|e| format!("failed to create session builder: {e}"))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| format!("failed to set optimization level: {e}"))?
                .commit_from_file(path)
                .map_err(|e| format!("failed to load checkpoint: {e}"))?;
            info!(path = %path.display(), "TimeMOE checkpoint loaded");
            Ok(Self {
                session: Mutex::new(session),
                input_name: input_name.to_string(),
            })
        }
    }

    fn inference_error(reason: impl Into<String>) -> ModelError {
        ModelError::ModelUnavailable {
            kind: ModelKind::TimeMoe,
            reason: reason.into(),
        }
    }

    impl InferenceEngine for OnnxEngine {
        fn next_value(&self, context: &[f32]) -> Result<f32, ModelError> {
            let shape = [1i64, context.len() as i64];
            let input = Tensor::from_array((shape, context.to_vec().into_boxed_slice()))
                .map_err(|e| inference_error(format!("failed to create input tensor: {e}")))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| inference_error("session lock poisoned"))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => input])
                .map_err(|e| inference_error(format!("inference failed: {e}")))?;

            let output_name = outputs
                .iter()
                .next()
                .map(|(name, _)| name.to_string())
                .ok_or_else(|| inference_error("no output tensor"))?;
            let output = outputs
                .get(&output_name)
                .ok_or_else(|| inference_error("output tensor vanished"))?;
            let (_, values) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| inference_error(format!("failed to extract output: {e}")))?;
            // The exported graph emits the prediction for the position after
            // the last context element last.
            values
                .last()
                .copied()
                .ok_or_else(|| inference_error("empty output tensor"))
        }
    }
}
