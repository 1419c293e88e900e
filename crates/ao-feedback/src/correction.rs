//! Time-gated correction model.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use ao_types::{AoError, EngineConfig, Family, ModelError, ParamVector, Performance, TargetPerformance};

use crate::artifact::{build_features, CorrectionArtifact};

/// Why a correction was not produced. Never leaves this crate.
#[derive(Debug)]
enum CorrectionUnavailable {
    NotLoaded,
    Features(String),
    Inference(ModelError),
    NonFinite,
}

impl std::fmt::Display for CorrectionUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "no correction artifact loaded"),
            Self::Features(reason) => write!(f, "cannot build features: {reason}"),
            Self::Inference(e) => write!(f, "inference failed: {e}"),
            Self::NonFinite => write!(f, "correction delta is not finite"),
        }
    }
}

impl From<ModelError> for CorrectionUnavailable {
    fn from(e: ModelError) -> Self {
        Self::Inference(e)
    }
}

/// Advisory parameter-delta regressor backed by a file that the retrainer
/// replaces atomically. Reloads at most once per `reload_interval` unless forced.
#[derive(Debug, Clone)]
pub struct CorrectionModel {
    path: PathBuf,
    reload_interval: Duration,
    artifact: Option<Arc<CorrectionArtifact>>,
    last_loaded_at: Option<DateTime<Utc>>,
}

impl CorrectionModel {
    pub fn new(path: impl Into<PathBuf>, reload_interval: Duration) -> Self {
        Self {
            path: path.into(),
            reload_interval,
            artifact: None,
            last_loaded_at: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let secs = i64::try_from(config.correction.reload_interval_secs).unwrap_or(i64::MAX);
        Self::new(
            config.paths.correction_artifact.clone(),
            Duration::try_seconds(secs).unwrap_or(Duration::MAX),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn artifact(&self) -> Option<&CorrectionArtifact> {
        self.artifact.as_deref()
    }

    pub fn last_loaded_at(&self) -> Option<DateTime<Utc>> {
        self.last_loaded_at
    }

    /// Reloads from disk if forced or the interval has elapsed. Returns
    /// whether a reload was attempted.
    pub fn load(&mut self, force: bool) -> bool {
        self.load_at(Utc::now(), force)
    }

    pub fn load_at(&mut self, now: DateTime<Utc>, force: bool) -> bool {
        let fresh = self
            .last_loaded_at
            .is_some_and(|at| now.signed_duration_since(at) < self.reload_interval);
        if fresh && !force {
            return false;
        }

        self.last_loaded_at = Some(now);
        match CorrectionArtifact::load(&self.path) {
            Ok(artifact) => {
                info!(
                    path = %self.path.display(),
                    samples = artifact.sample_count,
                    "Loaded correction model"
                );
                self.artifact = Some(Arc::new(artifact));
            }
            Err(AoError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No correction model on disk");
                self.artifact = None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable correction model");
                self.artifact = None;
            }
        }
        true
    }

    /// Parameter delta for this trial, or `None` when no correction is available.
    /// `observed_error` feeds the error columns when the artifact declares them.
    pub fn apply(
        &self,
        family: Family,
        target: &TargetPerformance,
        params: &ParamVector,
        observed_error: Option<&Performance>,
    ) -> Option<ParamVector> {
        match self.try_apply(family, target, params, observed_error) {
            Ok(delta) => Some(delta),
            Err(reason) => {
                debug!(family = %family, %reason, "Correction skipped");
                None
            }
        }
    }

    fn try_apply(
        &self,
        family: Family,
        target: &TargetPerformance,
        params: &ParamVector,
        observed_error: Option<&Performance>,
    ) -> Result<ParamVector, CorrectionUnavailable> {
        let artifact = self.artifact.as_ref().ok_or(CorrectionUnavailable::NotLoaded)?;

        let features = build_features(&artifact.feature_columns, family, target, params, observed_error)
            .map_err(CorrectionUnavailable::Features)?;
        let x = artifact.input_normalizer.transform(&features)?;
        let y_scaled = artifact.model.predict(&x)?;
        let y = artifact.output_normalizer.inverse_transform(&y_scaled)?;

        let delta = ParamVector::try_from(y.as_slice())
            .map_err(|e| CorrectionUnavailable::Features(e.to_string()))?;
        if !delta.is_finite() {
            return Err(CorrectionUnavailable::NonFinite);
        }
        Ok(delta)
    }
}
