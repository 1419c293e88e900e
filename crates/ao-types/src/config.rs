use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bounds::BoundsTable;
use crate::errors::{AoError, AoResult};
use crate::family::Family;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV_VAR: &str = "AO_CONFIG";

/// Process-wide engine configuration. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Families the registry will serve. Anything else is `UnknownFamily`.
    pub families: Vec<Family>,
    pub bounds: BoundsTable,
    pub paths: PathSettings,
    pub correction: CorrectionSettings,
    pub exploration: ExplorationSettings,
    pub retrain: RetrainSettings,
    pub optimizer: OptimizerSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            families: Family::ALL.to_vec(),
            bounds: BoundsTable::default(),
            paths: PathSettings::default(),
            correction: CorrectionSettings::default(),
            exploration: ExplorationSettings::default(),
            retrain: RetrainSettings::default(),
            optimizer: OptimizerSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> AoResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AoError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| AoError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file named by `AO_CONFIG`, or falls back to defaults.
    pub fn load() -> AoResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_json_file(PathBuf::from(path)),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn with_families(mut self, families: Vec<Family>) -> Self {
        self.families = families;
        self
    }

    pub fn with_bounds(mut self, bounds: BoundsTable) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_paths(mut self, paths: PathSettings) -> Self {
        self.paths = paths;
        self
    }

    /// Places every artifact under `base`.
    pub fn with_base_dir(mut self, base: impl AsRef<Path>) -> Self {
        self.paths = PathSettings::under(base);
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.correction.alpha = alpha;
        self
    }

    pub fn with_reload_interval_secs(mut self, secs: u64) -> Self {
        self.correction.reload_interval_secs = secs;
        self
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.exploration.sigma = sigma;
        self
    }

    pub fn with_exploration_seed(mut self, seed: u64) -> Self {
        self.exploration.seed = Some(seed);
        self
    }

    pub fn with_retrain(mut self, retrain: RetrainSettings) -> Self {
        self.retrain = retrain;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerSettings) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn is_enabled(&self, family: Family) -> bool {
        self.families.contains(&family)
    }

    pub fn validate(&self) -> AoResult<()> {
        if self.families.is_empty() {
            return Err(AoError::Config("at least one family must be enabled".into()));
        }
        self.bounds.validate()?;

        let alpha = self.correction.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(AoError::Config(format!(
                "correction alpha must be in (0, 1), got {alpha}"
            )));
        }
        let sigma = self.exploration.sigma;
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(AoError::Config(format!(
                "exploration sigma must be finite and non-negative, got {sigma}"
            )));
        }
        self.retrain.validate()?;
        self.optimizer.validate()?;
        Ok(())
    }
}

/// Artifact and log locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    pub models_dir: PathBuf,
    pub feedback_csv: PathBuf,
    pub correction_artifact: PathBuf,
    pub checkpoint: PathBuf,
}

impl PathSettings {
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            models_dir: base.join("models"),
            feedback_csv: base.join("feedback.csv"),
            correction_artifact: base.join("models").join("correction.json"),
            checkpoint: base.join("models").join("correction_checkpoint.json"),
        }
    }

    pub fn default_base_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("antenna-opt"))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self::under(Self::default_base_dir())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionSettings {
    /// Damping applied to correction deltas and refine steps.
    pub alpha: f64,
    /// Minimum seconds between correction artifact reloads.
    pub reload_interval_secs: u64,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            reload_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationSettings {
    /// Standard deviation of the multiplicative noise factor.
    pub sigma: f64,
    /// Fixed seed for reproducible exploration. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ExplorationSettings {
    fn default() -> Self {
        Self {
            sigma: 0.03,
            seed: None,
        }
    }
}

/// Thresholds and regressor hyper-parameters for the correction retrainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainSettings {
    pub min_samples: usize,
    pub min_new_samples: usize,
    pub hidden_layers: Vec<usize>,
    pub max_epochs: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    pub batch_size: usize,
    pub patience: usize,
    pub tolerance: f64,
    pub seed: u64,
    /// Append the observed `err_Fr, err_BW` to the feature vector. At proposal
    /// time these columns come from the caller's last observed error and read
    /// zero when none is supplied.
    pub use_error_features: bool,
}

impl Default for RetrainSettings {
    fn default() -> Self {
        Self {
            min_samples: 12,
            min_new_samples: 8,
            hidden_layers: vec![256, 128],
            max_epochs: 800,
            learning_rate: 1e-3,
            l2_penalty: 1e-4,
            batch_size: 200,
            patience: 10,
            tolerance: 1e-4,
            seed: 42,
            use_error_features: false,
        }
    }
}

impl RetrainSettings {
    pub fn validate(&self) -> AoResult<()> {
        if self.min_samples == 0 {
            return Err(AoError::Config("retrain min_samples must be positive".into()));
        }
        if self.min_new_samples == 0 {
            return Err(AoError::Config(
                "retrain min_new_samples must be positive".into(),
            ));
        }
        if self.hidden_layers.iter().any(|&width| width == 0) {
            return Err(AoError::Config("hidden layer width must be positive".into()));
        }
        if self.max_epochs == 0 || self.batch_size == 0 {
            return Err(AoError::Config(
                "max_epochs and batch_size must be positive".into(),
            ));
        }
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(AoError::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub max_iterations: usize,
    /// Forward-model evaluation budget. `None` means unbounded.
    pub max_evaluations: Option<usize>,
    /// Line-search tolerance in normalized coordinates.
    pub xtol: f64,
    /// Relative objective tolerance for convergence.
    pub ftol: f64,
    /// Objective value returned when the forward call fails.
    pub failure_penalty: f64,
    /// Weight of the squared bandwidth error in the objective.
    pub bw_weight: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            max_evaluations: None,
            xtol: 1e-4,
            ftol: 1e-4,
            failure_penalty: 1e6,
            bw_weight: 0.001,
        }
    }
}

impl OptimizerSettings {
    pub fn validate(&self) -> AoResult<()> {
        if self.max_iterations == 0 {
            return Err(AoError::Config(
                "optimizer max_iterations must be positive".into(),
            ));
        }
        if !(self.xtol > 0.0) || !(self.ftol > 0.0) {
            return Err(AoError::Config(
                "optimizer tolerances must be positive".into(),
            ));
        }
        if !self.bw_weight.is_finite() || self.bw_weight < 0.0 {
            return Err(AoError::Config(format!(
                "bandwidth weight must be non-negative, got {}",
                self.bw_weight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.families.len(), 10);
        assert_eq!(config.correction.alpha, 0.3);
        assert_eq!(config.exploration.sigma, 0.03);
        assert_eq!(config.correction.reload_interval_secs, 300);
        assert_eq!(config.optimizer.max_iterations, 1000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"families": ["patch_rect", "dipole"], "correction": {{"alpha": 0.5}}}}"#
        )
        .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.families, vec![Family::PatchRect, Family::Dipole]);
        assert_eq!(config.correction.alpha, 0.5);
        assert_eq!(config.correction.reload_interval_secs, 300);
        assert_eq!(config.retrain.min_samples, 12);
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        let config = EngineConfig::default().with_alpha(1.5);
        assert!(matches!(config.validate(), Err(AoError::Config(_))));
    }

    #[test]
    fn base_dir_places_artifacts_together() {
        let config = EngineConfig::default().with_base_dir("/tmp/ao");
        assert_eq!(config.paths.models_dir, PathBuf::from("/tmp/ao/models"));
        assert_eq!(config.paths.feedback_csv, PathBuf::from("/tmp/ao/feedback.csv"));
        assert!(config.paths.checkpoint.starts_with("/tmp/ao/models"));
    }

    #[test]
    fn unknown_family_in_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"families": ["horn"]}"#).unwrap();
        assert!(EngineConfig::from_json_file(&path).is_err());
    }
}
