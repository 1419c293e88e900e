//! In-memory surrogates shared by the unit tests.

use std::path::Path;
use std::sync::Arc;

use ao_models::{Activation, DenseLayer, FamilyModels, Mlp, ModelRegistry, Normalizer};
use ao_types::{EngineConfig, Family, ObservedPerformance};
use ndarray::{array, Array1, Array2};

use crate::evaluator::{EvaluationError, EvaluationRequest, Evaluator};

/// Fr = 100 * p0 and BW = 50000 * p2, with an exact inverse.
pub(crate) fn linear_models(family: Family) -> FamilyModels {
    let mut w = Array2::zeros((5, 2));
    w[[0, 0]] = 100.0;
    w[[2, 1]] = 50_000.0;
    let forward = Mlp::new(vec![DenseLayer::new(w, Array1::zeros(2), Activation::Identity).unwrap()]).unwrap();

    let mut w_inv = Array2::zeros((2, 5));
    w_inv[[0, 0]] = 0.01;
    w_inv[[1, 2]] = 2e-5;
    let bias = array![0.0, 0.03, 0.0, 0.0016, 4.4];
    let inverse = Mlp::new(vec![DenseLayer::new(w_inv, bias, Activation::Identity).unwrap()]).unwrap();

    FamilyModels::from_parts(
        family,
        (forward, Normalizer::identity(5)),
        (Normalizer::identity(2), inverse, Normalizer::identity(5)),
    )
}

pub(crate) fn config(base: &Path) -> EngineConfig {
    EngineConfig::default()
        .with_base_dir(base)
        .with_families(vec![Family::PatchRect, Family::Dipole])
        .with_exploration_seed(7)
}

/// Registry with `patch_rect` populated and `dipole` enabled but empty on disk.
pub(crate) fn registry(config: &EngineConfig) -> Arc<ModelRegistry> {
    let registry = Arc::new(ModelRegistry::from_config(config));
    registry.insert(linear_models(Family::PatchRect)).unwrap();
    registry
}

/// Evaluator that agrees with [`linear_models`] up to a fixed frequency offset
/// and always reports the requested bandwidth.
#[derive(Debug, Default)]
pub(crate) struct LinearEvaluator {
    pub fr_offset: f64,
    pub fail: bool,
    pub calls: usize,
}

impl Evaluator for LinearEvaluator {
    fn name(&self) -> &str {
        "linear"
    }

    fn evaluate(&mut self, request: &EvaluationRequest) -> Result<ObservedPerformance, EvaluationError> {
        self.calls += 1;
        if self.fail {
            return Err(EvaluationError::Failed {
                message: "solver crashed".to_string(),
            });
        }
        Ok(ObservedPerformance::new(
            100.0 * request.params[0] + self.fr_offset,
            request.target.bw_mhz,
            -20.0,
        ))
    }
}
