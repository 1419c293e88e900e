use std::sync::Arc;
use tracing::debug;

use ao_types::{AoResult, Family, ModelError, ParamVector, Performance, TargetPerformance};

use crate::registry::ModelRegistry;

/// Forward and inverse surrogate inference on top of a [`ModelRegistry`].
#[derive(Debug, Clone)]
pub struct PredictionService {
    registry: Arc<ModelRegistry>,
}

impl PredictionService {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// params -> (Fr GHz, BW MHz)
    pub fn predict_forward(&self, family: Family, params: &ParamVector) -> AoResult<Performance> {
        let models = self.registry.ensure(family)?;
        let (model, normalizer) = models.forward_pair()?;

        let x = normalizer.transform(params.as_slice())?;
        let y = model.predict(&x)?;
        if y.len() != 2 {
            return Err(ModelError::ShapeMismatch {
                what: "forward output",
                got: y.len(),
                expected: 2,
            }
            .into());
        }
        Ok(Performance::new(y[0], y[1]))
    }

    /// (Fr GHz, BW MHz) -> params
    pub fn predict_inverse(&self, family: Family, target: &TargetPerformance) -> AoResult<ParamVector> {
        let models = self.registry.ensure(family)?;
        let (input, model, output) = models.inverse_triplet()?;

        let x = input.transform(&[target.fr_ghz, target.bw_mhz])?;
        let y_scaled = model.predict(&x)?;
        let y = output.inverse_transform(&y_scaled)?;
        let params = ParamVector::try_from(y.as_slice())?;

        debug!(family = %family, fr_ghz = target.fr_ghz, bw_mhz = target.bw_mhz, ?params, "Inverse prediction");
        Ok(params)
    }
}
