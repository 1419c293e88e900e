//! Local refinement of an inverse guess against the forward surrogate.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ao_models::PredictionService;
use ao_types::{
    AoError, AoResult, BoundsTable, Family, FamilyBounds, OptimizerSettings, ParamVector,
    TargetPerformance, PARAM_COUNT,
};

use crate::powell::{minimize, PowellOptions};

/// Result of [`LocalRefiner::optimize`]. Failure is a value, not an error:
/// `success == false` carries the starting guess in `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub params: ParamVector,
    pub objective_value: f64,
    pub converged: bool,
    pub success: bool,
    pub iterations: usize,
    pub evaluations: usize,
    pub message: Option<String>,
}

impl RefinementOutcome {
    fn failed(x0: ParamVector, objective_value: f64, message: String) -> Self {
        Self {
            params: x0,
            objective_value,
            converged: false,
            success: false,
            iterations: 0,
            evaluations: 0,
            message: Some(message),
        }
    }
}

/// Bounded gradient-free search over the forward surrogate.
#[derive(Debug, Clone)]
pub struct LocalRefiner {
    prediction: PredictionService,
    bounds: BoundsTable,
    settings: OptimizerSettings,
}

impl LocalRefiner {
    pub fn new(prediction: PredictionService, bounds: BoundsTable, settings: OptimizerSettings) -> Self {
        Self {
            prediction,
            bounds,
            settings,
        }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// `(Fr - Fr_t)^2 + w * (BW - BW_t)^2` on the forward prediction, or the
    /// failure penalty when the forward call fails.
    pub fn objective(&self, family: Family, target: &TargetPerformance, params: &ParamVector) -> f64 {
        match self.prediction.predict_forward(family, params) {
            Ok(predicted) if predicted.is_finite() => {
                predicted.weighted_sq_error(target, self.settings.bw_weight)
            }
            _ => self.settings.failure_penalty,
        }
    }

    /// Sharpens `x0` (or the inverse prediction when absent) inside `bounds`
    /// (or the family defaults). Only slots with a non-zero-width interval are
    /// searched; the rest are held at their lower bound.
    pub fn optimize(
        &self,
        family: Family,
        target: &TargetPerformance,
        bounds: Option<&FamilyBounds>,
        x0: Option<ParamVector>,
    ) -> AoResult<RefinementOutcome> {
        if !self.prediction.registry().families().contains(&family) {
            return Err(AoError::UnknownFamily {
                name: family.name().to_string(),
            });
        }

        let x0 = match x0 {
            Some(x0) => x0,
            None => match self.prediction.predict_inverse(family, target) {
                Ok(guess) => guess,
                Err(e) => {
                    debug!(family = %family, error = %e, "Inverse guess unavailable, starting from zeros");
                    ParamVector::zeros()
                }
            },
        };
        let bounds = bounds.copied().unwrap_or_else(|| self.bounds.for_family(family));

        if let Err(e) = bounds.validate() {
            let value = self.objective(family, target, &x0);
            return Ok(RefinementOutcome::failed(x0, value, e.to_string()));
        }

        let pinned = ParamVector::new(std::array::from_fn::<f64, PARAM_COUNT, _>(|i| bounds[i].lower));
        let free = bounds.free_slots();

        if free.is_empty() {
            let value = self.objective(family, target, &pinned);
            return Ok(RefinementOutcome {
                params: pinned,
                objective_value: value,
                converged: true,
                success: true,
                iterations: 0,
                evaluations: 0,
                message: None,
            });
        }

        let assemble = |free_values: &[f64]| -> ParamVector {
            let mut full = pinned;
            for (slot, value) in free.iter().zip(free_values) {
                full[*slot] = *value;
            }
            full
        };

        let start: Vec<f64> = free.iter().map(|&slot| x0[slot]).collect();
        let free_bounds: Vec<(f64, f64)> = free
            .iter()
            .map(|&slot| (bounds[slot].lower, bounds[slot].upper))
            .collect();
        let options = PowellOptions {
            max_iterations: self.settings.max_iterations,
            max_evaluations: self.settings.max_evaluations,
            xtol: self.settings.xtol,
            ftol: self.settings.ftol,
        };

        let result = minimize(
            |candidate| self.objective(family, target, &assemble(candidate)),
            &start,
            &free_bounds,
            &options,
        );

        match result {
            Ok(result) => {
                let params = assemble(&result.x);
                debug!(
                    family = %family,
                    objective = result.fun,
                    iterations = result.iterations,
                    evaluations = result.evaluations,
                    converged = result.converged(),
                    "Local refinement finished"
                );
                Ok(RefinementOutcome {
                    params,
                    objective_value: result.fun,
                    converged: result.converged(),
                    success: true,
                    iterations: result.iterations,
                    evaluations: result.evaluations,
                    message: None,
                })
            }
            Err(e) => {
                warn!(family = %family, error = %e, "Local refinement failed");
                let value = self.objective(family, target, &x0);
                Ok(RefinementOutcome::failed(x0, value, e.to_string()))
            }
        }
    }
}
