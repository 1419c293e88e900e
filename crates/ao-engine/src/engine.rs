//! Proposal pipeline: inverse guess, optional local refinement, damped
//! correction, exploration noise and the safety clamp, in that order.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use ao_feedback::CorrectionModel;
use ao_models::{ModelRegistry, PredictionService};
use ao_optimizer::{LocalRefiner, RefinementOutcome};
use ao_types::{
    config_error, AoResult, EngineConfig, Family, ParamVector, Performance, TargetPerformance,
    Tolerance,
};

use crate::safety::SafetyClamp;

/// Which optional stages of the pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProposalOptions {
    pub explore: bool,
    pub apply_correction: bool,
    pub use_optimizer: bool,
    /// Last observed `actual - target` for this design, fed to correction
    /// models trained with error features. Those columns read zero without it.
    #[serde(default)]
    pub observed_error: Option<Performance>,
}

impl Default for ProposalOptions {
    fn default() -> Self {
        Self {
            explore: true,
            apply_correction: true,
            use_optimizer: false,
            observed_error: None,
        }
    }
}

impl ProposalOptions {
    /// Inverse prediction and clamp only.
    pub fn deterministic() -> Self {
        Self {
            explore: false,
            apply_correction: false,
            use_optimizer: false,
            observed_error: None,
        }
    }

    pub fn with_explore(mut self, explore: bool) -> Self {
        self.explore = explore;
        self
    }

    pub fn with_correction(mut self, apply_correction: bool) -> Self {
        self.apply_correction = apply_correction;
        self
    }

    pub fn with_optimizer(mut self, use_optimizer: bool) -> Self {
        self.use_optimizer = use_optimizer;
        self
    }

    pub fn with_observed_error(mut self, error: Performance) -> Self {
        self.observed_error = Some(error);
        self
    }
}

/// A proposal together with the intermediate values that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub family: Family,
    pub target: TargetPerformance,
    /// Raw inverse prediction.
    pub base: ParamVector,
    pub refinement: Option<RefinementOutcome>,
    /// Undamped correction delta, when one was applied.
    pub correction: Option<ParamVector>,
    /// Final clamped vector.
    pub params: ParamVector,
}

/// Orchestrates the surrogates, the correction model and the clamp into a
/// single proposal. Not internally synchronized; share it behind a lock.
#[derive(Debug)]
pub struct ParameterEngine {
    prediction: PredictionService,
    refiner: LocalRefiner,
    correction: CorrectionModel,
    clamp: SafetyClamp,
    alpha: f64,
    noise: Normal<f64>,
    rng: ChaCha8Rng,
}

impl ParameterEngine {
    pub fn new(config: &EngineConfig, registry: Arc<ModelRegistry>) -> AoResult<Self> {
        config.validate()?;

        let noise = Normal::new(0.0, config.exploration.sigma)
            .map_err(|e| config_error!("invalid exploration sigma {}: {}", config.exploration.sigma, e))?;
        let rng = match config.exploration.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };

        let prediction = PredictionService::new(registry);
        let refiner = LocalRefiner::new(
            prediction.clone(),
            config.bounds.clone(),
            config.optimizer.clone(),
        );
        let mut correction = CorrectionModel::from_config(config);
        correction.load(true);

        info!(
            families = config.families.len(),
            alpha = config.correction.alpha,
            sigma = config.exploration.sigma,
            correction_loaded = correction.is_loaded(),
            "Parameter engine initialized"
        );

        Ok(Self {
            prediction,
            refiner,
            correction,
            clamp: SafetyClamp::new(config.bounds.clone()),
            alpha: config.correction.alpha,
            noise,
            rng,
        })
    }

    pub fn from_config(config: &EngineConfig) -> AoResult<Self> {
        Self::new(config, Arc::new(ModelRegistry::from_config(config)))
    }

    pub fn prediction(&self) -> &PredictionService {
        &self.prediction
    }

    pub fn refiner(&self) -> &LocalRefiner {
        &self.refiner
    }

    pub fn correction(&self) -> &CorrectionModel {
        &self.correction
    }

    pub fn safety(&self) -> &SafetyClamp {
        &self.clamp
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Weight of the bandwidth term in objectives reported by this engine.
    pub fn bw_weight(&self) -> f64 {
        self.refiner.settings().bw_weight
    }

    /// Forces a correction reload regardless of the cache interval.
    pub fn reload_correction(&mut self) -> bool {
        self.correction.load(true);
        self.correction.is_loaded()
    }

    pub fn predict(
        &mut self,
        family: Family,
        target: &TargetPerformance,
        options: ProposalOptions,
    ) -> AoResult<ParamVector> {
        Ok(self.propose(family, target, options)?.params)
    }

    /// Fails only when no base guess can be produced: an unknown family or a
    /// missing inverse surrogate. Every later stage degrades to a no-op.
    pub fn propose(
        &mut self,
        family: Family,
        target: &TargetPerformance,
        options: ProposalOptions,
    ) -> AoResult<Proposal> {
        self.correction.load(false);

        let base = self.prediction.predict_inverse(family, target)?;
        let mut params = base;

        let refinement = if options.use_optimizer {
            let outcome = self.refiner.optimize(family, target, None, Some(base))?;
            if outcome.success {
                params = outcome.params;
            } else {
                debug!(
                    family = %family,
                    reason = outcome.message.as_deref().unwrap_or("unknown"),
                    "Refinement failed, keeping inverse guess"
                );
            }
            Some(outcome)
        } else {
            None
        };

        let correction = if options.apply_correction {
            self.correction
                .apply(family, target, &params, options.observed_error.as_ref())
        } else {
            None
        };
        if let Some(delta) = &correction {
            params = params.add_scaled(delta, self.alpha);
        }

        if options.explore {
            params = self.explore(&params);
        }

        let params = self.clamp.clamp(family, &params);
        debug!(
            family = %family,
            fr_ghz = target.fr_ghz,
            bw_mhz = target.bw_mhz,
            corrected = correction.is_some(),
            ?params,
            "Proposal ready"
        );

        Ok(Proposal {
            family,
            target: *target,
            base,
            refinement,
            correction,
            params,
        })
    }

    /// One deterministic nudge against the observed error, then clamp. Slots
    /// 0 and 1 move against the frequency error, slot 2 against a tenth of the
    /// bandwidth error.
    pub fn refine(
        &self,
        family: Family,
        params: &ParamVector,
        target: &TargetPerformance,
        actual: &Performance,
        step_scale: f64,
    ) -> ParamVector {
        let error = actual.error_from(target);
        let direction = ParamVector::new([-error.fr_ghz, -error.fr_ghz, -0.1 * error.bw_mhz, 0.0, 0.0]);
        self.clamp
            .clamp(family, &params.add_scaled(&direction, step_scale * self.alpha))
    }

    pub fn within_tolerance(
        &self,
        target: &TargetPerformance,
        actual: &Performance,
        tolerance: &Tolerance,
    ) -> bool {
        tolerance.accepts(target, actual)
    }

    pub fn clamp(&self, family: Family, params: &ParamVector) -> ParamVector {
        self.clamp.clamp(family, params)
    }

    fn explore(&mut self, params: &ParamVector) -> ParamVector {
        let noise = self.noise;
        let rng = &mut self.rng;
        params.map(|_, value| value * (1.0 + noise.sample(rng)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use ao_feedback::{feature_columns, CorrectionArtifact};
    use ao_models::{Activation, DenseLayer, Mlp, Normalizer};
    use ao_types::AoError;
    use chrono::Utc;
    use ndarray::{Array1, Array2};

    const BASE: [f64; 5] = [0.024, 0.03, 0.002, 0.0016, 4.4];

    fn target() -> Performance {
        Performance::new(2.4, 100.0)
    }

    fn engine(dir: &std::path::Path) -> ParameterEngine {
        let config = testing::config(dir);
        ParameterEngine::new(&config, testing::registry(&config)).unwrap()
    }

    fn assert_close(actual: &ParamVector, expected: &[f64; 5]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn deterministic_predict_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let first = engine
            .predict(Family::PatchRect, &target(), ProposalOptions::deterministic())
            .unwrap();
        let second = engine
            .predict(Family::PatchRect, &target(), ProposalOptions::deterministic())
            .unwrap();

        assert_eq!(first, second);
        assert_close(&first, &BASE);
    }

    #[test]
    fn unknown_family_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let err = engine
            .predict(Family::Monopole, &target(), ProposalOptions::default())
            .unwrap_err();
        assert!(matches!(err, AoError::UnknownFamily { .. }));
    }

    #[test]
    fn missing_inverse_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let err = engine
            .predict(Family::Dipole, &target(), ProposalOptions::default())
            .unwrap_err();
        assert!(matches!(err, AoError::ModelUnavailable { family: Family::Dipole, .. }));
    }

    #[test]
    fn exploration_is_seeded_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let options = ProposalOptions::default().with_correction(false);
        let mut a = engine(dir.path());
        let mut b = engine(dir.path());

        let pa = a.predict(Family::PatchRect, &target(), options).unwrap();
        let pb = b.predict(Family::PatchRect, &target(), options).unwrap();
        assert_eq!(pa, pb);

        let again = a.predict(Family::PatchRect, &target(), options).unwrap();
        assert_ne!(pa, again);

        let bounds = Family::PatchRect.default_bounds();
        for p in [pa, again] {
            assert!(bounds.contains(&p));
            assert!((p[0] / BASE[0] - 1.0).abs() < 0.2);
        }
    }

    #[test]
    fn correction_is_damped_by_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let config = testing::config(dir.path());

        let columns = feature_columns(false);
        let layer = DenseLayer::new(
            Array2::zeros((columns.len(), 5)),
            Array1::from(vec![0.01, -0.01, 0.0, 0.0, 0.0]),
            Activation::Identity,
        )
        .unwrap();
        CorrectionArtifact {
            model: Mlp::new(vec![layer]).unwrap(),
            input_normalizer: Normalizer::identity(columns.len()),
            output_normalizer: Normalizer::identity(5),
            feature_columns: columns,
            sample_count: 12,
            trained_at: Utc::now(),
        }
        .save(&config.paths.correction_artifact)
        .unwrap();

        let mut engine = ParameterEngine::new(&config, testing::registry(&config)).unwrap();
        assert!(engine.correction().is_loaded());

        let proposal = engine
            .propose(
                Family::PatchRect,
                &target(),
                ProposalOptions::deterministic().with_correction(true),
            )
            .unwrap();

        assert!(proposal.correction.is_some());
        assert_close(&proposal.base, &BASE);
        assert_close(&proposal.params, &[0.027, 0.027, 0.002, 0.0016, 4.4]);
    }

    #[test]
    fn observed_error_reaches_error_feature_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = testing::config(dir.path());

        // delta[0] = -0.01 * err_Fr, nothing else
        let columns = feature_columns(true);
        let mut weights = Array2::zeros((columns.len(), 5));
        weights[[8, 0]] = -0.01;
        let layer = DenseLayer::new(weights, Array1::zeros(5), Activation::Identity).unwrap();
        CorrectionArtifact {
            model: Mlp::new(vec![layer]).unwrap(),
            input_normalizer: Normalizer::identity(columns.len()),
            output_normalizer: Normalizer::identity(5),
            feature_columns: columns,
            sample_count: 12,
            trained_at: Utc::now(),
        }
        .save(&config.paths.correction_artifact)
        .unwrap();

        let mut engine = ParameterEngine::new(&config, testing::registry(&config)).unwrap();
        let options = ProposalOptions::deterministic().with_correction(true);

        let blind = engine.propose(Family::PatchRect, &target(), options).unwrap();
        assert_close(&blind.params, &BASE);

        let informed = engine
            .propose(
                Family::PatchRect,
                &target(),
                options.with_observed_error(Performance::new(0.1, 0.0)),
            )
            .unwrap();
        assert_close(&informed.params, &[0.0237, 0.03, 0.002, 0.0016, 4.4]);
    }

    #[test]
    fn optimizer_stage_keeps_forward_on_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let proposal = engine
            .propose(
                Family::PatchRect,
                &target(),
                ProposalOptions::deterministic().with_optimizer(true),
            )
            .unwrap();

        let outcome = proposal.refinement.unwrap();
        assert!(outcome.success);
        let predicted = engine
            .prediction()
            .predict_forward(Family::PatchRect, &proposal.params)
            .unwrap();
        assert!(predicted.weighted_sq_error(&target(), engine.bw_weight()) < 1e-3);
    }

    #[test]
    fn refine_moves_against_error_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let params = ParamVector::new(BASE);

        let refined = engine.refine(
            Family::PatchRect,
            &params,
            &target(),
            &Performance::new(2.5, 90.0),
            0.1,
        );

        // slots 0-1 shrink by 0.1 * 0.3 * 0.1; slot 2 would grow by 0.03 and hits 4 mm
        assert_close(&refined, &[0.021, 0.027, 0.004, 0.0016, 4.4]);
    }

    #[test]
    fn within_tolerance_is_inclusive_per_axis() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let tolerance = Tolerance::new(0.02, 5.0);

        assert!(engine.within_tolerance(&target(), &Performance::new(2.41, 98.0), &tolerance));
        assert!(!engine.within_tolerance(&target(), &Performance::new(2.45, 98.0), &tolerance));
        assert!(!engine.within_tolerance(&target(), &Performance::new(2.41, 106.0), &tolerance));
    }

    #[test]
    fn clamp_sanitizes_non_finite() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        let out = engine.clamp(
            Family::PatchRect,
            &ParamVector::new([f64::NAN, f64::INFINITY, -1.0, 0.0016, f64::NEG_INFINITY]),
        );
        assert_close(&out, &[0.008, 0.008, 0.0005, 0.0016, 2.0]);
    }
}
