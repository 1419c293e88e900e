//! One sequential propose → evaluate → log → retrain step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use ao_feedback::{CorrectionRetrainer, FeedbackRecord, FeedbackStore};
use ao_types::{AoError, AoResult, EngineConfig, Family, ObservedPerformance, ParamVector, Performance, TargetPerformance};

use crate::engine::{ParameterEngine, Proposal, ProposalOptions};
use crate::evaluator::{EvaluationError, EvaluationRequest, Evaluator, Materials};

/// Why a cycle produced no feedback row.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Engine(#[from] AoError),
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRequest {
    pub family: Family,
    pub target: TargetPerformance,
    pub materials: Materials,
}

impl CycleRequest {
    pub fn new(family: Family, target: TargetPerformance) -> Self {
        Self {
            family,
            target,
            materials: Materials::default(),
        }
    }

    pub fn with_materials(mut self, materials: Materials) -> Self {
        self.materials = materials;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub id: Uuid,
    pub request: CycleRequest,
    pub proposal: Proposal,
    pub observed: ObservedPerformance,
    /// `actual - target`.
    pub error: Performance,
    pub retrained: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Owns the engine, the evaluator and the feedback sinks for a sequential
/// design session.
#[derive(Debug)]
pub struct DesignCycle<E> {
    engine: ParameterEngine,
    evaluator: E,
    store: FeedbackStore,
    retrainer: CorrectionRetrainer,
    options: ProposalOptions,
    retrain_after_cycle: bool,
}

impl<E: Evaluator> DesignCycle<E> {
    pub fn new(
        engine: ParameterEngine,
        evaluator: E,
        store: FeedbackStore,
        retrainer: CorrectionRetrainer,
    ) -> Self {
        Self {
            engine,
            evaluator,
            store,
            retrainer,
            options: ProposalOptions::default(),
            retrain_after_cycle: true,
        }
    }

    /// The retrainer shares the engine's surrogates.
    pub fn from_config(config: &EngineConfig, engine: ParameterEngine, evaluator: E) -> Self {
        let retrainer = CorrectionRetrainer::from_config(config, engine.prediction().clone());
        Self::new(
            engine,
            evaluator,
            FeedbackStore::new(config.paths.feedback_csv.clone()),
            retrainer,
        )
    }

    pub fn with_options(mut self, options: ProposalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retrain(mut self, retrain_after_cycle: bool) -> Self {
        self.retrain_after_cycle = retrain_after_cycle;
        self
    }

    pub fn options(&self) -> ProposalOptions {
        self.options
    }

    pub fn engine(&self) -> &ParameterEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ParameterEngine {
        &mut self.engine
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    pub fn retrainer(&self) -> &CorrectionRetrainer {
        &self.retrainer
    }

    pub fn evaluate(
        &mut self,
        family: Family,
        target: &TargetPerformance,
        params: &ParamVector,
        materials: &Materials,
    ) -> Result<ObservedPerformance, EvaluationError> {
        let request = EvaluationRequest {
            family,
            params: *params,
            target: *target,
            materials: materials.clone(),
        };
        self.evaluator.evaluate(&request)
    }

    pub fn log(
        &self,
        family: Family,
        target: &TargetPerformance,
        params: &ParamVector,
        observed: &ObservedPerformance,
    ) -> AoResult<()> {
        self.store
            .append(&FeedbackRecord::new(family, target, params, observed))
    }

    /// Evaluates `params` and appends the trial. Nothing is logged on failure.
    pub fn evaluate_and_log(
        &mut self,
        family: Family,
        target: &TargetPerformance,
        params: &ParamVector,
        materials: &Materials,
    ) -> Result<ObservedPerformance, CycleError> {
        let observed = self.evaluate(family, target, params, materials)?;
        self.log(family, target, params, &observed)?;
        Ok(observed)
    }

    pub fn run_cycle(&mut self, request: &CycleRequest) -> Result<CycleReport, CycleError> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            cycle_id = %id,
            family = %request.family,
            fr_ghz = request.target.fr_ghz,
            bw_mhz = request.target.bw_mhz,
            substrate = %request.materials.substrate,
            conductor = %request.materials.conductor,
            "Starting design cycle"
        );

        let proposal = self
            .engine
            .propose(request.family, &request.target, self.options)?;

        let observed = match self.evaluate_and_log(
            request.family,
            &request.target,
            &proposal.params,
            &request.materials,
        ) {
            Ok(observed) => observed,
            Err(e) => {
                warn!(cycle_id = %id, evaluator = self.evaluator.name(), error = %e, "Cycle aborted");
                return Err(e);
            }
        };

        let retrained = self.retrain_after_cycle && self.retrainer.quick_retrain();
        let error = observed.performance().error_from(&request.target);

        info!(
            cycle_id = %id,
            actual_fr_ghz = observed.fr_ghz,
            actual_bw_mhz = observed.bw_mhz,
            s11_db = observed.s11_db,
            error_fr_ghz = error.fr_ghz,
            retrained,
            "Design cycle complete"
        );

        Ok(CycleReport {
            id,
            request: request.clone(),
            proposal,
            observed,
            error,
            retrained,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, LinearEvaluator};
    use ao_types::RetrainSettings;

    fn cycle(dir: &std::path::Path, evaluator: LinearEvaluator) -> DesignCycle<LinearEvaluator> {
        let config = testing::config(dir).with_retrain(RetrainSettings {
            min_samples: 3,
            min_new_samples: 2,
            hidden_layers: vec![4],
            max_epochs: 20,
            ..RetrainSettings::default()
        });
        let engine = ParameterEngine::new(&config, testing::registry(&config)).unwrap();
        DesignCycle::from_config(&config, engine, evaluator)
    }

    #[test]
    fn cycle_logs_one_row_per_trial() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(
            dir.path(),
            LinearEvaluator {
                fr_offset: 0.05,
                ..Default::default()
            },
        )
        .with_retrain(false);
        let request = CycleRequest::new(Family::PatchRect, Performance::new(2.4, 100.0));

        let report = cycle.run_cycle(&request).unwrap();
        assert!(!report.retrained);
        assert!(report.finished_at >= report.started_at);
        assert_eq!(report.proposal.params, cycle.engine().clamp(Family::PatchRect, &report.proposal.params));

        cycle.run_cycle(&request).unwrap();
        let rows = cycle.store().load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].params(), report.proposal.params);
        assert!((rows[0].actual_fr_ghz - report.observed.fr_ghz).abs() < 1e-12);
    }

    #[test]
    fn evaluation_failure_is_surfaced_and_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(
            dir.path(),
            LinearEvaluator {
                fail: true,
                ..Default::default()
            },
        );

        let err = cycle
            .run_cycle(&CycleRequest::new(Family::PatchRect, Performance::new(2.4, 100.0)))
            .unwrap_err();
        assert!(matches!(err, CycleError::Evaluation(_)));
        assert_eq!(cycle.evaluator().calls, 1);
        assert!(!cycle.store().exists());
    }

    #[test]
    fn unknown_family_never_reaches_evaluator() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(dir.path(), LinearEvaluator::default());

        let err = cycle
            .run_cycle(&CycleRequest::new(Family::Slot, Performance::new(2.4, 100.0)))
            .unwrap_err();
        assert!(matches!(err, CycleError::Engine(AoError::UnknownFamily { .. })));
        assert_eq!(cycle.evaluator().calls, 0);
    }

    #[test]
    fn retrain_fires_once_enough_rows_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(
            dir.path(),
            LinearEvaluator {
                fr_offset: 0.05,
                ..Default::default()
            },
        );
        let request = CycleRequest::new(Family::PatchRect, Performance::new(2.4, 100.0));

        let retrained: Vec<bool> = (0..5)
            .map(|_| cycle.run_cycle(&request).unwrap().retrained)
            .collect();
        assert_eq!(retrained, vec![false, false, true, false, true]);
    }
}
