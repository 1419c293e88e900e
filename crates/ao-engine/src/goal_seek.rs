//! Iterative goal seeking: simulate, compare, nudge, repeat.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ao_optimizer::{SeekIteration, SeekStatus};
use ao_types::{Family, TargetPerformance, Tolerance};

use crate::cycle::DesignCycle;
use crate::engine::ProposalOptions;
use crate::evaluator::{Evaluator, Materials};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekSettings {
    /// Multiplies the engine's alpha on every refine step.
    pub step_scale: f64,
    /// Options for the initial proposal only.
    pub options: ProposalOptions,
    /// Append every evaluated iteration to the feedback store.
    pub log_feedback: bool,
}

impl Default for SeekSettings {
    fn default() -> Self {
        Self {
            step_scale: 1.0,
            options: ProposalOptions::default(),
            log_feedback: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoalSeeker {
    settings: SeekSettings,
}

impl GoalSeeker {
    pub fn new(settings: SeekSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SeekSettings {
        &self.settings
    }

    /// Runs until an evaluation lands within `tolerance` or `max_iterations`
    /// evaluations have been spent. Never retrains; failures end the run in
    /// [`ao_optimizer::SeekState::Failed`].
    pub fn seek<E: Evaluator>(
        &self,
        cycle: &mut DesignCycle<E>,
        family: Family,
        target: TargetPerformance,
        tolerance: Tolerance,
        max_iterations: usize,
        materials: &Materials,
    ) -> SeekStatus {
        let mut status = SeekStatus::new(family, target, tolerance, max_iterations);
        status.mark_running();
        info!(
            seek_id = %status.id,
            family = %family,
            fr_ghz = target.fr_ghz,
            bw_mhz = target.bw_mhz,
            max_iterations,
            "Goal seek started"
        );

        let mut params = match cycle.engine_mut().predict(family, &target, self.settings.options) {
            Ok(params) => params,
            Err(e) => {
                warn!(seek_id = %status.id, error = %e, "Initial proposal failed");
                status.mark_failed(e.to_string());
                return status;
            }
        };
        let bw_weight = cycle.engine().bw_weight();

        for iteration in 0..max_iterations {
            let observed = if self.settings.log_feedback {
                cycle
                    .evaluate_and_log(family, &target, &params, materials)
                    .map_err(|e| e.to_string())
            } else {
                cycle
                    .evaluate(family, &target, &params, materials)
                    .map_err(|e| e.to_string())
            };
            let observed = match observed {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(seek_id = %status.id, iteration, error = %e, "Goal seek evaluation failed");
                    status.mark_failed(e);
                    return status;
                }
            };

            let record = SeekIteration::new(iteration, params, observed, &target, &tolerance, bw_weight);
            let accepted = record.within_tolerance;
            status.record(record);

            if accepted {
                status.mark_converged();
                info!(seek_id = %status.id, iterations = iteration + 1, "Goal seek converged");
                return status;
            }

            params = cycle.engine().refine(
                family,
                &params,
                &target,
                &observed.performance(),
                self.settings.step_scale,
            );
        }

        status.mark_exhausted();
        info!(
            seek_id = %status.id,
            best_objective = status.best().map(|b| b.objective),
            "Goal seek exhausted"
        );
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ParameterEngine;
    use crate::testing::{self, LinearEvaluator};
    use ao_optimizer::SeekState;
    use ao_types::Performance;

    fn cycle(dir: &std::path::Path, evaluator: LinearEvaluator) -> DesignCycle<LinearEvaluator> {
        let config = testing::config(dir);
        let engine = ParameterEngine::new(&config, testing::registry(&config)).unwrap();
        DesignCycle::from_config(&config, engine, evaluator)
    }

    fn seeker() -> GoalSeeker {
        GoalSeeker::new(SeekSettings {
            step_scale: 0.02,
            options: ProposalOptions::deterministic(),
            log_feedback: true,
        })
    }

    fn offset(fr_offset: f64) -> LinearEvaluator {
        LinearEvaluator {
            fr_offset,
            ..Default::default()
        }
    }

    #[test]
    fn converges_on_systematic_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(dir.path(), offset(0.05));

        let status = seeker().seek(
            &mut cycle,
            Family::PatchRect,
            Performance::new(2.4, 100.0),
            Tolerance::new(0.01, 5.0),
            10,
            &Materials::default(),
        );

        // errors 0.05, 0.02, 0.008
        assert_eq!(status.state, SeekState::Converged);
        assert_eq!(status.iterations.len(), 3);
        assert!(status.last().unwrap().within_tolerance);
        assert_eq!(status.best_iteration, Some(2));
        assert_eq!(cycle.store().count().unwrap(), 3);
    }

    #[test]
    fn exhausts_iteration_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(dir.path(), offset(0.05));

        let status = seeker().seek(
            &mut cycle,
            Family::PatchRect,
            Performance::new(2.4, 100.0),
            Tolerance::new(1e-6, 5.0),
            2,
            &Materials::default(),
        );

        assert_eq!(status.state, SeekState::Exhausted);
        assert_eq!(status.iterations.len(), 2);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn unknown_family_fails_without_evaluating() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(dir.path(), offset(0.0));

        let status = seeker().seek(
            &mut cycle,
            Family::Vivaldi,
            Performance::new(2.4, 100.0),
            Tolerance::new(0.01, 5.0),
            5,
            &Materials::default(),
        );

        assert_eq!(status.state, SeekState::Failed);
        assert!(status.error.unwrap().contains("vivaldi"));
        assert_eq!(cycle.evaluator().calls, 0);
    }

    #[test]
    fn evaluator_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = cycle(
            dir.path(),
            LinearEvaluator {
                fail: true,
                ..Default::default()
            },
        );

        let status = seeker().seek(
            &mut cycle,
            Family::PatchRect,
            Performance::new(2.4, 100.0),
            Tolerance::new(0.01, 5.0),
            5,
            &Materials::default(),
        );

        assert_eq!(status.state, SeekState::Failed);
        assert!(status.iterations.is_empty());
        assert!(!cycle.store().exists());
    }
}
