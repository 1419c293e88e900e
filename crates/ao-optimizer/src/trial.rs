//! Goal-seek run tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ao_types::{Family, ObservedPerformance, ParamVector, TargetPerformance, Tolerance};

/// Unique goal-seek run identifier.
pub type SeekId = Uuid;

/// Lifecycle state for a goal-seek run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeekState {
    Pending,
    Running,
    /// Last evaluation fell within tolerance.
    Converged,
    /// Iteration budget spent without reaching tolerance.
    Exhausted,
    Failed,
}

/// One evaluate-and-compare step of a goal-seek run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekIteration {
    pub iteration: usize,
    pub params: ParamVector,
    pub observed: ObservedPerformance,
    /// Same weighting as the local refinement objective, on the observed values.
    pub objective: f64,
    pub within_tolerance: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl SeekIteration {
    pub fn new(
        iteration: usize,
        params: ParamVector,
        observed: ObservedPerformance,
        target: &TargetPerformance,
        tolerance: &Tolerance,
        bw_weight: f64,
    ) -> Self {
        let actual = observed.performance();
        Self {
            iteration,
            params,
            observed,
            objective: actual.weighted_sq_error(target, bw_weight),
            within_tolerance: tolerance.accepts(target, &actual),
            evaluated_at: Utc::now(),
        }
    }
}

/// Aggregate status of a goal-seek run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekStatus {
    pub id: SeekId,
    pub family: Family,
    pub target: TargetPerformance,
    pub tolerance: Tolerance,
    pub max_iterations: usize,
    pub state: SeekState,
    pub iterations: Vec<SeekIteration>,
    /// Index into `iterations` of the lowest objective seen.
    pub best_iteration: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SeekStatus {
    pub fn new(
        family: Family,
        target: TargetPerformance,
        tolerance: Tolerance,
        max_iterations: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            family,
            target,
            tolerance,
            max_iterations,
            state: SeekState::Pending,
            iterations: Vec::new(),
            best_iteration: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = SeekState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_converged(&mut self) {
        self.state = SeekState::Converged;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_exhausted(&mut self) {
        self.state = SeekState::Exhausted;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = SeekState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Appends `iteration` and updates the best index if it improves on it.
    pub fn record(&mut self, iteration: SeekIteration) {
        let improves = match self.best() {
            None => true,
            Some(best) => iteration.objective < best.objective,
        };
        self.iterations.push(iteration);
        if improves {
            self.best_iteration = Some(self.iterations.len() - 1);
        }
    }

    pub fn best(&self) -> Option<&SeekIteration> {
        self.best_iteration.and_then(|i| self.iterations.get(i))
    }

    pub fn last(&self) -> Option<&SeekIteration> {
        self.iterations.last()
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SeekState::Converged | SeekState::Exhausted | SeekState::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_types::Performance;

    fn status() -> SeekStatus {
        SeekStatus::new(
            Family::PatchRect,
            Performance::new(2.4, 100.0),
            Tolerance::new(0.02, 5.0),
            10,
        )
    }

    fn iteration(status: &SeekStatus, n: usize, fr: f64, bw: f64) -> SeekIteration {
        SeekIteration::new(
            n,
            ParamVector::zeros(),
            ObservedPerformance::new(fr, bw, -15.0),
            &status.target,
            &status.tolerance,
            0.001,
        )
    }

    #[test]
    fn lifecycle() {
        let mut status = status();
        assert_eq!(status.state, SeekState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, SeekState::Running);
        assert!(!status.is_finished());

        status.mark_converged();
        assert!(status.is_finished());
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn best_iteration_tracks_lowest_objective() {
        let mut status = status();

        let first = iteration(&status, 0, 2.6, 120.0);
        status.record(first);
        assert_eq!(status.best_iteration, Some(0));

        let better = iteration(&status, 1, 2.45, 104.0);
        status.record(better);
        assert_eq!(status.best_iteration, Some(1));

        // worse result should not replace
        let worse = iteration(&status, 2, 2.9, 60.0);
        status.record(worse);
        assert_eq!(status.best_iteration, Some(1));
        assert_eq!(status.best().unwrap().iteration, 1);
        assert_eq!(status.last().unwrap().iteration, 2);
    }

    #[test]
    fn iteration_applies_tolerance() {
        let status = status();
        assert!(iteration(&status, 0, 2.41, 98.0).within_tolerance);
        assert!(!iteration(&status, 0, 2.45, 98.0).within_tolerance);
    }

    #[test]
    fn status_survives_json() {
        let mut status = status();
        status.mark_running();
        let first = iteration(&status, 0, 2.45, 104.0);
        status.record(first);
        status.mark_exhausted();

        let json = serde_json::to_string(&status).unwrap();
        let back: SeekStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn failure_records_error() {
        let mut status = status();
        status.mark_running();
        status.mark_failed("simulator crashed".into());
        assert_eq!(status.state, SeekState::Failed);
        assert_eq!(status.error.as_deref(), Some("simulator crashed"));
    }
}
