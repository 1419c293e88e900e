//! Antenna parameter engine.
//!
//! [`ParameterEngine`] turns a target resonance and bandwidth into a safe
//! parameter proposal. [`DesignCycle`] wraps it with an [`Evaluator`] and the
//! feedback sinks, and [`GoalSeeker`] repeats cycles until the observed
//! performance is within tolerance.

pub mod analytic;
pub mod cycle;
pub mod engine;
pub mod evaluator;
pub mod goal_seek;
pub mod safety;

#[cfg(test)]
mod testing;

pub use analytic::AnalyticEvaluator;
pub use cycle::{CycleError, CycleReport, CycleRequest, DesignCycle};
pub use engine::{ParameterEngine, Proposal, ProposalOptions};
pub use evaluator::{EvaluationError, EvaluationRequest, Evaluator, Materials, CONDUCTORS, SUBSTRATES};
pub use goal_seek::{GoalSeeker, SeekSettings};
pub use safety::SafetyClamp;
