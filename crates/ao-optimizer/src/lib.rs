//! # ao-optimizer
//!
//! Bounded local refinement for the antenna parameter engine.
//!
//! Provides a derivative-free Powell minimizer over a box, the local refiner
//! that sharpens inverse-model guesses against the forward surrogate, and
//! run tracking for goal-seeking loops.

mod powell;
mod refinement;
mod trial;

pub use powell::{minimize, PowellError, PowellOptions, PowellResult, Termination};
pub use refinement::{LocalRefiner, RefinementOutcome};
pub use trial::{SeekId, SeekIteration, SeekState, SeekStatus};
