//! Contract with the external evaluator (an EM solver in production).

use serde::{Deserialize, Serialize};

use ao_types::{Family, ObservedPerformance, ParamVector, TargetPerformance};

/// Substrate materials the autorun loop samples from.
pub const SUBSTRATES: [&str; 3] = [
    "FR-4 (lossy)",
    "Rogers RT-duroid 5880 (lossy)",
    "Taconic TLY-3 (lossy)",
];

/// Conductor materials the autorun loop samples from.
pub const CONDUCTORS: [&str; 3] = ["Copper (annealed)", "Aluminum", "Silver"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Materials {
    pub substrate: String,
    pub conductor: String,
}

impl Materials {
    pub fn new(substrate: impl Into<String>, conductor: impl Into<String>) -> Self {
        Self {
            substrate: substrate.into(),
            conductor: conductor.into(),
        }
    }
}

impl Default for Materials {
    fn default() -> Self {
        Self::new(SUBSTRATES[0], CONDUCTORS[0])
    }
}

/// Everything an evaluator needs to build and solve one design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub family: Family,
    pub params: ParamVector,
    /// Centre of the frequency sweep.
    pub target: TargetPerformance,
    pub materials: Materials,
}

/// Errors surfaced by an evaluator.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("design rejected: {reason}")]
    Rejected { reason: String },
    #[error("no resonance found in sweep around {fr_ghz} GHz")]
    NoResonance { fr_ghz: f64 },
    #[error("evaluator failure: {message}")]
    Failed { message: String },
    #[error("evaluator I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A slow, blocking, fallible measurement of one design.
pub trait Evaluator {
    fn name(&self) -> &str;

    fn evaluate(&mut self, request: &EvaluationRequest) -> Result<ObservedPerformance, EvaluationError>;
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn evaluate(&mut self, request: &EvaluationRequest) -> Result<ObservedPerformance, EvaluationError> {
        (**self).evaluate(request)
    }
}
