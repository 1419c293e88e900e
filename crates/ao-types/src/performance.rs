use serde::{Deserialize, Serialize};

/// Resonant frequency (GHz) and bandwidth (MHz).
///
/// Used both for caller-supplied targets and for surrogate predictions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Performance {
    pub fr_ghz: f64,
    pub bw_mhz: f64,
}

/// Caller-supplied design goal. Never derived.
pub type TargetPerformance = Performance;

impl Performance {
    pub fn new(fr_ghz: f64, bw_mhz: f64) -> Self {
        Self { fr_ghz, bw_mhz }
    }

    /// Signed error `self - target`.
    pub fn error_from(&self, target: &Performance) -> Performance {
        Performance {
            fr_ghz: self.fr_ghz - target.fr_ghz,
            bw_mhz: self.bw_mhz - target.bw_mhz,
        }
    }

    /// `(Fr error)^2 + bw_weight * (BW error)^2`
    pub fn weighted_sq_error(&self, target: &Performance, bw_weight: f64) -> f64 {
        let err = self.error_from(target);
        err.fr_ghz.powi(2) + bw_weight * err.bw_mhz.powi(2)
    }

    pub fn is_finite(&self) -> bool {
        self.fr_ghz.is_finite() && self.bw_mhz.is_finite()
    }
}

/// Reading returned by the external evaluator after a real trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedPerformance {
    pub fr_ghz: f64,
    pub bw_mhz: f64,
    /// Minimum reflection level (S11) in dB.
    pub s11_db: f64,
}

impl ObservedPerformance {
    pub fn new(fr_ghz: f64, bw_mhz: f64, s11_db: f64) -> Self {
        Self {
            fr_ghz,
            bw_mhz,
            s11_db,
        }
    }

    pub fn performance(&self) -> Performance {
        Performance::new(self.fr_ghz, self.bw_mhz)
    }
}

/// Absolute acceptance window for a goal-seeking loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub fr_ghz: f64,
    pub bw_mhz: f64,
}

impl Tolerance {
    pub fn new(fr_ghz: f64, bw_mhz: f64) -> Self {
        Self { fr_ghz, bw_mhz }
    }

    /// True iff both absolute errors are within tolerance.
    pub fn accepts(&self, target: &Performance, actual: &Performance) -> bool {
        (actual.fr_ghz - target.fr_ghz).abs() <= self.fr_ghz
            && (actual.bw_mhz - target.bw_mhz).abs() <= self.bw_mhz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_accepts_within_both_windows() {
        let target = Performance::new(2.4, 100.0);
        let tol = Tolerance::new(0.02, 5.0);

        assert!(tol.accepts(&target, &Performance::new(2.41, 98.0)));
        assert!(!tol.accepts(&target, &Performance::new(2.45, 98.0)));
        assert!(!tol.accepts(&target, &Performance::new(2.41, 90.0)));
    }

    #[test]
    fn weighted_error_matches_objective_shape() {
        let target = Performance::new(2.4, 100.0);
        let predicted = Performance::new(2.5, 110.0);
        let value = predicted.weighted_sq_error(&target, 0.001);
        assert!((value - (0.01 + 0.1)).abs() < 1e-12);
    }
}
