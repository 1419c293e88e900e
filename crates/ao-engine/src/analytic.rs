//! Closed-form stand-in for the EM solver. Uses the transmission-line cavity
//! model for patches and half/quarter-wave estimates for everything else.
//! Good for dry runs and tests, not for design sign-off.

use std::f64::consts::PI;
use tracing::debug;

use ao_types::{Family, ObservedPerformance, ParamVector, Performance};

use crate::evaluator::{EvaluationError, EvaluationRequest, Evaluator};

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// First root of J1', the TM11 mode of a circular patch.
const TM11_ROOT: f64 = 1.8412;

/// Deepest reflection reported at perfect tuning, in dB.
const MATCHED_S11_DB: f64 = -30.0;
const UNMATCHED_S11_DB: f64 = -3.0;

pub fn effective_permittivity(eps_r: f64, width: f64, h: f64) -> f64 {
    (eps_r + 1.0) / 2.0 + (eps_r - 1.0) / 2.0 * (1.0 + 12.0 * h / width).powf(-0.5)
}

/// Hammerstad fringing length added to each radiating edge.
pub fn fringing_extension(eps_eff: f64, width: f64, h: f64) -> f64 {
    0.412 * h * ((eps_eff + 0.3) * (width / h + 0.264)) / ((eps_eff - 0.258) * (width / h + 0.8))
}

/// `BW ≈ 1.5 h/W sqrt(eps_r) f`, in MHz for `fr_ghz` in GHz.
pub fn patch_bandwidth_mhz(fr_ghz: f64, width: f64, h: f64, eps_r: f64, feed_factor: f64) -> f64 {
    1.5 * h / width * eps_r.sqrt() * fr_ghz * 1e3 * feed_factor
}

fn rect_patch_resonance(width: f64, length: f64, h: f64, eps_r: f64) -> f64 {
    let eps_eff = effective_permittivity(eps_r, width, h);
    let delta_l = fringing_extension(eps_eff, width, h);
    SPEED_OF_LIGHT / (2.0 * (length + 2.0 * delta_l) * eps_eff.sqrt()) / 1e9
}

fn circ_patch_resonance(radius: f64, h: f64, eps_r: f64) -> f64 {
    let ratio = PI * radius / (2.0 * h);
    let a_eff = radius * (1.0 + 2.0 * h / (PI * radius * eps_r) * (ratio.ln() + 1.7726)).sqrt();
    TM11_ROOT * SPEED_OF_LIGHT / (2.0 * PI * a_eff * eps_r.sqrt()) / 1e9
}

/// `c / (k * length * sqrt(eps_eff))` in GHz with the printed-line average permittivity.
fn wire_resonance(k: f64, length: f64, eps_r: f64) -> f64 {
    let eps_eff = (eps_r + 1.0) / 2.0;
    SPEED_OF_LIGHT / (k * length * eps_eff.sqrt()) / 1e9
}

/// Analytic evaluator with an optional fixed offset, which stands in for the
/// systematic surrogate error the correction model is meant to learn.
#[derive(Debug, Clone, Default)]
pub struct AnalyticEvaluator {
    bias: Performance,
    evaluations: usize,
}

impl AnalyticEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bias(mut self, bias: Performance) -> Self {
        self.bias = bias;
        self
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Resonance and bandwidth of `params` before any bias.
    pub fn resonance(family: Family, params: &ParamVector) -> Result<Performance, EvaluationError> {
        let primary = params[0];
        let h = params.substrate_height();
        let eps_r = params.permittivity();

        if !params.is_finite() || primary <= 0.0 || h <= 0.0 || eps_r < 1.0 {
            return Err(EvaluationError::Rejected {
                reason: format!("non-physical parameters for {family}: {params:?}"),
            });
        }

        let performance = match family {
            Family::PatchRect | Family::PatchMeander | Family::PatchUSlot | Family::PatchEShape => {
                let length = params[1];
                if length <= 0.0 {
                    return Err(EvaluationError::Rejected {
                        reason: format!("patch length must be positive, got {length}"),
                    });
                }
                let feed_factor = match family {
                    Family::PatchMeander => 1.08,
                    Family::PatchUSlot | Family::PatchEShape => 1.1,
                    _ => 1.0,
                };
                let fr = rect_patch_resonance(primary, length, h, eps_r);
                Performance::new(fr, patch_bandwidth_mhz(fr, primary, h, eps_r, feed_factor))
            }
            Family::PatchCirc => {
                let fr = circ_patch_resonance(primary, h, eps_r);
                Performance::new(fr, patch_bandwidth_mhz(fr, 2.0 * primary, h, eps_r, 1.02))
            }
            Family::Monopole => {
                let fr = wire_resonance(4.0, primary, eps_r);
                Performance::new(fr, 0.03 * fr * 1e3)
            }
            Family::Dipole => {
                let fr = wire_resonance(2.0, primary, eps_r);
                Performance::new(fr, 0.02 * fr * 1e3)
            }
            Family::CpwUwb => {
                let fr = wire_resonance(2.0, primary, eps_r);
                Performance::new(fr, 0.25 * fr * 1e3)
            }
            Family::Slot => {
                let fr = wire_resonance(2.0, primary, eps_r);
                Performance::new(fr, 0.08 * fr * 1e3)
            }
            Family::Vivaldi => {
                let fr = wire_resonance(2.0, primary, eps_r);
                Performance::new(fr, 0.4 * fr * 1e3)
            }
        };

        Ok(performance)
    }

    /// Gaussian notch centred on the target: deep when tuned, shallow when detuned
    /// by more than a bandwidth.
    pub fn reflection_db(actual: &Performance, target_fr_ghz: f64) -> f64 {
        let detuning = (actual.fr_ghz - target_fr_ghz).abs() * 1e3 / actual.bw_mhz.max(1e-6);
        UNMATCHED_S11_DB + (MATCHED_S11_DB - UNMATCHED_S11_DB) * (-detuning * detuning).exp()
    }
}

impl Evaluator for AnalyticEvaluator {
    fn name(&self) -> &str {
        "analytic"
    }

    fn evaluate(&mut self, request: &EvaluationRequest) -> Result<ObservedPerformance, EvaluationError> {
        let raw = Self::resonance(request.family, &request.params)?;
        let actual = Performance::new(raw.fr_ghz + self.bias.fr_ghz, raw.bw_mhz + self.bias.bw_mhz);
        if !actual.is_finite() || actual.fr_ghz <= 0.0 || actual.bw_mhz <= 0.0 {
            return Err(EvaluationError::NoResonance {
                fr_ghz: request.target.fr_ghz,
            });
        }
        self.evaluations += 1;

        let s11_db = Self::reflection_db(&actual, request.target.fr_ghz);
        debug!(
            family = %request.family,
            fr_ghz = actual.fr_ghz,
            bw_mhz = actual.bw_mhz,
            s11_db,
            "Analytic evaluation"
        );
        Ok(ObservedPerformance::new(actual.fr_ghz, actual.bw_mhz, s11_db))
    }
}
