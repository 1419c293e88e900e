use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

use crate::errors::{AoError, AoResult};

/// Number of physical parameter slots in every design vector.
pub const PARAM_COUNT: usize = 5;

/// Ordered design parameters `[primary, secondary, feed_width, substrate_h, eps_r]`.
///
/// Lengths are in metres. Slot meaning per family is given by
/// [`crate::Family::slot_roles`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamVector([f64; PARAM_COUNT]);

impl ParamVector {
    pub const fn new(values: [f64; PARAM_COUNT]) -> Self {
        Self(values)
    }

    pub const fn zeros() -> Self {
        Self([0.0; PARAM_COUNT])
    }

    pub fn as_array(&self) -> &[f64; PARAM_COUNT] {
        &self.0
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// `self + scale * delta`, slot-wise.
    pub fn add_scaled(&self, delta: &ParamVector, scale: f64) -> ParamVector {
        let mut out = self.0;
        for (value, d) in out.iter_mut().zip(delta.0.iter()) {
            *value += scale * d;
        }
        Self(out)
    }

    pub fn map(&self, mut f: impl FnMut(usize, f64) -> f64) -> ParamVector {
        let mut out = self.0;
        for (i, value) in out.iter_mut().enumerate() {
            *value = f(i, *value);
        }
        Self(out)
    }

    pub fn substrate_height(&self) -> f64 {
        self.0[3]
    }

    pub fn permittivity(&self) -> f64 {
        self.0[4]
    }
}

impl From<[f64; PARAM_COUNT]> for ParamVector {
    fn from(values: [f64; PARAM_COUNT]) -> Self {
        Self(values)
    }
}

impl TryFrom<&[f64]> for ParamVector {
    type Error = AoError;

    fn try_from(values: &[f64]) -> AoResult<Self> {
        let array: [f64; PARAM_COUNT] = values.try_into().map_err(|_| {
            AoError::Validation(format!(
                "parameter vector must have {PARAM_COUNT} slots, got {}",
                values.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl Index<usize> for ParamVector {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for ParamVector {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_slice_checks_length() {
        let ok = ParamVector::try_from([1.0, 2.0, 3.0, 4.0, 5.0].as_slice()).unwrap();
        assert_eq!(ok[4], 5.0);

        let err = ParamVector::try_from([1.0, 2.0].as_slice()).unwrap_err();
        assert!(err.to_string().contains("5 slots"));
    }

    #[test]
    fn add_scaled_is_slot_wise() {
        let base = ParamVector::new([1.0, 1.0, 1.0, 1.0, 1.0]);
        let delta = ParamVector::new([1.0, -1.0, 0.0, 2.0, 0.5]);
        let out = base.add_scaled(&delta, 0.5);
        assert_eq!(out.as_array(), &[1.5, 0.5, 1.0, 2.0, 1.25]);
    }

    #[test]
    fn serializes_as_plain_array() {
        let params = ParamVector::new([0.01, 0.02, 0.001, 0.0016, 4.4]);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, "[0.01,0.02,0.001,0.0016,4.4]");
    }
}
