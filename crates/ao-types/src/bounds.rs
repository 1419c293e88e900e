use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Index;

use crate::errors::{AoError, AoResult};
use crate::family::Family;
use crate::params::{ParamVector, PARAM_COUNT};

/// Closed interval `[lower, upper]` for one parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Zero-width interval: the slot is held at `value` and never optimized.
    pub const fn fixed(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn is_fixed(&self) -> bool {
        self.lower == self.upper
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Never panics; a NaN input lands on `lower`.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    pub fn validate(&self) -> AoResult<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Err(AoError::Validation(format!(
                "bound [{}, {}] is not finite",
                self.lower, self.upper
            )));
        }
        if self.lower > self.upper {
            return Err(AoError::Validation(format!(
                "bound lower {} exceeds upper {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Per-slot bounds for one family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FamilyBounds([Bound; PARAM_COUNT]);

impl FamilyBounds {
    pub const fn new(bounds: [Bound; PARAM_COUNT]) -> Self {
        Self(bounds)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bound> {
        self.0.iter()
    }

    pub fn as_array(&self) -> &[Bound; PARAM_COUNT] {
        &self.0
    }

    /// Indices of slots with a non-zero-width interval.
    pub fn free_slots(&self) -> Vec<usize> {
        (0..PARAM_COUNT).filter(|&i| !self.0[i].is_fixed()).collect()
    }

    pub fn contains(&self, params: &ParamVector) -> bool {
        self.0
            .iter()
            .zip(params.iter())
            .all(|(bound, value)| bound.contains(*value))
    }

    /// Slot-wise clamp. Non-finite values are replaced by zero first.
    pub fn clamp(&self, params: &ParamVector) -> ParamVector {
        let mut out = [0.0; PARAM_COUNT];
        for (i, bound) in self.0.iter().enumerate() {
            let value = if params[i].is_finite() { params[i] } else { 0.0 };
            out[i] = bound.clamp(value);
        }
        ParamVector::new(out)
    }

    pub fn validate(&self) -> AoResult<()> {
        self.0.iter().try_for_each(Bound::validate)
    }
}

impl Index<usize> for FamilyBounds {
    type Output = Bound;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

/// Bounds lookup: per-family overrides on top of [`Family::default_bounds`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundsTable {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    overrides: HashMap<Family, FamilyBounds>,
}

impl BoundsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, family: Family, bounds: FamilyBounds) -> Self {
        self.overrides.insert(family, bounds);
        self
    }

    pub fn for_family(&self, family: Family) -> FamilyBounds {
        self.overrides
            .get(&family)
            .copied()
            .unwrap_or_else(|| family.default_bounds())
    }

    pub fn validate(&self) -> AoResult<()> {
        for (family, bounds) in &self.overrides {
            bounds
                .validate()
                .map_err(|e| AoError::Config(format!("bounds override for {family}: {e}")))?;
        }
        Ok(())
    }
}
