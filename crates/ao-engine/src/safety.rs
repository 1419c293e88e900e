use ao_types::{BoundsTable, Family, FamilyBounds, ParamVector};

/// Last step before a proposal leaves the engine. Never fails.
#[derive(Debug, Clone, Default)]
pub struct SafetyClamp {
    bounds: BoundsTable,
}

impl SafetyClamp {
    pub fn new(bounds: BoundsTable) -> Self {
        Self { bounds }
    }

    pub fn bounds_for(&self, family: Family) -> FamilyBounds {
        self.bounds.for_family(family)
    }

    /// Non-finite slots become 0, then every slot is forced into its interval.
    pub fn clamp(&self, family: Family, params: &ParamVector) -> ParamVector {
        self.bounds.for_family(family).clamp(params)
    }

    pub fn is_safe(&self, family: Family, params: &ParamVector) -> bool {
        params.is_finite() && self.bounds.for_family(family).contains(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_types::Bound;

    fn hostile_vectors() -> Vec<ParamVector> {
        vec![
            ParamVector::new([f64::NAN; 5]),
            ParamVector::new([f64::INFINITY, f64::NEG_INFINITY, f64::NAN, 1e9, -1e9]),
            ParamVector::new([-1.0, 0.0, 1.0, 0.0, 100.0]),
            ParamVector::new([0.03, 0.029, 0.002, 0.0016, 4.4]),
            ParamVector::zeros(),
        ]
    }

    #[test]
    fn every_family_output_is_finite_and_in_bounds() {
        let clamp = SafetyClamp::default();
        for family in Family::ALL {
            let bounds = clamp.bounds_for(family);
            for params in hostile_vectors() {
                let out = clamp.clamp(family, &params);
                assert!(out.is_finite(), "{family}: {out:?}");
                for (i, bound) in bounds.iter().enumerate() {
                    assert!(bound.contains(out[i]), "{family} slot {i}: {}", out[i]);
                }
                assert!(clamp.is_safe(family, &out));
            }
        }
    }

    #[test]
    fn unused_slots_are_zeroed() {
        let clamp = SafetyClamp::default();
        let out = clamp.clamp(
            Family::Vivaldi,
            &ParamVector::new([0.05, 0.02, 0.003, 0.0016, 4.4]),
        );
        assert_eq!(out[1], 0.0);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[0], 0.05);
    }

    #[test]
    fn overrides_take_precedence() {
        let tight = FamilyBounds::new([
            Bound::new(0.02, 0.03),
            Bound::new(0.02, 0.03),
            Bound::fixed(0.001),
            Bound::fixed(0.0016),
            Bound::fixed(4.4),
        ]);
        let clamp = SafetyClamp::new(BoundsTable::default().with_override(Family::PatchRect, tight));

        let out = clamp.clamp(Family::PatchRect, &ParamVector::new([0.05, 0.01, 0.003, 0.001, 2.2]));
        assert_eq!(out.as_array(), &[0.03, 0.02, 0.001, 0.0016, 4.4]);
    }
}
