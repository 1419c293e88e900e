use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bounds::{Bound, FamilyBounds};
use crate::errors::AoError;

// Physical ranges in metres.
pub const PATCH_W_RANGE: Bound = Bound::new(8e-3, 60e-3);
pub const PATCH_L_RANGE: Bound = Bound::new(8e-3, 60e-3);
pub const CIRC_RADIUS_RANGE: Bound = Bound::new(5e-3, 30e-3);
pub const FEED_W_RANGE: Bound = Bound::new(0.5e-3, 4e-3);
pub const MONOPOLE_LENGTH_RANGE: Bound = Bound::new(5e-3, 80e-3);
pub const MONOPOLE_WIDTH_RANGE: Bound = Bound::new(0.5e-3, 6e-3);
pub const DIPOLE_LENGTH_RANGE: Bound = Bound::new(10e-3, 160e-3);
pub const DIPOLE_WIDTH_RANGE: Bound = Bound::new(0.5e-3, 6e-3);
pub const CPW_WIDTH_RANGE: Bound = Bound::new(10e-3, 80e-3);
pub const SLOT_WIDTH_RANGE: Bound = Bound::new(1e-3, 20e-3);
pub const VIVALDI_MOUTH_RANGE: Bound = Bound::new(10e-3, 120e-3);
pub const SUBSTRATE_H_RANGE: Bound = Bound::new(0.5e-3, 5e-3);
pub const EPS_R_RANGE: Bound = Bound::new(2.0, 10.0);

/// Antenna design archetype. Selects the surrogate pair and the bound policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    #[serde(rename = "patch_rect")]
    PatchRect,
    #[serde(rename = "patch_circ")]
    PatchCirc,
    #[serde(rename = "patch_meander")]
    PatchMeander,
    #[serde(rename = "patch_u-slot")]
    PatchUSlot,
    #[serde(rename = "patch_e-shape")]
    PatchEShape,
    #[serde(rename = "monopole")]
    Monopole,
    #[serde(rename = "dipole")]
    Dipole,
    #[serde(rename = "cpw_uwb")]
    CpwUwb,
    #[serde(rename = "slot")]
    Slot,
    #[serde(rename = "vivaldi")]
    Vivaldi,
}

/// What a parameter slot means for a given family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotRole {
    Width,
    Length,
    Radius,
    SlotWidth,
    MouthWidth,
    FeedWidth,
    SubstrateHeight,
    Permittivity,
    Unused,
}

impl Family {
    /// Every family, in id order.
    pub const ALL: [Family; 10] = [
        Family::PatchRect,
        Family::PatchCirc,
        Family::PatchMeander,
        Family::PatchUSlot,
        Family::PatchEShape,
        Family::Monopole,
        Family::Dipole,
        Family::CpwUwb,
        Family::Slot,
        Family::Vivaldi,
    ];

    /// Stable integer id, used as a regressor feature.
    pub fn id(self) -> usize {
        self as usize
    }

    pub fn from_id(id: usize) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PatchRect => "patch_rect",
            Self::PatchCirc => "patch_circ",
            Self::PatchMeander => "patch_meander",
            Self::PatchUSlot => "patch_u-slot",
            Self::PatchEShape => "patch_e-shape",
            Self::Monopole => "monopole",
            Self::Dipole => "dipole",
            Self::CpwUwb => "cpw_uwb",
            Self::Slot => "slot",
            Self::Vivaldi => "vivaldi",
        }
    }

    pub fn is_patch(self) -> bool {
        matches!(
            self,
            Self::PatchRect
                | Self::PatchCirc
                | Self::PatchMeander
                | Self::PatchUSlot
                | Self::PatchEShape
        )
    }

    /// Meaning of each of the five parameter slots.
    pub fn slot_roles(self) -> [SlotRole; 5] {
        use SlotRole::*;
        match self {
            Self::PatchRect | Self::PatchMeander | Self::PatchUSlot | Self::PatchEShape => {
                [Width, Length, FeedWidth, SubstrateHeight, Permittivity]
            }
            Self::PatchCirc => [Radius, Unused, FeedWidth, SubstrateHeight, Permittivity],
            Self::Monopole | Self::Dipole => {
                [Length, Width, Unused, SubstrateHeight, Permittivity]
            }
            Self::CpwUwb => [Width, Unused, Unused, SubstrateHeight, Permittivity],
            Self::Slot => [SlotWidth, Unused, Unused, SubstrateHeight, Permittivity],
            Self::Vivaldi => [MouthWidth, Unused, Unused, SubstrateHeight, Permittivity],
        }
    }

    /// Authoritative physical bounds. Unused slots are pinned to zero.
    pub fn default_bounds(self) -> FamilyBounds {
        let pinned = Bound::fixed(0.0);
        let (primary, secondary, feed) = match self {
            Self::PatchRect | Self::PatchMeander | Self::PatchUSlot | Self::PatchEShape => {
                (PATCH_W_RANGE, PATCH_L_RANGE, FEED_W_RANGE)
            }
            Self::PatchCirc => (CIRC_RADIUS_RANGE, pinned, FEED_W_RANGE),
            Self::Monopole => (MONOPOLE_LENGTH_RANGE, MONOPOLE_WIDTH_RANGE, pinned),
            Self::Dipole => (DIPOLE_LENGTH_RANGE, DIPOLE_WIDTH_RANGE, pinned),
            Self::CpwUwb => (CPW_WIDTH_RANGE, pinned, pinned),
            Self::Slot => (SLOT_WIDTH_RANGE, pinned, pinned),
            Self::Vivaldi => (VIVALDI_MOUTH_RANGE, pinned, pinned),
        };

        FamilyBounds::new([primary, secondary, feed, SUBSTRATE_H_RANGE, EPS_R_RANGE])
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = AoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|family| family.name() == s.trim())
            .ok_or_else(|| AoError::UnknownFamily {
                name: s.to_string(),
            })
    }
}
