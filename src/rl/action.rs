// src/rl/action.rs
//
// Primitive (single-step) actions of the driving environment and the
// deterministic fallback maneuvers the safety arbiter can substitute.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Discrete meta-action understood by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimitiveAction {
    LaneLeft,
    Idle,
    LaneRight,
    Faster,
    Slower,
}

impl PrimitiveAction {
    pub const ALL: [PrimitiveAction; 5] = [
        PrimitiveAction::LaneLeft,
        PrimitiveAction::Idle,
        PrimitiveAction::LaneRight,
        PrimitiveAction::Faster,
        PrimitiveAction::Slower,
    ];

    /// Environment action identifier.
    pub fn index(self) -> usize {
        match self {
            PrimitiveAction::LaneLeft => 0,
            PrimitiveAction::Idle => 1,
            PrimitiveAction::LaneRight => 2,
            PrimitiveAction::Faster => 3,
            PrimitiveAction::Slower => 4,
        }
    }

    /// Parse an environment action identifier. Out-of-range values are
    /// rejected, never clamped.
    pub fn from_index(index: i64) -> Result<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(GuardError::InvalidAction {
                index,
                count: Self::ALL.len(),
            })
    }

    pub fn label(self) -> &'static str {
        match self {
            PrimitiveAction::LaneLeft => "LANE_LEFT",
            PrimitiveAction::Idle => "IDLE",
            PrimitiveAction::LaneRight => "LANE_RIGHT",
            PrimitiveAction::Faster => "FASTER",
            PrimitiveAction::Slower => "SLOWER",
        }
    }
}

impl fmt::Display for PrimitiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Deterministic maneuver chosen by velocity band when the arbiter overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackManeuver {
    Accelerate,
    Decelerate,
    KeepLane,
}

impl FallbackManeuver {
    /// Pick the maneuver for ego longitudinal velocity `vx`.
    ///
    /// `vx < slow_vx` accelerates, `vx > fast_vx` decelerates, anything in
    /// between (inclusive) keeps the lane.
    pub fn for_velocity(vx: f64, slow_vx: f64, fast_vx: f64) -> Self {
        if vx < slow_vx {
            FallbackManeuver::Accelerate
        } else if vx > fast_vx {
            FallbackManeuver::Decelerate
        } else {
            FallbackManeuver::KeepLane
        }
    }

    pub fn action(self) -> PrimitiveAction {
        match self {
            FallbackManeuver::Accelerate => PrimitiveAction::Faster,
            FallbackManeuver::Decelerate => PrimitiveAction::Slower,
            FallbackManeuver::KeepLane => PrimitiveAction::Idle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FallbackManeuver::Accelerate => "ACCELERATE",
            FallbackManeuver::Decelerate => "DECELERATE",
            FallbackManeuver::KeepLane => "KEEP_LANE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip_for_all_actions() {
        for action in PrimitiveAction::ALL {
            assert_eq!(
                PrimitiveAction::from_index(action.index() as i64).unwrap(),
                action
            );
        }
    }

    #[test]
    fn test_from_index_rejects_out_of_range() {
        assert!(matches!(
            PrimitiveAction::from_index(5),
            Err(GuardError::InvalidAction { index: 5, count: 5 })
        ));
        assert!(matches!(
            PrimitiveAction::from_index(-1),
            Err(GuardError::InvalidAction { index: -1, .. })
        ));
    }

    #[test]
    fn test_fallback_velocity_bands() {
        assert_eq!(
            FallbackManeuver::for_velocity(0.3, 0.5, 1.0),
            FallbackManeuver::Accelerate
        );
        assert_eq!(
            FallbackManeuver::for_velocity(1.5, 0.5, 1.0),
            FallbackManeuver::Decelerate
        );
        assert_eq!(
            FallbackManeuver::for_velocity(0.8, 0.5, 1.0),
            FallbackManeuver::KeepLane
        );
        // Band edges are inclusive on the keep-lane side.
        assert_eq!(
            FallbackManeuver::for_velocity(0.5, 0.5, 1.0),
            FallbackManeuver::KeepLane
        );
        assert_eq!(
            FallbackManeuver::for_velocity(1.0, 0.5, 1.0),
            FallbackManeuver::KeepLane
        );
    }

    #[test]
    fn test_fallback_maps_to_primitive_actions() {
        assert_eq!(FallbackManeuver::Accelerate.action(), PrimitiveAction::Faster);
        assert_eq!(FallbackManeuver::Decelerate.action(), PrimitiveAction::Slower);
        assert_eq!(FallbackManeuver::KeepLane.action(), PrimitiveAction::Idle);
    }
}
