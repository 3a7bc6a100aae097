// src/rl/confidence.rs
//
// Risk-confidence estimator.
//
// Pure function of the (post-transform) observation matrix:
// 1. nearest in-lane vehicle strictly ahead of ego within GAP_WINDOW
// 2. gap confidence = clip(min_gap / GAP_WINDOW, 0, 1), 1.0 if none
// 3. blended = w * ego_self_reported + (1 - w) * gap confidence
//
// Lane indices are truncated toward zero before comparison.

use serde::{Deserialize, Serialize};

use super::observation::{FeatureColumn, ObservationMatrix, COL_LANE, COL_X};

/// Look-ahead window for in-lane gaps, in observation distance units.
pub const GAP_WINDOW: f64 = 3.0;

/// Weight of the ego self-reported confidence in the blended estimate.
/// Tunable; the remaining weight goes to the gap confidence.
pub const SELF_REPORT_WEIGHT: f64 = 0.5;

/// Breakdown of one confidence estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskEstimate {
    /// Gap to the nearest in-lane vehicle ahead inside the window.
    pub nearest_gap: Option<f64>,
    /// Confidence derived from the in-lane gap alone.
    pub gap_confidence: f64,
    /// Ego confidence feature, 1.0 when the column is absent.
    pub self_reported: f64,
    /// Blended confidence fed to the arbiter, in [0, 1].
    pub blended: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskEstimator {
    gap_window: f64,
    self_report_weight: f64,
}

impl Default for RiskEstimator {
    fn default() -> Self {
        Self {
            gap_window: GAP_WINDOW,
            self_report_weight: SELF_REPORT_WEIGHT,
        }
    }
}

impl RiskEstimator {
    /// Callers validate `gap_window > 0` and weight in [0, 1] (see `GuardConfig::validate`).
    pub fn new(gap_window: f64, self_report_weight: f64) -> Self {
        Self {
            gap_window,
            self_report_weight,
        }
    }

    pub fn gap_window(&self) -> f64 {
        self.gap_window
    }

    /// Nearest gap to a vehicle sharing ego's lane with `0 <= gap < window`.
    pub fn nearest_in_lane_gap(&self, obs: &ObservationMatrix) -> Option<f64> {
        let ego = obs.ego();
        let ego_x = ego[COL_X];
        let ego_lane = ego[COL_LANE].trunc();

        obs.others()
            .filter(|row| row[COL_LANE].trunc() == ego_lane)
            .map(|row| row[COL_X] - ego_x)
            .filter(|gap| *gap >= 0.0 && *gap < self.gap_window)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Confidence from the in-lane gap alone. Empty neighbour set means no risk.
    pub fn gap_confidence(&self, obs: &ObservationMatrix) -> f64 {
        match self.nearest_in_lane_gap(obs) {
            Some(gap) => (gap / self.gap_window).clamp(0.0, 1.0),
            None => 1.0,
        }
    }

    pub fn estimate(&self, obs: &ObservationMatrix) -> RiskEstimate {
        let nearest_gap = self.nearest_in_lane_gap(obs);
        let gap_confidence = match nearest_gap {
            Some(gap) => (gap / self.gap_window).clamp(0.0, 1.0),
            None => 1.0,
        };
        let self_reported = self_reported_confidence(obs).unwrap_or(1.0);
        let w = self.self_report_weight;
        let blended = sanitize(w * self_reported + (1.0 - w) * gap_confidence);

        RiskEstimate {
            nearest_gap,
            gap_confidence,
            self_reported,
            blended,
        }
    }

    /// Blended confidence in [0, 1].
    pub fn confidence(&self, obs: &ObservationMatrix) -> f64 {
        self.estimate(obs).blended
    }
}

/// Ego's confidence feature, if the confidence column is present.
/// Non-finite values read as 0.0 (maximal risk).
pub fn self_reported_confidence(obs: &ObservationMatrix) -> Option<f64> {
    obs.feature(0, FeatureColumn::Confidence).map(sanitize)
}

fn sanitize(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
