// src/rl/safety.rs
//
// Deterministic safety arbiter for primitive-action policies.
//
// Two-state machine re-evaluated every decision from the current observation
// only (no hysteresis):
// - TRUST:    blended confidence > threshold, delegate to the wrapped policy
// - OVERRIDE: blended confidence <= threshold, substitute a fallback chosen by
//             ego velocity band and record it in the override log
//
// The wrapped policy is not consulted while overriding.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SafetyConfig;
use crate::error::Result;

use super::action::{FallbackManeuver, PrimitiveAction};
use super::confidence::{RiskEstimate, RiskEstimator};
use super::observation::{ObservationMatrix, COL_VX};
use super::override_log::{OverrideEntry, OverrideLog};
use super::policy::{Policy, Prediction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterMode {
    Trust,
    Override,
}

/// Why the arbiter decided what it did on one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArbiterTrace {
    /// Decision index within this arbiter.
    pub step: u64,
    pub mode: ArbiterMode,
    pub estimate: RiskEstimate,
    /// Ego longitudinal velocity read for the fallback band.
    pub ego_vx: f64,
    /// Fallback maneuver, set only in `Override` mode.
    pub fallback: Option<FallbackManeuver>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyDecision {
    pub prediction: Prediction<PrimitiveAction>,
    pub trace: ArbiterTrace,
}

/// Confidence-gated wrapper around a primitive-action policy.
pub struct SafetyArbiter<P> {
    policy: P,
    threshold: f64,
    slow_vx: f64,
    fast_vx: f64,
    estimator: RiskEstimator,
    log: OverrideLog,
    step: u64,
    version: String,
}

impl<P: Policy<PrimitiveAction>> SafetyArbiter<P> {
    /// Wrap `policy` using a validated safety config.
    pub fn new(policy: P, cfg: &SafetyConfig) -> Result<Self> {
        cfg.validate()?;
        let version = format!("safety[{}]", policy.version());
        Ok(Self {
            policy,
            threshold: cfg.threshold,
            slow_vx: cfg.slow_vx,
            fast_vx: cfg.fast_vx,
            estimator: RiskEstimator::new(cfg.gap_window, cfg.self_report_weight),
            log: OverrideLog::new(),
            step: 0,
            version,
        })
    }

    /// Wrap `policy` with default bands and estimator, overriding at `threshold`.
    pub fn with_threshold(policy: P, threshold: f64) -> Result<Self> {
        let cfg = SafetyConfig {
            threshold,
            ..SafetyConfig::default()
        };
        Self::new(policy, &cfg)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn inner(&self) -> &P {
        &self.policy
    }

    pub fn override_log(&self) -> &OverrideLog {
        &self.log
    }

    /// Consume the arbiter, returning the wrapped policy and its log.
    pub fn into_parts(self) -> (P, OverrideLog) {
        (self.policy, self.log)
    }

    /// Decide for one step.
    pub fn decide(
        &mut self,
        obs: &ObservationMatrix,
        deterministic: bool,
    ) -> Result<SafetyDecision> {
        let step = self.step;
        self.step += 1;

        let estimate = self.estimator.estimate(obs);
        let ego_vx = obs.ego()[COL_VX];

        if estimate.blended <= self.threshold {
            let fallback = FallbackManeuver::for_velocity(ego_vx, self.slow_vx, self.fast_vx);
            self.log.record(OverrideEntry {
                step,
                confidence: estimate.blended,
                chosen: fallback.label().to_string(),
                original: None,
            });
            debug!(
                step,
                confidence = estimate.blended,
                ego_vx,
                fallback = fallback.label(),
                "safety override"
            );
            return Ok(SafetyDecision {
                prediction: Prediction::new(fallback.action()),
                trace: ArbiterTrace {
                    step,
                    mode: ArbiterMode::Override,
                    estimate,
                    ego_vx,
                    fallback: Some(fallback),
                },
            });
        }

        let prediction = self.policy.predict(obs, deterministic)?;
        Ok(SafetyDecision {
            prediction,
            trace: ArbiterTrace {
                step,
                mode: ArbiterMode::Trust,
                estimate,
                ego_vx,
                fallback: None,
            },
        })
    }
}

impl<P: Policy<PrimitiveAction>> Policy<PrimitiveAction> for SafetyArbiter<P> {
    fn version(&self) -> &str {
        &self.version
    }

    fn policy_id(&self) -> Option<&str> {
        self.policy.policy_id()
    }

    fn predict(
        &mut self,
        obs: &ObservationMatrix,
        deterministic: bool,
    ) -> Result<Prediction<PrimitiveAction>> {
        self.decide(obs, deterministic).map(|d| d.prediction)
    }

    /// The override log is kept across episodes; only the wrapped policy resets.
    fn reset_episode(&mut self, seed: u64, episode_id: u64) {
        self.policy.reset_episode(seed, episode_id);
    }

    fn override_log(&self) -> Option<&OverrideLog> {
        Some(&self.log)
    }
}
