// src/rl/skill_safety.rs
//
// Safety arbitration at skill granularity.
//
// The wrapped skill policy is always consulted first; the arbiter then reads
// ego's upstream confidence feature directly (no in-lane gap estimate) and,
// when it is strictly below the threshold, replaces the whole skill with
// SLOW_DOWN. Arbitration happens once per skill decision, before expansion.

use tracing::debug;

use crate::config::SkillSafetyConfig;
use crate::error::Result;

use super::confidence::self_reported_confidence;
use super::observation::{FeatureColumn, ObservationMatrix, ShapeError};
use super::override_log::{OverrideEntry, OverrideLog};
use super::policy::{Policy, Prediction};
use super::safety::ArbiterMode;
use super::skills::Skill;

/// Skill substituted on override.
pub const OVERRIDE_SKILL: Skill = Skill::SlowDown;

#[derive(Debug, Clone, PartialEq)]
pub struct SkillDecision {
    pub prediction: Prediction<Skill>,
    /// Skill the wrapped policy selected.
    pub proposed: Skill,
    pub confidence: f64,
    pub mode: ArbiterMode,
    pub step: u64,
}

/// Confidence-gated wrapper around a skill policy.
pub struct SkillSafetyArbiter<P> {
    policy: P,
    threshold: f64,
    log: OverrideLog,
    step: u64,
    version: String,
}

impl<P: Policy<Skill>> SkillSafetyArbiter<P> {
    pub fn new(policy: P, cfg: &SkillSafetyConfig) -> Result<Self> {
        cfg.validate()?;
        let version = format!("skill-safety[{}]", policy.version());
        Ok(Self {
            policy,
            threshold: cfg.threshold,
            log: OverrideLog::new(),
            step: 0,
            version,
        })
    }

    pub fn with_threshold(policy: P, threshold: f64) -> Result<Self> {
        let cfg = SkillSafetyConfig {
            threshold,
            ..SkillSafetyConfig::default()
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

    pub fn into_parts(self) -> (P, OverrideLog) {
        (self.policy, self.log)
    }

    /// Decide the skill for one decision point.
    ///
    /// Fails with a shape error when the observation carries no confidence
    /// column, since that is the only signal this arbiter reads.
    pub fn decide(&mut self, obs: &ObservationMatrix, deterministic: bool) -> Result<SkillDecision> {
        let confidence = self_reported_confidence(obs).ok_or(ShapeError::MissingFeature {
            feature: FeatureColumn::Confidence,
        })?;
        let proposal = self.policy.predict(obs, deterministic)?;

        let step = self.step;
        self.step += 1;
        let proposed = proposal.action;

        if confidence < self.threshold {
            self.log.record(OverrideEntry {
                step,
                confidence,
                chosen: OVERRIDE_SKILL.label().to_string(),
                original: Some(proposed.label().to_string()),
            });
            debug!(
                step,
                confidence,
                proposed = proposed.label(),
                "skill override"
            );
            return Ok(SkillDecision {
                prediction: Prediction {
                    action: OVERRIDE_SKILL,
                    state: proposal.state,
                },
                proposed,
                confidence,
                mode: ArbiterMode::Override,
                step,
            });
        }

        Ok(SkillDecision {
            prediction: proposal,
            proposed,
            confidence,
            mode: ArbiterMode::Trust,
            step,
        })
    }
}

impl<P: Policy<Skill>> Policy<Skill> for SkillSafetyArbiter<P> {
    fn version(&self) -> &str {
        &self.version
    }

    fn policy_id(&self) -> Option<&str> {
        self.policy.policy_id()
    }

    fn predict(&mut self, obs: &ObservationMatrix, deterministic: bool) -> Result<Prediction<Skill>> {
        self.decide(obs, deterministic).map(|d| d.prediction)
    }

    fn reset_episode(&mut self, seed: u64, episode_id: u64) {
        self.policy.reset_episode(seed, episode_id);
    }

    fn override_log(&self) -> Option<&OverrideLog> {
        Some(&self.log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;
    use crate::rl::policy::{ConstantPolicy, FnPolicy};

    fn obs(confidence: f64) -> ObservationMatrix {
        // A vehicle right ahead would drive the gap estimate to 0; the skill
        // arbiter must ignore it and read only the confidence feature.
        ObservationMatrix::from_rows(vec![
            vec![1.0, 0.0, 1.0, 1.0, 0.0],
            vec![1.0, 0.1, 1.0, 1.0, 0.0],
        ])
        .unwrap()
        .with_column(FeatureColumn::Confidence, &[confidence, 1.0])
        .unwrap()
    }

    fn arbiter() -> SkillSafetyArbiter<ConstantPolicy<Skill>> {
        SkillSafetyArbiter::with_threshold(ConstantPolicy::new(Skill::OvertakeLeft), 0.65).unwrap()
    }

    #[test]
    fn test_high_confidence_keeps_skill() {
        let mut a = arbiter();
        let d = a.decide(&obs(0.9), true).unwrap();
        assert_eq!(d.mode, ArbiterMode::Trust);
        assert_eq!(d.prediction.action, Skill::OvertakeLeft);
        assert!(a.override_log().is_empty());
    }

    #[test]
    fn test_low_confidence_slows_down() {
        let mut a = arbiter();
        let d = a.decide(&obs(0.2), true).unwrap();
        assert_eq!(d.mode, ArbiterMode::Override);
        assert_eq!(d.prediction.action, Skill::SlowDown);
        assert_eq!(d.proposed, Skill::OvertakeLeft);
        let entry = &a.override_log().entries()[0];
        assert_eq!(entry.confidence, 0.2);
        assert_eq!(entry.chosen, "SLOW_DOWN");
        assert_eq!(entry.original.as_deref(), Some("OVERTAKE_LEFT"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut a = SkillSafetyArbiter::with_threshold(ConstantPolicy::new(Skill::Follow), 0.5)
            .unwrap();
        assert_eq!(a.decide(&obs(0.5), true).unwrap().mode, ArbiterMode::Trust);
        assert_eq!(
            a.decide(&obs(0.49), true).unwrap().mode,
            ArbiterMode::Override
        );
    }

    #[test]
    fn test_missing_confidence_column_is_shape_error() {
        let mut a = arbiter();
        let bare = ObservationMatrix::from_rows(vec![vec![1.0, 0.0, 1.0, 1.0, 0.0]]).unwrap();
        assert!(matches!(
            a.decide(&bare, true),
            Err(GuardError::Shape(ShapeError::MissingFeature {
                feature: FeatureColumn::Confidence
            }))
        ));
    }

    #[test]
    fn test_rejected_decision_leaves_policy_and_step_untouched() {
        let mut calls = 0usize;
        let policy = FnPolicy::new(
            "counting",
            |_obs: &ObservationMatrix, _det: bool| -> Result<Prediction<Skill>> {
                calls += 1;
                Ok(Prediction::new(Skill::Follow))
            },
        );
        let mut a = SkillSafetyArbiter::with_threshold(policy, 0.65).unwrap();

        let bare = ObservationMatrix::from_rows(vec![vec![1.0, 0.0, 1.0, 1.0, 0.0]]).unwrap();
        assert!(a.decide(&bare, true).is_err());
        let d = a.decide(&obs(0.1), true).unwrap();
        assert_eq!(d.step, 0);
        assert_eq!(a.override_log().entries()[0].step, 0);

        drop(a);
        assert_eq!(calls, 1);
    }
}
