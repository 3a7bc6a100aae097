// src/rl/policy.rs
//
// Policy trait and bundled implementations.
//
// A policy maps an observation matrix to an action of type `A`. The same
// trait covers primitive-action policies (`A = PrimitiveAction`), skill
// policies (`A = Skill`) and the safety arbiters that wrap either, so a
// wrapped policy can stand wherever an unwrapped one can.
//
// Design:
// - Policy<A>: predict(observation, deterministic) -> (action, state)
// - ConstantPolicy: always proposes the same action (tests, baselines)
// - FnPolicy: closure-backed policy (adapters for external models)
// - CruisePolicy: speed-keeping heuristic over primitive actions
// - GapSkillPolicy: overtakes when the lane ahead is blocked

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::action::PrimitiveAction;
use super::confidence::RiskEstimator;
use super::observation::{ObservationMatrix, COL_VX};
use super::override_log::OverrideLog;
use super::skills::Skill;

/// Current cruise policy version.
pub const CRUISE_POLICY_VERSION: &str = "cruise-v1.0.0";

/// Output of a single policy decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction<A> {
    pub action: A,
    /// Opaque recurrent state, for policies that carry one.
    pub state: Option<Vec<f64>>,
}

impl<A> Prediction<A> {
    pub fn new(action: A) -> Self {
        Self {
            action,
            state: None,
        }
    }

    pub fn with_state(mut self, state: Vec<f64>) -> Self {
        self.state = Some(state);
        self
    }
}

/// Policy trait: interface for every decision-making component.
pub trait Policy<A>: Send {
    /// Unique version string for this policy implementation.
    fn version(&self) -> &str;

    /// Optional policy ID (e.g., model checkpoint name).
    fn policy_id(&self) -> Option<&str> {
        None
    }

    /// Decide an action for the current observation.
    fn predict(&mut self, obs: &ObservationMatrix, deterministic: bool) -> Result<Prediction<A>>;

    /// Reset per-episode state. Called at the start of each episode.
    fn reset_episode(&mut self, seed: u64, episode_id: u64);

    /// Overrides recorded by this policy, if it arbitrates.
    fn override_log(&self) -> Option<&OverrideLog> {
        None
    }
}

impl<A, P: Policy<A> + ?Sized> Policy<A> for Box<P> {
    fn version(&self) -> &str {
        (**self).version()
    }

    fn policy_id(&self) -> Option<&str> {
        (**self).policy_id()
    }

    fn predict(&mut self, obs: &ObservationMatrix, deterministic: bool) -> Result<Prediction<A>> {
        (**self).predict(obs, deterministic)
    }

    fn reset_episode(&mut self, seed: u64, episode_id: u64) {
        (**self).reset_episode(seed, episode_id)
    }

    fn override_log(&self) -> Option<&OverrideLog> {
        (**self).override_log()
    }
}

/// Always proposes the same action.
#[derive(Debug, Clone)]
pub struct ConstantPolicy<A> {
    action: A,
    version: String,
}

impl<A: Copy + Send> ConstantPolicy<A> {
    pub fn new(action: A) -> Self {
        Self {
            action,
            version: "constant-v1.0.0".to_string(),
        }
    }
}

impl<A: Copy + Send> Policy<A> for ConstantPolicy<A> {
    fn version(&self) -> &str {
        &self.version
    }

    fn predict(&mut self, _obs: &ObservationMatrix, _deterministic: bool) -> Result<Prediction<A>> {
        Ok(Prediction::new(self.action))
    }

    fn reset_episode(&mut self, _seed: u64, _episode_id: u64) {
        // Constant has no state to reset
    }
}

/// Policy backed by a closure. Useful for adapting an external model.
pub struct FnPolicy<F> {
    f: F,
    version: String,
}

impl<F> FnPolicy<F> {
    pub fn new(version: &str, f: F) -> Self {
        Self {
            f,
            version: version.to_string(),
        }
    }
}

impl<A, F> Policy<A> for FnPolicy<F>
where
    F: FnMut(&ObservationMatrix, bool) -> Result<Prediction<A>> + Send,
{
    fn version(&self) -> &str {
        &self.version
    }

    fn predict(&mut self, obs: &ObservationMatrix, deterministic: bool) -> Result<Prediction<A>> {
        (self.f)(obs, deterministic)
    }

    fn reset_episode(&mut self, _seed: u64, _episode_id: u64) {}
}

/// Speed-keeping heuristic: accelerate below the target band, brake above it.
#[derive(Debug, Clone)]
pub struct CruisePolicy {
    target_vx: f64,
    band: f64,
    version: String,
}

impl Default for CruisePolicy {
    fn default() -> Self {
        Self::new(1.0, 0.1)
    }
}

impl CruisePolicy {
    pub fn new(target_vx: f64, band: f64) -> Self {
        Self {
            target_vx,
            band,
            version: CRUISE_POLICY_VERSION.to_string(),
        }
    }
}

impl Policy<PrimitiveAction> for CruisePolicy {
    fn version(&self) -> &str {
        &self.version
    }

    fn policy_id(&self) -> Option<&str> {
        Some("cruise")
    }

    fn predict(
        &mut self,
        obs: &ObservationMatrix,
        _deterministic: bool,
    ) -> Result<Prediction<PrimitiveAction>> {
        let vx = obs.ego()[COL_VX];
        let action = if vx < self.target_vx - self.band {
            PrimitiveAction::Faster
        } else if vx > self.target_vx + self.band {
            PrimitiveAction::Slower
        } else {
            PrimitiveAction::Idle
        };
        Ok(Prediction::new(action))
    }

    fn reset_episode(&mut self, _seed: u64, _episode_id: u64) {}
}

/// Skill heuristic: overtake on the left when a vehicle is inside the gap
/// window ahead, otherwise follow.
#[derive(Debug, Clone, Default)]
pub struct GapSkillPolicy {
    estimator: RiskEstimator,
}

impl GapSkillPolicy {
    pub fn new(estimator: RiskEstimator) -> Self {
        Self { estimator }
    }
}

impl Policy<Skill> for GapSkillPolicy {
    fn version(&self) -> &str {
        "gap-skill-v1.0.0"
    }

    fn predict(&mut self, obs: &ObservationMatrix, _deterministic: bool) -> Result<Prediction<Skill>> {
        let skill = match self.estimator.nearest_in_lane_gap(obs) {
            Some(_) => Skill::OvertakeLeft,
            None => Skill::Follow,
        };
        Ok(Prediction::new(skill))
    }

    fn reset_episode(&mut self, _seed: u64, _episode_id: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs_with_vx(vx: f64) -> ObservationMatrix {
        ObservationMatrix::from_rows(vec![vec![1.0, 0.0, 1.0, vx, 0.0]]).unwrap()
    }

    #[test]
    fn test_constant_policy() {
        let mut policy = ConstantPolicy::new(PrimitiveAction::LaneLeft);
        let p = policy.predict(&obs_with_vx(1.0), true).unwrap();
        assert_eq!(p.action, PrimitiveAction::LaneLeft);
        assert!(p.state.is_none());
    }

    #[test]
    fn test_cruise_policy_bands() {
        let mut policy = CruisePolicy::default();
        let act = |p: &mut CruisePolicy, vx| p.predict(&obs_with_vx(vx), true).unwrap().action;
        assert_eq!(act(&mut policy, 0.5), PrimitiveAction::Faster);
        assert_eq!(act(&mut policy, 1.0), PrimitiveAction::Idle);
        assert_eq!(act(&mut policy, 1.5), PrimitiveAction::Slower);
    }

    #[test]
    fn test_fn_policy_passes_state_through() {
        let mut policy = FnPolicy::new(
            "fn-test",
            |_obs: &ObservationMatrix, _det: bool| -> Result<Prediction<Skill>> {
                Ok(Prediction::new(Skill::KeepRight).with_state(vec![0.5]))
            },
        );
        let p: Prediction<Skill> = policy.predict(&obs_with_vx(1.0), true).unwrap();
        assert_eq!(p.action, Skill::KeepRight);
        assert_eq!(p.state, Some(vec![0.5]));
    }

    #[test]
    fn test_gap_skill_policy() {
        let mut policy = GapSkillPolicy::default();
        let clear = obs_with_vx(1.0);
        assert_eq!(policy.predict(&clear, true).unwrap().action, Skill::Follow);

        let blocked = ObservationMatrix::from_rows(vec![
            vec![1.0, 0.0, 1.0, 1.0, 0.0],
            vec![1.0, 1.0, 1.0, 1.0, 0.0],
        ])
        .unwrap();
        assert_eq!(
            policy.predict(&blocked, true).unwrap().action,
            Skill::OvertakeLeft
        );
    }

    #[test]
    fn test_boxed_policy_delegates() {
        let mut boxed: Box<dyn Policy<PrimitiveAction>> = Box::new(CruisePolicy::default());
        assert_eq!(boxed.version(), CRUISE_POLICY_VERSION);
        assert_eq!(
            boxed.predict(&obs_with_vx(0.2), true).unwrap().action,
            PrimitiveAction::Faster
        );
        assert!(boxed.override_log().is_none());
    }
}
