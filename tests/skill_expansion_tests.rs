// tests/skill_expansion_tests.rs
//
// Skill expansion against a scripted environment.
//
// These tests verify:
// 1. At most L primitive steps per skill decision.
// 2. Expansion stops at the first terminated/truncated primitive step.
// 3. Reward is additive over executed steps; flags are those of the last step.
// 4. Invalid skill indices are rejected before any step is taken.
// 5. Skill arbitration happens once per decision, before expansion.

use std::collections::BTreeMap;

use highway_guard::config::GuardConfig;
use highway_guard::rl::{
    ConstantPolicy, Environment, FeatureColumn, ObservationMatrix, ObservationShape, Policy,
    PrimitiveAction, Skill, SkillExpander, SkillSafetyArbiter, SkillTable, StepInfo, Transition,
};
use highway_guard::{GuardError, Result};

/// Records every primitive action; ends the episode on a chosen step.
struct ScriptedEnv {
    actions: Vec<PrimitiveAction>,
    /// 1-based primitive step that terminates, if any.
    terminate_at: Option<usize>,
    /// 1-based primitive step that truncates, if any.
    truncate_at: Option<usize>,
    confidence: f64,
}

impl ScriptedEnv {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            terminate_at: None,
            truncate_at: None,
            confidence: 1.0,
        }
    }

    fn obs(&self) -> ObservationMatrix {
        let step = self.actions.len() as f64;
        ObservationMatrix::from_rows(vec![vec![1.0, step, 1.0, 1.0, 0.0]])
            .unwrap()
            .with_column(FeatureColumn::Confidence, &[self.confidence])
            .unwrap()
    }
}

impl Environment for ScriptedEnv {
    type Action = PrimitiveAction;

    fn observation_shape(&self) -> ObservationShape {
        ObservationShape::new(1, 6)
    }

    fn reset(&mut self, _seed: Option<u64>) -> Result<(ObservationMatrix, StepInfo)> {
        self.actions.clear();
        Ok((self.obs(), StepInfo::default()))
    }

    fn step(&mut self, action: PrimitiveAction) -> Result<Transition> {
        self.actions.push(action);
        let n = self.actions.len();
        let terminated = self.terminate_at == Some(n);
        Ok(Transition {
            observation: self.obs(),
            // Rewards 1, 2, 3, ... make partial sums unambiguous.
            reward: n as f64,
            terminated,
            truncated: self.truncate_at == Some(n),
            info: StepInfo {
                crashed: terminated,
                episode_length: Some(n as u64),
                primitive_steps: 1,
            },
        })
    }
}

fn expander(env: ScriptedEnv) -> SkillExpander<ScriptedEnv> {
    SkillExpander::new(env, SkillTable::default())
}

#[test]
fn test_full_sequence_runs_l_steps() {
    let mut x = expander(ScriptedEnv::new());
    x.reset(Some(0)).unwrap();
    let t = x.step(Skill::OvertakeLeft).unwrap();

    assert_eq!(
        x.inner().actions,
        vec![
            PrimitiveAction::LaneRight,
            PrimitiveAction::Faster,
            PrimitiveAction::Faster,
            PrimitiveAction::LaneLeft
        ]
    );
    assert_eq!(t.reward, 1.0 + 2.0 + 3.0 + 4.0);
    assert_eq!(t.info.primitive_steps, 4);
    assert!(!t.terminated && !t.truncated);
    assert_eq!(t.observation.ego()[1], 4.0);
}

#[test]
fn test_stops_at_first_terminating_step() {
    let mut env = ScriptedEnv::new();
    env.terminate_at = Some(2);
    let mut x = expander(env);
    x.reset(None).unwrap();
    let t = x.step_skill(Skill::SlowDown).unwrap();

    assert_eq!(x.inner().actions.len(), 2);
    assert_eq!(t.reward, 3.0);
    assert!(t.terminated);
    assert!(!t.truncated);
    assert!(t.info.crashed);
    assert_eq!(t.info.primitive_steps, 2);
}

#[test]
fn test_stops_at_first_truncating_step() {
    let mut env = ScriptedEnv::new();
    env.truncate_at = Some(1);
    let mut x = expander(env);
    x.reset(None).unwrap();
    let t = x.step_skill(Skill::KeepRight).unwrap();

    assert_eq!(x.inner().actions, vec![PrimitiveAction::LaneLeft]);
    assert_eq!(t.reward, 1.0);
    assert!(t.truncated && !t.terminated);
}

#[test]
fn test_consecutive_skills_never_exceed_budget() {
    let mut x = expander(ScriptedEnv::new());
    x.reset(None).unwrap();
    for (i, skill) in Skill::ALL.into_iter().enumerate() {
        let t = x.step(skill).unwrap();
        assert!(t.info.primitive_steps as usize <= x.table().sequence_len());
        assert_eq!(x.inner().actions.len(), 4 * (i + 1));
    }
}

#[test]
fn test_invalid_skill_index_takes_no_step() {
    let mut x = expander(ScriptedEnv::new());
    x.reset(None).unwrap();
    assert!(matches!(
        x.step_index(5),
        Err(GuardError::InvalidSkill { index: 5, .. })
    ));
    assert!(matches!(
        x.step_index(-1),
        Err(GuardError::InvalidSkill { index: -1, .. })
    ));
    assert!(x.inner().actions.is_empty());

    x.step_index(3).unwrap();
    assert_eq!(x.inner().actions, vec![PrimitiveAction::Slower; 4]);
}

#[test]
fn test_custom_table_from_yaml() {
    let yaml = r#"
skills:
  enabled: true
  table:
    FOLLOW: [IDLE, IDLE]
    OVERTAKE_LEFT: [LANE_LEFT, FASTER]
    OVERTAKE_RIGHT: [LANE_RIGHT, FASTER]
    SLOW_DOWN: [SLOWER, SLOWER]
    KEEP_RIGHT: [LANE_RIGHT, IDLE]
"#;
    let cfg = GuardConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(cfg.skills.table.sequence_len(), 2);

    let mut x = SkillExpander::new(ScriptedEnv::new(), cfg.skills.table.clone());
    x.reset(None).unwrap();
    let t = x.step(Skill::OvertakeLeft).unwrap();
    assert_eq!(t.info.primitive_steps, 2);
    assert_eq!(
        x.inner().actions,
        vec![PrimitiveAction::LaneLeft, PrimitiveAction::Faster]
    );
}

#[test]
fn test_uneven_table_is_rejected() {
    let mut map: BTreeMap<Skill, Vec<PrimitiveAction>> = SkillTable::default().into();
    map.insert(Skill::Follow, vec![PrimitiveAction::Idle; 3]);
    assert!(SkillTable::new(map).is_err());
}

#[test]
fn test_arbitrated_skill_is_what_gets_expanded() {
    let mut env = ScriptedEnv::new();
    env.confidence = 0.2;
    let mut x = expander(env);
    let mut arbiter =
        SkillSafetyArbiter::with_threshold(ConstantPolicy::new(Skill::OvertakeLeft), 0.65).unwrap();

    let (obs, _) = x.reset(Some(1)).unwrap();
    let skill = arbiter.predict(&obs, true).unwrap().action;
    assert_eq!(skill, Skill::SlowDown);
    x.step(skill).unwrap();

    assert_eq!(x.inner().actions, vec![PrimitiveAction::Slower; 4]);
    // One decision, one log entry, regardless of the four primitive steps.
    assert_eq!(arbiter.override_log().len(), 1);
}
