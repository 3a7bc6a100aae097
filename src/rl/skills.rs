// src/rl/skills.rs
//
// High-level skills and their expansion into primitive actions.
//
// Every skill maps to a scripted sequence of primitive actions, and every
// sequence has the same length L so that one skill decision always budgets
// at most L environment steps. The SkillExpander executes a sequence against
// the wrapped environment, sums rewards and stops at the first primitive step
// that terminates or truncates the episode.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

use super::action::PrimitiveAction;
use super::env::{Environment, StepInfo, Transition};
use super::observation::{ObservationMatrix, ObservationShape};

/// Closed enumeration of high-level maneuvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Skill {
    Follow,
    OvertakeLeft,
    OvertakeRight,
    SlowDown,
    KeepRight,
}

impl Skill {
    pub const ALL: [Skill; 5] = [
        Skill::Follow,
        Skill::OvertakeLeft,
        Skill::OvertakeRight,
        Skill::SlowDown,
        Skill::KeepRight,
    ];

    pub fn index(self) -> usize {
        match self {
            Skill::Follow => 0,
            Skill::OvertakeLeft => 1,
            Skill::OvertakeRight => 2,
            Skill::SlowDown => 3,
            Skill::KeepRight => 4,
        }
    }

    /// Parse a skill index as selected by a policy head. Out-of-range
    /// indices are a policy bug and are rejected, never clamped.
    pub fn from_index(index: i64) -> Result<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(GuardError::InvalidSkill {
                index,
                count: Self::ALL.len(),
            })
    }

    pub fn label(self) -> &'static str {
        match self {
            Skill::Follow => "FOLLOW",
            Skill::OvertakeLeft => "OVERTAKE_LEFT",
            Skill::OvertakeRight => "OVERTAKE_RIGHT",
            Skill::SlowDown => "SLOW_DOWN",
            Skill::KeepRight => "KEEP_RIGHT",
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Skill -> primitive-sequence table with a uniform sequence length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Skill, Vec<PrimitiveAction>>")]
#[serde(into = "BTreeMap<Skill, Vec<PrimitiveAction>>")]
pub struct SkillTable {
    sequences: Vec<Vec<PrimitiveAction>>,
}

impl Default for SkillTable {
    fn default() -> Self {
        use PrimitiveAction::*;
        Self {
            sequences: vec![
                vec![Idle, Idle, Idle, Idle],
                vec![LaneRight, Faster, Faster, LaneLeft],
                vec![LaneLeft, Faster, Faster, LaneRight],
                vec![Slower, Slower, Slower, Slower],
                vec![LaneLeft, LaneLeft, Idle, Idle],
            ],
        }
    }
}

impl SkillTable {
    /// Build a table. Every skill must be present with a non-empty sequence,
    /// and all sequences must share one length.
    pub fn new(mut map: BTreeMap<Skill, Vec<PrimitiveAction>>) -> Result<Self> {
        let mut sequences = Vec::with_capacity(Skill::ALL.len());
        for skill in Skill::ALL {
            let seq = map.remove(&skill).ok_or_else(|| {
                GuardError::config("skills.table", format!("missing sequence for {skill}"))
            })?;
            sequences.push(seq);
        }

        let len = sequences[0].len();
        if len == 0 {
            return Err(GuardError::config(
                "skills.table",
                "sequences must not be empty",
            ));
        }
        if let Some((skill, seq)) = Skill::ALL
            .iter()
            .zip(&sequences)
            .find(|(_, seq)| seq.len() != len)
        {
            return Err(GuardError::config(
                "skills.table",
                format!(
                    "{skill} has {} actions, expected {len} like every other skill",
                    seq.len()
                ),
            ));
        }

        Ok(Self { sequences })
    }

    /// Uniform sequence length L.
    pub fn sequence_len(&self) -> usize {
        self.sequences[0].len()
    }

    pub fn sequence(&self, skill: Skill) -> &[PrimitiveAction] {
        &self.sequences[skill.index()]
    }
}

impl TryFrom<BTreeMap<Skill, Vec<PrimitiveAction>>> for SkillTable {
    type Error = GuardError;

    fn try_from(map: BTreeMap<Skill, Vec<PrimitiveAction>>) -> Result<Self> {
        SkillTable::new(map)
    }
}

impl From<SkillTable> for BTreeMap<Skill, Vec<PrimitiveAction>> {
    fn from(table: SkillTable) -> Self {
        Skill::ALL.into_iter().zip(table.sequences).collect()
    }
}

/// Executes skills as scripted primitive sequences on the wrapped environment.
pub struct SkillExpander<E> {
    env: E,
    table: SkillTable,
}

impl<E> SkillExpander<E>
where
    E: Environment<Action = PrimitiveAction>,
{
    pub fn new(env: E, table: SkillTable) -> Self {
        Self { env, table }
    }

    pub fn table(&self) -> &SkillTable {
        &self.table
    }

    pub fn inner(&self) -> &E {
        &self.env
    }

    pub fn into_inner(self) -> E {
        self.env
    }

    /// Step a skill given by raw index, validating it first.
    pub fn step_index(&mut self, index: i64) -> Result<Transition> {
        let skill = Skill::from_index(index)?;
        self.step_skill(skill)
    }

    /// Execute `skill`'s sequence, stopping early on termination/truncation.
    ///
    /// Reward is the sum over executed primitive steps; the returned flags,
    /// observation and info are those of the last executed step.
    pub fn step_skill(&mut self, skill: Skill) -> Result<Transition> {
        let mut total_reward = 0.0;
        let mut last: Option<Transition> = None;
        let mut executed = 0u32;

        for &action in self.table.sequence(skill) {
            let transition = self.env.step(action)?;
            executed += 1;
            total_reward += transition.reward;
            let done = transition.is_done();
            last = Some(transition);
            if done {
                break;
            }
        }

        let mut transition = last.ok_or_else(|| {
            GuardError::Environment(format!("skill {skill} expanded to no primitive steps"))
        })?;
        transition.reward = total_reward;
        transition.info.primitive_steps = executed;
        Ok(transition)
    }
}

impl<E> Environment for SkillExpander<E>
where
    E: Environment<Action = PrimitiveAction>,
{
    type Action = Skill;

    fn observation_shape(&self) -> ObservationShape {
        self.env.observation_shape()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(ObservationMatrix, StepInfo)> {
        self.env.reset(seed)
    }

    fn step(&mut self, skill: Skill) -> Result<Transition> {
        self.step_skill(skill)
    }
}
