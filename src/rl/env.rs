// src/rl/env.rs
//
// Environment contract and the wrappers that sit on it.
//
// - Environment: Gym-style reset/step over an associated action type
// - RawEnvironment + MatrixAdapter: unwraps keyed observation containers at
//   the boundary so the core only ever sees an ObservationMatrix
// - TransformedEnv: applies a TransformerChain to every observation and
//   checks it against the declared output shape

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

use super::observation::{ObservationMatrix, ObservationShape};
use super::transform::TransformerChain;

/// Field name under which keyed containers carry the observation matrix.
pub const OBSERVATION_KEY: &str = "observation";

/// Additional information returned from reset / step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Ego collided on this step.
    pub crashed: bool,
    /// Episode length so far, if the environment reports it.
    pub episode_length: Option<u64>,
    /// Primitive environment steps consumed to produce this transition.
    pub primitive_steps: u32,
}

/// Result of a single environment step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub observation: ObservationMatrix,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

impl Transition {
    /// Episode ended on this step.
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Gym-style environment.
pub trait Environment: Send {
    type Action: Copy;

    /// Declared shape of every observation this environment returns.
    fn observation_shape(&self) -> ObservationShape;

    fn reset(&mut self, seed: Option<u64>) -> Result<(ObservationMatrix, StepInfo)>;

    fn step(&mut self, action: Self::Action) -> Result<Transition>;
}

/// Observation as produced by an external environment: either a bare matrix
/// or a keyed container holding one under `OBSERVATION_KEY`.
#[derive(Debug, Clone, PartialEq)]
pub enum RawObservation {
    Matrix(ObservationMatrix),
    Keyed(BTreeMap<String, ObservationMatrix>),
}

impl RawObservation {
    pub fn into_matrix(self) -> Result<ObservationMatrix> {
        match self {
            RawObservation::Matrix(m) => Ok(m),
            RawObservation::Keyed(mut fields) => fields.remove(OBSERVATION_KEY).ok_or_else(|| {
                GuardError::Environment(format!(
                    "observation container has no '{}' field (fields: {:?})",
                    OBSERVATION_KEY,
                    fields.keys().collect::<Vec<_>>()
                ))
            }),
        }
    }
}

impl From<ObservationMatrix> for RawObservation {
    fn from(m: ObservationMatrix) -> Self {
        RawObservation::Matrix(m)
    }
}

/// Environment that returns raw (possibly keyed) observations.
pub trait RawEnvironment: Send {
    type Action: Copy;

    fn observation_shape(&self) -> ObservationShape;

    fn reset(&mut self, seed: Option<u64>) -> Result<(RawObservation, StepInfo)>;

    fn step(&mut self, action: Self::Action) -> Result<(RawObservation, f64, bool, bool, StepInfo)>;
}

/// Adapts a `RawEnvironment` to `Environment` by unwrapping observations.
pub struct MatrixAdapter<E> {
    env: E,
}

impl<E: RawEnvironment> MatrixAdapter<E> {
    pub fn new(env: E) -> Self {
        Self { env }
    }

    pub fn into_inner(self) -> E {
        self.env
    }
}

impl<E: RawEnvironment> Environment for MatrixAdapter<E> {
    type Action = E::Action;

    fn observation_shape(&self) -> ObservationShape {
        self.env.observation_shape()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(ObservationMatrix, StepInfo)> {
        let (raw, info) = self.env.reset(seed)?;
        Ok((raw.into_matrix()?, info))
    }

    fn step(&mut self, action: Self::Action) -> Result<Transition> {
        let (raw, reward, terminated, truncated, info) = self.env.step(action)?;
        Ok(Transition {
            observation: raw.into_matrix()?,
            reward,
            terminated,
            truncated,
            info,
        })
    }
}

/// Environment whose observations pass through a transformer chain.
pub struct TransformedEnv<E> {
    env: E,
    chain: TransformerChain,
    shape: ObservationShape,
}

impl<E: Environment> TransformedEnv<E> {
    pub fn new(env: E, chain: TransformerChain) -> Self {
        let shape = chain.output_shape(env.observation_shape());
        Self { env, chain, shape }
    }

    pub fn chain(&self) -> &TransformerChain {
        &self.chain
    }

    pub fn inner(&self) -> &E {
        &self.env
    }

    pub fn into_inner(self) -> E {
        self.env
    }

    fn observe(&mut self, obs: ObservationMatrix) -> Result<ObservationMatrix> {
        let out = self.chain.apply(obs)?;
        out.ensure_shape(self.shape)?;
        Ok(out)
    }
}

impl<E: Environment> Environment for TransformedEnv<E> {
    type Action = E::Action;

    fn observation_shape(&self) -> ObservationShape {
        self.shape
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(ObservationMatrix, StepInfo)> {
        let (obs, info) = self.env.reset(seed)?;
        Ok((self.observe(obs)?, info))
    }

    fn step(&mut self, action: Self::Action) -> Result<Transition> {
        let mut transition = self.env.step(action)?;
        transition.observation = self.observe(transition.observation)?;
        Ok(transition)
    }
}
