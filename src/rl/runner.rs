// src/rl/runner.rs
//
// Episode rollout and evaluation.
//
// The runner drives any Environment with any Policy over the same action
// type, so plain policies, arbiter-wrapped policies, primitive environments
// and skill expanders all evaluate through one loop:
// - deterministic seeding: episode i of an evaluation uses seed + i
// - per-episode driving statistics read from the ego row
// - override counts taken from the policy's override log, if it has one
// - optional JSONL decision telemetry

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CONFIG_VERSION;
use crate::error::Result;

use super::confidence::self_reported_confidence;
use super::env::Environment;
use super::observation::{COL_VX, COL_VY};
use super::policy::Policy;
use super::telemetry::{DecisionRecord, DecisionTelemetry};

/// Ego |vy| above which a step counts as a lane change.
pub const LANE_CHANGE_VY: f64 = 0.2;
/// Ego vx above which a step counts as high speed; at or below it counts as idle.
pub const HIGH_SPEED_VX: f64 = 1.0;

/// Episode termination reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Environment terminated with ego crashed.
    Crashed,
    /// Environment terminated without a crash.
    Terminated,
    /// Environment time limit reached.
    Truncated,
    /// Runner decision cap reached before the environment ended.
    MaxSteps,
}

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Base seed; episode i is reset with seed + i.
    pub seed: u64,
    pub episodes: u64,
    /// Decision cap per episode.
    pub max_steps: u64,
    /// Passed through to `Policy::predict`.
    pub deterministic: bool,
    /// Recorded in decision telemetry.
    pub config_version: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            episodes: 1,
            max_steps: 1000,
            deterministic: true,
            config_version: CONFIG_VERSION.to_string(),
        }
    }
}

impl EvalConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_episodes(mut self, episodes: u64) -> Self {
        self.episodes = episodes;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// Summary of one rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode_id: u64,
    pub seed: u64,
    pub termination_reason: TerminationReason,
    pub total_reward: f64,
    /// Policy decisions taken.
    pub steps: u64,
    /// Primitive environment steps behind those decisions.
    pub primitive_steps: u64,
    pub crashed: bool,
    pub lane_change_steps: u64,
    pub high_speed_steps: u64,
    pub idle_steps: u64,
    /// Mean ego confidence over post-step observations that carried one.
    pub mean_confidence: Option<f64>,
    /// Arbiter overrides during this episode.
    pub overrides: usize,
}

/// Aggregate over an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub seed: u64,
    pub episodes: u64,
    pub mean_reward: f64,
    /// Population standard deviation of episode rewards.
    pub std_reward: f64,
    pub crash_rate: f64,
    pub mean_length: f64,
    pub mean_confidence: Option<f64>,
    pub total_overrides: usize,
    pub episode_summaries: Vec<EpisodeSummary>,
}

impl EvalSummary {
    pub fn from_episodes(seed: u64, episode_summaries: Vec<EpisodeSummary>) -> Self {
        let n = episode_summaries.len();
        let (mean_reward, std_reward, crash_rate, mean_length) = if n == 0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let nf = n as f64;
            let mean = episode_summaries.iter().map(|e| e.total_reward).sum::<f64>() / nf;
            let var = episode_summaries
                .iter()
                .map(|e| (e.total_reward - mean).powi(2))
                .sum::<f64>()
                / nf;
            let crashes = episode_summaries.iter().filter(|e| e.crashed).count() as f64;
            let length = episode_summaries.iter().map(|e| e.steps as f64).sum::<f64>() / nf;
            (mean, var.sqrt(), crashes / nf, length)
        };

        let confidences: Vec<f64> = episode_summaries
            .iter()
            .filter_map(|e| e.mean_confidence)
            .collect();
        let mean_confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };

        Self {
            seed,
            episodes: n as u64,
            mean_reward,
            std_reward,
            crash_rate,
            mean_length,
            mean_confidence,
            total_overrides: episode_summaries.iter().map(|e| e.overrides).sum(),
            episode_summaries,
        }
    }
}

fn override_count<A, P: Policy<A> + ?Sized>(policy: &P) -> usize {
    policy.override_log().map_or(0, |log| log.len())
}

/// Roll out one episode with default settings and no telemetry.
pub fn run_episode<E, P>(
    env: &mut E,
    policy: &mut P,
    episode_id: u64,
    seed: u64,
) -> Result<EpisodeSummary>
where
    E: Environment,
    E::Action: fmt::Display,
    P: Policy<E::Action> + ?Sized,
{
    let cfg = EvalConfig::default();
    run_episode_with(env, policy, episode_id, seed, &cfg, &mut DecisionTelemetry::new())
}

pub fn run_episode_with<E, P>(
    env: &mut E,
    policy: &mut P,
    episode_id: u64,
    seed: u64,
    cfg: &EvalConfig,
    telemetry: &mut DecisionTelemetry,
) -> Result<EpisodeSummary>
where
    E: Environment,
    E::Action: fmt::Display,
    P: Policy<E::Action> + ?Sized,
{
    policy.reset_episode(seed, episode_id);
    let overrides_before = override_count(policy);
    telemetry.log_episode_start(episode_id, seed);

    let (mut obs, _) = env.reset(Some(seed))?;

    let mut total_reward = 0.0;
    let mut steps = 0u64;
    let mut primitive_steps = 0u64;
    let mut crashed = false;
    let mut lane_change_steps = 0u64;
    let mut high_speed_steps = 0u64;
    let mut idle_steps = 0u64;
    let mut confidence_sum = 0.0;
    let mut confidence_n = 0u64;

    let reason = loop {
        if steps >= cfg.max_steps {
            break TerminationReason::MaxSteps;
        }

        let confidence = self_reported_confidence(&obs);
        let prediction = policy.predict(&obs, cfg.deterministic)?;
        let transition = env.step(prediction.action)?;

        steps += 1;
        total_reward += transition.reward;
        primitive_steps += u64::from(transition.info.primitive_steps);
        crashed |= transition.info.crashed;

        if let Some(c) = self_reported_confidence(&transition.observation) {
            confidence_sum += c;
            confidence_n += 1;
        }

        let ego = transition.observation.ego();
        if ego[COL_VY].abs() > LANE_CHANGE_VY {
            lane_change_steps += 1;
        }
        if ego[COL_VX] > HIGH_SPEED_VX {
            high_speed_steps += 1;
        } else {
            idle_steps += 1;
        }

        if telemetry.is_enabled() {
            let mut record =
                DecisionRecord::new(policy.version(), &cfg.config_version, episode_id, steps - 1);
            record.action = prediction.action.to_string();
            record.ego_confidence = confidence;
            record.overrides_total = policy.override_log().map(|log| log.len());
            record.reward = transition.reward;
            record.terminated = transition.terminated;
            record.truncated = transition.truncated;
            record.crashed = transition.info.crashed;
            telemetry.log_decision(&record);
        }

        if transition.terminated {
            let reason = if crashed {
                TerminationReason::Crashed
            } else {
                TerminationReason::Terminated
            };
            break reason;
        }
        if transition.truncated {
            break TerminationReason::Truncated;
        }
        obs = transition.observation;
    };

    let overrides = override_count(policy).saturating_sub(overrides_before);
    telemetry.log_episode_end(episode_id, seed, reason, total_reward, steps);

    let summary = EpisodeSummary {
        episode_id,
        seed,
        termination_reason: reason,
        total_reward,
        steps,
        primitive_steps,
        crashed,
        lane_change_steps,
        high_speed_steps,
        idle_steps,
        mean_confidence: (confidence_n > 0).then(|| confidence_sum / confidence_n as f64),
        overrides,
    };

    info!(
        episode_id,
        seed,
        reward = summary.total_reward,
        steps = summary.steps,
        crashed = summary.crashed,
        overrides = summary.overrides,
        reason = ?summary.termination_reason,
        "episode finished"
    );

    Ok(summary)
}

/// Evaluate `cfg.episodes` episodes with telemetry taken from the environment.
pub fn evaluate<E, P>(env: &mut E, policy: &mut P, cfg: &EvalConfig) -> Result<EvalSummary>
where
    E: Environment,
    E::Action: fmt::Display,
    P: Policy<E::Action> + ?Sized,
{
    evaluate_with(env, policy, cfg, &mut DecisionTelemetry::from_env())
}

pub fn evaluate_with<E, P>(
    env: &mut E,
    policy: &mut P,
    cfg: &EvalConfig,
    telemetry: &mut DecisionTelemetry,
) -> Result<EvalSummary>
where
    E: Environment,
    E::Action: fmt::Display,
    P: Policy<E::Action> + ?Sized,
{
    let mut episodes = Vec::with_capacity(cfg.episodes as usize);
    for episode_id in 0..cfg.episodes {
        let seed = cfg.seed.wrapping_add(episode_id);
        episodes.push(run_episode_with(env, policy, episode_id, seed, cfg, telemetry)?);
    }
    telemetry.flush();
    Ok(EvalSummary::from_episodes(cfg.seed, episodes))
}
