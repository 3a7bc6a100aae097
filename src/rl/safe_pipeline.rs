// src/rl/safe_pipeline.rs
//
// Deterministic end-to-end pipeline: synthetic road -> observation
// transformers -> optional skill expansion -> optional arbiter -> evaluation.
//
// Primitive mode drives a CruisePolicy, optionally behind the SafetyArbiter.
// Skill mode drives a GapSkillPolicy through the SkillExpander, optionally
// behind the SkillSafetyArbiter.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{GuardConfig, Preset};
use crate::error::Result;

use super::action::PrimitiveAction;
use super::confidence::RiskEstimator;
use super::env::{Environment, TransformedEnv};
use super::override_log::OverrideEntry;
use super::policy::{CruisePolicy, GapSkillPolicy, Policy};
use super::runner::{evaluate, EvalConfig, EvalSummary};
use super::safety::SafetyArbiter;
use super::sim_env::{HighwaySim, HighwaySimConfig};
use super::skill_safety::SkillSafetyArbiter;
use super::skills::{Skill, SkillExpander};
use super::transform::TransformerChain;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafePipelineSummary {
    pub seed: u64,
    pub episodes: u64,
    pub preset: Preset,
    pub config_version: String,
    pub config_fingerprint: u64,
    /// Transformer stage names in application order.
    pub stages: Vec<String>,
    /// Declared (V, F) observation shape seen by the policy.
    pub observation_shape: String,
    pub policy_version: String,
    pub skills: bool,
    pub eval: EvalSummary,
    pub overrides: Vec<OverrideEntry>,
}

pub fn run_safe_pipeline(cfg: &GuardConfig, seed: u64, episodes: u64) -> Result<SafePipelineSummary> {
    cfg.validate()?;

    // Unseeded noise follows the run seed so that the whole run is reproducible.
    let mut transform = cfg.transform.clone();
    if transform.noise.seed.is_none() {
        transform.noise.seed = Some(seed);
    }

    let chain = TransformerChain::from_config(&transform)?;
    let stages: Vec<String> = chain.stage_names().into_iter().map(String::from).collect();
    let sim = HighwaySim::new(HighwaySimConfig::for_preset(cfg.preset))?;
    let env = TransformedEnv::new(sim, chain);
    let observation_shape = env.observation_shape().to_string();

    let eval_cfg = EvalConfig {
        seed,
        episodes,
        config_version: cfg.version.clone(),
        ..EvalConfig::default()
    };

    let (eval, policy_version, overrides) = if cfg.skills.enabled {
        if cfg.safety.enabled {
            warn!("primitive safety arbiter is not applied when skills are enabled");
        }
        let mut env = SkillExpander::new(env, cfg.skills.table.clone());
        let base = GapSkillPolicy::new(RiskEstimator::new(
            cfg.safety.gap_window,
            cfg.safety.self_report_weight,
        ));
        let mut policy: Box<dyn Policy<Skill>> = if cfg.skills.safety.enabled {
            Box::new(SkillSafetyArbiter::new(base, &cfg.skills.safety)?)
        } else {
            Box::new(base)
        };
        finish(evaluate(&mut env, &mut *policy, &eval_cfg)?, &*policy)
    } else {
        let mut env = env;
        let base = CruisePolicy::default();
        let mut policy: Box<dyn Policy<PrimitiveAction>> = if cfg.safety.enabled {
            Box::new(SafetyArbiter::new(base, &cfg.safety)?)
        } else {
            Box::new(base)
        };
        finish(evaluate(&mut env, &mut *policy, &eval_cfg)?, &*policy)
    };

    Ok(SafePipelineSummary {
        seed,
        episodes,
        preset: cfg.preset,
        config_version: cfg.version.clone(),
        config_fingerprint: cfg.fingerprint(),
        stages,
        observation_shape,
        policy_version,
        skills: cfg.skills.enabled,
        eval,
        overrides,
    })
}

fn finish<A, P: Policy<A> + ?Sized>(
    eval: EvalSummary,
    policy: &P,
) -> (EvalSummary, String, Vec<OverrideEntry>) {
    let overrides = policy
        .override_log()
        .map(|log| log.entries().to_vec())
        .unwrap_or_default();
    (eval, policy.version().to_string(), overrides)
}
