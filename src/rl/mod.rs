// src/rl/mod.rs
//
// Confidence-gated control for learned driving policies.
//
// Key components:
// - ObservationMatrix: (V, F) per-vehicle kinematic features, ego in row 0
// - Transformers: noise injection, confidence and intention augmentation
// - RiskEstimator: in-lane gap confidence blended with self-reported confidence
// - SafetyArbiter: primitive-action override to a velocity-banded fallback
// - SkillExpander: scripted skill -> primitive-sequence execution
// - SkillSafetyArbiter: skill-level override to SLOW_DOWN
// - Runner / DecisionTelemetry: deterministic evaluation and JSONL logging
// - HighwaySim: synthetic multi-lane road for demos and tests
//
// Design principle: "Policy proposes, arbiter disposes"

pub mod action;
pub mod confidence;
pub mod env;
pub mod observation;
pub mod override_log;
pub mod policy;
pub mod runner;
pub mod safe_pipeline;
pub mod safety;
pub mod sim_env;
pub mod skill_safety;
pub mod skills;
pub mod telemetry;
pub mod transform;

// Re-exports for convenience
pub use action::{FallbackManeuver, PrimitiveAction};
pub use confidence::{self_reported_confidence, RiskEstimate, RiskEstimator};
pub use env::{
    Environment, MatrixAdapter, RawEnvironment, RawObservation, StepInfo, TransformedEnv,
    Transition,
};
pub use observation::{FeatureColumn, ObservationMatrix, ObservationShape, ShapeError, OBS_VERSION};
pub use override_log::{OverrideEntry, OverrideLog};
pub use policy::{ConstantPolicy, CruisePolicy, FnPolicy, GapSkillPolicy, Policy, Prediction};
pub use runner::{
    evaluate, evaluate_with, run_episode, run_episode_with, EpisodeSummary, EvalConfig,
    EvalSummary, TerminationReason,
};
pub use safe_pipeline::{run_safe_pipeline, SafePipelineSummary};
pub use safety::{ArbiterMode, ArbiterTrace, SafetyArbiter, SafetyDecision};
pub use sim_env::{HighwaySim, HighwaySimConfig};
pub use skill_safety::{SkillDecision, SkillSafetyArbiter, OVERRIDE_SKILL};
pub use skills::{Skill, SkillExpander, SkillTable};
pub use telemetry::{DecisionRecord, DecisionTelemetry};
pub use transform::{
    ConfidenceAugmentation, IntentionAugmentation, NoiseInjection, ObservationTransformer,
    TransformerChain,
};
