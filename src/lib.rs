//! Highway Guard core library.
//!
//! This crate wraps learned driving policies with confidence-gated safety
//! control. The binary (`src/main.rs`) is a thin experiment harness around
//! these components.
//!
//! # Architecture
//!
//! - **Observation pipeline** (`rl::transform`): noise injection and
//!   confidence / intention feature augmentation over a (V, F) kinematic
//!   matrix, applied by `rl::env::TransformedEnv`.
//!
//! - **Risk estimation** (`rl::confidence`): scalar confidence in [0, 1]
//!   from the nearest in-lane gap ahead and ego's self-reported confidence.
//!
//! - **Arbitration** (`rl::safety`, `rl::skill_safety`): policy wrappers
//!   that trust the policy or substitute a conservative action, recording
//!   every override.
//!
//! - **Skills** (`rl::skills`): high-level maneuvers expanded into bounded
//!   primitive-action sequences.
//!
//! - **Evaluation** (`rl::runner`, `rl::safe_pipeline`): deterministic
//!   rollouts over the synthetic `rl::sim_env::HighwaySim`.

pub mod config;
pub mod error;
pub mod rl;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{ExperimentMode, GuardConfig, Preset};
pub use error::{GuardError, Result};

pub use rl::{
    ObservationMatrix, ObservationShape, OverrideLog, Policy, PrimitiveAction, RiskEstimator,
    SafetyArbiter, Skill, SkillExpander, SkillSafetyArbiter, TransformerChain,
};
