// src/rl/transform.rs
//
// Observation transformers and the ordered chain that applies them.
//
// Each stage rewrites the observation matrix before it reaches any decision
// logic and declares its output shape. Stages compose by an explicit fold in
// declaration order; order matters because later stages (confidence) read the
// output of earlier ones (noise).

use std::fmt;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::config::TransformConfig;
use crate::error::{GuardError, Result};

use super::observation::{
    FeatureColumn, ObservationMatrix, ObservationShape, ShapeError, COL_VY, KINEMATIC_COLUMNS,
};

/// Lateral velocity magnitude above which a vehicle is labelled as changing lane.
pub const INTENTION_VY_THRESHOLD: f64 = 0.3;

/// A single observation-rewriting stage.
pub trait ObservationTransformer: Send {
    /// Stable stage name (used in logs).
    fn name(&self) -> &'static str;

    /// Shape produced for an input of shape `input`.
    fn output_shape(&self, input: ObservationShape) -> ObservationShape;

    fn transform(&mut self, obs: ObservationMatrix)
        -> std::result::Result<ObservationMatrix, ShapeError>;
}

/// Zero-mean Gaussian sensor noise on the kinematic columns of every row.
///
/// Not idempotent: every call draws fresh noise from the stage's own RNG.
pub struct NoiseInjection {
    std: f64,
    normal: Normal<f64>,
    rng: ChaCha8Rng,
}

impl NoiseInjection {
    /// Create a noise stage. With `seed = None` the RNG is seeded from the
    /// thread RNG and draws are not reproducible.
    pub fn new(std: f64, seed: Option<u64>) -> Result<Self> {
        if !std.is_finite() || std < 0.0 {
            return Err(GuardError::config(
                "noise.std",
                format!("must be finite and >= 0, got {std}"),
            ));
        }
        let normal = Normal::new(0.0, std)
            .map_err(|e| GuardError::config("noise.std", e.to_string()))?;
        let seed = seed.unwrap_or_else(rand::random);
        Ok(Self {
            std,
            normal,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn std(&self) -> f64 {
        self.std
    }
}

impl ObservationTransformer for NoiseInjection {
    fn name(&self) -> &'static str {
        "noise"
    }

    fn output_shape(&self, input: ObservationShape) -> ObservationShape {
        input
    }

    fn transform(
        &mut self,
        mut obs: ObservationMatrix,
    ) -> std::result::Result<ObservationMatrix, ShapeError> {
        for row in 0..obs.vehicles() {
            for value in obs.kinematics_mut(row) {
                *value += self.normal.sample(&mut self.rng);
            }
        }
        Ok(obs)
    }
}

/// Population variance of a slice (0.0 for an empty slice).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

/// Per-row confidence: `exp(-variance(x, lane, vx, vy))`.
pub fn row_confidence(row: &[f64]) -> f64 {
    (-variance(&row[KINEMATIC_COLUMNS])).exp()
}

/// Appends a per-row confidence column.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceAugmentation;

impl ObservationTransformer for ConfidenceAugmentation {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn output_shape(&self, input: ObservationShape) -> ObservationShape {
        input.with_extra_column()
    }

    fn transform(
        &mut self,
        obs: ObservationMatrix,
    ) -> std::result::Result<ObservationMatrix, ShapeError> {
        let confidence: Vec<f64> = obs.rows().map(row_confidence).collect();
        obs.with_column(FeatureColumn::Confidence, &confidence)
    }
}

/// Discrete lane-change intention from lateral velocity: +1, -1 or 0.
pub fn intention_label(vy: f64) -> f64 {
    if vy > INTENTION_VY_THRESHOLD {
        1.0
    } else if vy < -INTENTION_VY_THRESHOLD {
        -1.0
    } else {
        0.0
    }
}

/// Appends a per-row intention column derived from lateral velocity.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentionAugmentation;

impl ObservationTransformer for IntentionAugmentation {
    fn name(&self) -> &'static str {
        "intention"
    }

    fn output_shape(&self, input: ObservationShape) -> ObservationShape {
        input.with_extra_column()
    }

    fn transform(
        &mut self,
        obs: ObservationMatrix,
    ) -> std::result::Result<ObservationMatrix, ShapeError> {
        let intentions: Vec<f64> = obs.rows().map(|r| intention_label(r[COL_VY])).collect();
        obs.with_column(FeatureColumn::Intention, &intentions)
    }
}

/// Ordered list of transformer stages applied by fold.
#[derive(Default)]
pub struct TransformerChain {
    stages: Vec<Box<dyn ObservationTransformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; it runs after every stage already in the chain.
    pub fn with_stage<T: ObservationTransformer + 'static>(mut self, stage: T) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn ObservationTransformer>) {
        self.stages.push(stage);
    }

    /// Build the chain enabled by `cfg`.
    ///
    /// Stage order is fixed: noise, then confidence, then intention. The
    /// confidence stage therefore measures the noisy observation.
    pub fn from_config(cfg: &TransformConfig) -> Result<Self> {
        let mut chain = Self::new();
        if cfg.noise.enabled {
            chain = chain.with_stage(NoiseInjection::new(cfg.noise.std, cfg.noise.seed)?);
        }
        if cfg.confidence {
            chain = chain.with_stage(ConfidenceAugmentation);
        }
        if cfg.intention {
            chain = chain.with_stage(IntentionAugmentation);
        }
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Shape after every stage has run on an input of shape `input`.
    pub fn output_shape(&self, input: ObservationShape) -> ObservationShape {
        self.stages
            .iter()
            .fold(input, |shape, stage| stage.output_shape(shape))
    }

    /// Run every stage in order.
    pub fn apply(
        &mut self,
        obs: ObservationMatrix,
    ) -> std::result::Result<ObservationMatrix, ShapeError> {
        self.stages
            .iter_mut()
            .try_fold(obs, |obs, stage| stage.transform(obs))
    }
}

impl fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerChain")
            .field("stages", &self.stage_names())
            .finish()
    }
}
