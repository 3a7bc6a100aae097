// src/config.rs
//
// Construction-time configuration for the arbitration / expansion layer.
//
// Everything here is supplied once when the stack is built and never mutated
// afterward: noise level, transformer enable flags, the two arbitration
// thresholds (primitive vs skill), fallback velocity bands and the skill
// table.
//
// Sources, lowest to highest precedence:
// 1. Preset defaults (highway / roundabout)
// 2. YAML file (optional)
// 3. HIGHWAY_GUARD_* environment variables

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GuardError, Result};
use crate::rl::confidence::{GAP_WINDOW, SELF_REPORT_WEIGHT};
use crate::rl::skills::SkillTable;

/// Human-readable config / release version.
pub const CONFIG_VERSION: &str = "highway-guard-v0.1.0";

/// Scenario preset, matching the two road layouts the stack was tuned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Highway,
    Roundabout,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Highway => "highway",
            Preset::Roundabout => "roundabout",
        }
    }

    /// Parse a preset name (case-insensitive). Returns None if unrecognized.
    pub fn parse(s: &str) -> Option<Preset> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highway" | "hw" => Some(Preset::Highway),
            "roundabout" | "rb" => Some(Preset::Roundabout),
            _ => None,
        }
    }
}

/// Which layers of the stack are switched on.
///
/// Mirrors the ablation grid the layer is evaluated on: each mode adds one
/// layer on top of the previous ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExperimentMode {
    /// Raw observations, unwrapped policy.
    Baseline,
    /// Noise + confidence augmentation.
    Noise,
    /// Noise + confidence + intention augmentation.
    NoiseIntent,
    /// Noise + confidence, primitive safety arbiter.
    Safe,
    /// Noise + confidence, skill expansion with skill safety arbiter.
    SafeSkill,
}

impl ExperimentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentMode::Baseline => "baseline",
            ExperimentMode::Noise => "noise",
            ExperimentMode::NoiseIntent => "noise-intent",
            ExperimentMode::Safe => "safe",
            ExperimentMode::SafeSkill => "safe-skill",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub enabled: bool,
    /// Standard deviation of the Gaussian perturbation.
    pub std: f64,
    /// Seed for reproducible noise; None draws a fresh seed.
    pub seed: Option<u64>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            std: 0.5,
            seed: None,
        }
    }
}

/// Transformer enable flags. Stage order is fixed: noise, confidence, intention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub noise: NoiseConfig,
    pub confidence: bool,
    pub intention: bool,
}

/// Primitive-action safety arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub enabled: bool,
    /// Override when blended confidence <= threshold.
    pub threshold: f64,
    /// Look-ahead window for in-lane gaps.
    pub gap_window: f64,
    /// Weight of ego self-reported confidence in the blend.
    pub self_report_weight: f64,
    /// Accelerate below this ego vx.
    pub slow_vx: f64,
    /// Decelerate above this ego vx.
    pub fast_vx: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.7,
            gap_window: GAP_WINDOW,
            self_report_weight: SELF_REPORT_WEIGHT,
            slow_vx: 0.5,
            fast_vx: 1.0,
        }
    }
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("safety.threshold", self.threshold)?;
        check_unit("safety.self_report_weight", self.self_report_weight)?;
        if !self.gap_window.is_finite() || self.gap_window <= 0.0 {
            return Err(GuardError::config(
                "safety.gap_window",
                format!("must be finite and > 0, got {}", self.gap_window),
            ));
        }
        if !self.slow_vx.is_finite() || !self.fast_vx.is_finite() || self.slow_vx > self.fast_vx {
            return Err(GuardError::config(
                "safety.slow_vx",
                format!(
                    "velocity bands must be finite with slow_vx <= fast_vx, got {} / {}",
                    self.slow_vx, self.fast_vx
                ),
            ));
        }
        Ok(())
    }
}

/// Skill-level safety arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillSafetyConfig {
    pub enabled: bool,
    /// Override to SLOW_DOWN when ego confidence < threshold.
    pub threshold: f64,
}

impl Default for SkillSafetyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.65,
        }
    }
}

impl SkillSafetyConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("skills.safety.threshold", self.threshold)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillConfig {
    /// Expose skills instead of primitive actions to the policy.
    pub enabled: bool,
    pub table: SkillTable,
    pub safety: SkillSafetyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub version: String,
    pub preset: Preset,
    pub transform: TransformConfig,
    pub safety: SafetyConfig,
    pub skills: SkillConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::highway()
    }
}

impl GuardConfig {
    /// Multi-lane highway preset (noise std 0.5). All layers off.
    pub fn highway() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            preset: Preset::Highway,
            transform: TransformConfig {
                noise: NoiseConfig {
                    std: 0.5,
                    ..NoiseConfig::default()
                },
                ..TransformConfig::default()
            },
            safety: SafetyConfig::default(),
            skills: SkillConfig::default(),
        }
    }

    /// Single-lane roundabout preset (noise std 0.2). All layers off.
    pub fn roundabout() -> Self {
        let mut cfg = Self::highway();
        cfg.preset = Preset::Roundabout;
        cfg.transform.noise.std = 0.2;
        cfg
    }

    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Highway => Self::highway(),
            Preset::Roundabout => Self::roundabout(),
        }
    }

    /// Switch layers on for an experiment mode. Thresholds and noise level
    /// keep their configured values.
    pub fn with_mode(mut self, mode: ExperimentMode) -> Self {
        let noisy = mode != ExperimentMode::Baseline;
        self.transform.noise.enabled = noisy;
        self.transform.confidence = noisy;
        self.transform.intention = mode == ExperimentMode::NoiseIntent;
        self.safety.enabled = mode == ExperimentMode::Safe;
        self.skills.enabled = mode == ExperimentMode::SafeSkill;
        self.skills.safety.enabled = mode == ExperimentMode::SafeSkill;
        self
    }

    /// Parse a YAML config on top of the defaults of the preset it names
    /// (highway when it names none). Fields the file omits keep the preset's
    /// values.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let overlay = if yaml.trim().is_empty() {
            serde_yaml::Value::Null
        } else {
            serde_yaml::from_str(yaml).map_err(yaml_error)?
        };
        let preset = match overlay.get("preset") {
            Some(v) => serde_yaml::from_value::<Preset>(v.clone()).map_err(yaml_error)?,
            None => Preset::Highway,
        };

        let mut merged = serde_yaml::to_value(Self::for_preset(preset)).map_err(yaml_error)?;
        merge_yaml(&mut merged, overlay);
        let cfg: GuardConfig = serde_yaml::from_value(merged).map_err(yaml_error)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| GuardError::io(path, e))?;
        Self::from_yaml_str(&contents)
    }

    /// Preset defaults plus HIGHWAY_GUARD_* environment overrides:
    ///
    ///   - HIGHWAY_GUARD_NOISE_STD          (f64, >= 0)
    ///   - HIGHWAY_GUARD_NOISE_SEED         (u64)
    ///   - HIGHWAY_GUARD_SAFETY_THRESHOLD   (f64, [0, 1])
    ///   - HIGHWAY_GUARD_SKILL_THRESHOLD    (f64, [0, 1])
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn from_env_or_preset(preset: Preset) -> Self {
        let mut cfg = Self::for_preset(preset);
        cfg.apply_env_overrides();
        cfg
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_f64("HIGHWAY_GUARD_NOISE_STD", |v| v >= 0.0) {
            self.transform.noise.std = v;
        }
        if let Some(v) = env_u64("HIGHWAY_GUARD_NOISE_SEED") {
            self.transform.noise.seed = Some(v);
        }
        if let Some(v) = env_f64("HIGHWAY_GUARD_SAFETY_THRESHOLD", in_unit) {
            self.safety.threshold = v;
        }
        if let Some(v) = env_f64("HIGHWAY_GUARD_SKILL_THRESHOLD", in_unit) {
            self.skills.safety.threshold = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let std = self.transform.noise.std;
        if !std.is_finite() || std < 0.0 {
            return Err(GuardError::config(
                "transform.noise.std",
                format!("must be finite and >= 0, got {std}"),
            ));
        }
        self.safety.validate()?;
        self.skills.safety.validate()?;
        // The skill arbiter reads only the confidence feature.
        if self.skills.enabled && self.skills.safety.enabled && !self.transform.confidence {
            return Err(GuardError::config(
                "skills.safety.enabled",
                "requires transform.confidence to be enabled",
            ));
        }
        Ok(())
    }

    /// Stable FNV-1a hash of the debug representation, for run headers.
    pub fn fingerprint(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;
        let mut h = FNV_OFFSET;
        for b in format!("{self:?}").as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }
}

fn yaml_error(e: serde_yaml::Error) -> GuardError {
    GuardError::Parse {
        what: "guard config YAML".to_string(),
        message: e.to_string(),
    }
}

/// Overlay `top` onto `base`: mappings merge key by key, anything else replaces.
/// A null overlay (an empty file) leaves `base` as is.
fn merge_yaml(base: &mut serde_yaml::Value, top: serde_yaml::Value) {
    use serde_yaml::Value;
    match (base, top) {
        (Value::Mapping(base), Value::Mapping(top)) => {
            for (key, value) in top {
                match base.get_mut(&key) {
                    Some(slot) => merge_yaml(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}

fn in_unit(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn check_unit(field: &str, value: f64) -> Result<()> {
    if !in_unit(value) {
        return Err(GuardError::config(
            field,
            format!("must be within [0, 1], got {value}"),
        ));
    }
    Ok(())
}

fn env_f64(name: &str, accept: impl Fn(f64) -> bool) -> Option<f64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && accept(v) => {
            info!(var = name, value = v, "config override from environment");
            Some(v)
        }
        _ => {
            warn!(var = name, raw = %raw, "could not use environment override; keeping default");
            None
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => {
            info!(var = name, value = v, "config override from environment");
            Some(v)
        }
        Err(_) => {
            warn!(var = name, raw = %raw, "could not parse environment override as u64; keeping default");
            None
        }
    }
}
