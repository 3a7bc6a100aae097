// src/rl/telemetry.rs
//
// Per-decision telemetry for guarded rollouts.
//
// Each JSONL line is either an episode boundary marker or a DecisionRecord:
// - obs_version, policy_version, config_version
// - the action actually executed (after any arbiter override)
// - ego confidence as seen by the policy, when the observation carries it
// - reward and termination flags for the step
//
// Writing is best-effort: an I/O failure disables the sink rather than
// aborting the rollout.

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{self, Value as JsonValue};

use super::observation::OBS_VERSION;
use super::runner::TerminationReason;

pub const TELEMETRY_MODE_VAR: &str = "HIGHWAY_GUARD_TELEMETRY_MODE";
pub const TELEMETRY_PATH_VAR: &str = "HIGHWAY_GUARD_TELEMETRY_PATH";

/// One policy decision as executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub obs_version: u32,
    pub policy_version: String,
    pub config_version: String,
    pub episode_id: u64,
    /// Decision index within the episode.
    pub step: u64,
    /// Executed action label.
    pub action: String,
    pub ego_confidence: Option<f64>,
    /// Override count of the wrapping arbiter so far, if any.
    pub overrides_total: Option<usize>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub crashed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeMarkerType {
    Start,
    End,
}

/// Episode boundary marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMarker {
    pub episode_id: u64,
    pub seed: u64,
    pub marker_type: EpisodeMarkerType,
    pub termination_reason: Option<TerminationReason>,
    pub total_reward: Option<f64>,
    pub total_steps: Option<u64>,
}

/// JSONL decision sink.
///
/// Controlled by environment variables:
/// - HIGHWAY_GUARD_TELEMETRY_MODE: "off" (default) or "jsonl"
/// - HIGHWAY_GUARD_TELEMETRY_PATH: path to JSONL file
pub struct DecisionTelemetry {
    enabled: bool,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl Default for DecisionTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTelemetry {
    /// Disabled sink.
    pub fn new() -> Self {
        Self {
            enabled: false,
            path: None,
            writer: None,
            written: 0,
        }
    }

    pub fn from_env() -> Self {
        let enabled = env::var(TELEMETRY_MODE_VAR)
            .map(|s| s.eq_ignore_ascii_case("jsonl"))
            .unwrap_or(false);
        let path = env::var(TELEMETRY_PATH_VAR).ok().map(PathBuf::from);

        Self {
            enabled: enabled && path.is_some(),
            path,
            writer: None,
            written: 0,
        }
    }

    pub fn enable(path: PathBuf) -> Self {
        Self {
            enabled: true,
            path: Some(path),
            writer: None,
            written: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Lines successfully handed to the writer.
    pub fn lines_written(&self) -> u64 {
        self.written
    }

    fn ensure_writer(&mut self) -> Option<&mut BufWriter<File>> {
        if !self.enabled {
            return None;
        }

        if self.writer.is_none() {
            let path = self.path.as_ref()?;
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "telemetry disabled");
                    self.enabled = false;
                    return None;
                }
            };
            self.writer = Some(BufWriter::new(file));
        }

        self.writer.as_mut()
    }

    fn write_json(&mut self, value: &JsonValue) {
        let Some(writer) = self.ensure_writer() else {
            return;
        };

        let line = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(_) => return,
        };

        if writeln!(writer, "{}", line).is_err() {
            self.enabled = false;
            self.writer = None;
            return;
        }
        self.written += 1;
    }

    fn write<T: Serialize>(&mut self, record: &T) {
        if !self.enabled {
            return;
        }
        let value = serde_json::to_value(record).unwrap_or_default();
        self.write_json(&value);
    }

    pub fn log_episode_start(&mut self, episode_id: u64, seed: u64) {
        self.write(&EpisodeMarker {
            episode_id,
            seed,
            marker_type: EpisodeMarkerType::Start,
            termination_reason: None,
            total_reward: None,
            total_steps: None,
        });
    }

    pub fn log_episode_end(
        &mut self,
        episode_id: u64,
        seed: u64,
        reason: TerminationReason,
        total_reward: f64,
        total_steps: u64,
    ) {
        self.write(&EpisodeMarker {
            episode_id,
            seed,
            marker_type: EpisodeMarkerType::End,
            termination_reason: Some(reason),
            total_reward: Some(total_reward),
            total_steps: Some(total_steps),
        });
    }

    pub fn log_decision(&mut self, record: &DecisionRecord) {
        self.write(record);
    }

    pub fn flush(&mut self) {
        if let Some(writer) = &mut self.writer {
            let _ = writer.flush();
        }
    }
}

impl Drop for DecisionTelemetry {
    fn drop(&mut self) {
        self.flush();
    }
}

impl DecisionRecord {
    pub fn new(policy_version: &str, config_version: &str, episode_id: u64, step: u64) -> Self {
        Self {
            obs_version: OBS_VERSION,
            policy_version: policy_version.to_string(),
            config_version: config_version.to_string(),
            episode_id,
            step,
            action: String::new(),
            ego_confidence: None,
            overrides_total: None,
            reward: 0.0,
            terminated: false,
            truncated: false,
            crashed: false,
        }
    }
}
