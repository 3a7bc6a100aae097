// src/rl/override_log.rs
//
// Append-only record of arbiter overrides.
//
// Each arbiter owns one log for its lifetime; entries are never mutated and
// appear in strict decision order. The log is exposed read-only for
// post-episode reporting.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// One override decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideEntry {
    /// Decision index within the owning arbiter (0-based).
    pub step: u64,
    /// Confidence that triggered the override.
    pub confidence: f64,
    /// Label of the substituted action or skill.
    pub chosen: String,
    /// Label of what the wrapped policy selected, when it was consulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideLog {
    entries: Vec<OverrideEntry>,
}

impl OverrideLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, entry: OverrideEntry) {
        debug_assert!(
            self.entries.last().map_or(true, |last| last.step < entry.step),
            "override entries must be appended in step order"
        );
        self.entries.push(entry);
    }

    /// Rebuild a log from exported entries, e.g. a pipeline summary.
    /// Fails unless steps are strictly increasing.
    pub fn from_entries(entries: Vec<OverrideEntry>) -> Result<Self> {
        if let Some(pair) = entries.windows(2).find(|w| w[0].step >= w[1].step) {
            return Err(GuardError::OverrideOrder {
                step: pair[1].step,
                previous: pair[0].step,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[OverrideEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverrideEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded at or after decision `step`.
    pub fn since(&self, step: u64) -> &[OverrideEntry] {
        let start = self.entries.partition_point(|e| e.step < step);
        &self.entries[start..]
    }

    /// Mean confidence over all overrides, if any.
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|e| e.confidence).sum();
        Some(sum / self.entries.len() as f64)
    }

    /// Write one JSON object per entry.
    pub fn write_jsonl<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| GuardError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            let line = serde_json::to_string(entry).map_err(|e| GuardError::Serialize {
                what: "override entry".to_string(),
                message: e.to_string(),
            })?;
            writeln!(writer, "{line}").map_err(|e| GuardError::io(path, e))?;
        }
        writer.flush().map_err(|e| GuardError::io(path, e))
    }
}

impl<'a> IntoIterator for &'a OverrideLog {
    type Item = &'a OverrideEntry;
    type IntoIter = std::slice::Iter<'a, OverrideEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
