// src/rl/observation.rs
//
// Per-step observation matrix consumed by every decision stage.
//
// Layout:
// - one row per vehicle, row 0 is always the ego vehicle
// - base kinematic columns: presence, x, lane, vx, vy
// - zero or more labelled trailing columns appended by transformers
//
// Rows are stored row-major in a single Vec so that appending a column is a
// single rebuild and row access is a slice.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current observation schema version.
/// Increment when the base column layout changes.
pub const OBS_VERSION: u32 = 1;

pub const COL_PRESENCE: usize = 0;
pub const COL_X: usize = 1;
pub const COL_LANE: usize = 2;
pub const COL_VX: usize = 3;
pub const COL_VY: usize = 4;

/// Number of base kinematic columns every observation must carry.
pub const BASE_FEATURES: usize = 5;

/// Columns subject to sensor noise and per-row confidence (x, lane, vx, vy).
pub const KINEMATIC_COLUMNS: Range<usize> = COL_X..COL_VY + 1;

/// Label of a trailing column appended by a transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    Confidence,
    Intention,
}

impl FeatureColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureColumn::Confidence => "confidence",
            FeatureColumn::Intention => "intention",
        }
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared (vehicles, features) shape of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationShape {
    pub vehicles: usize,
    pub features: usize,
}

impl ObservationShape {
    pub fn new(vehicles: usize, features: usize) -> Self {
        Self { vehicles, features }
    }

    /// Shape after appending one trailing feature column.
    pub fn with_extra_column(self) -> Self {
        Self {
            vehicles: self.vehicles,
            features: self.features + 1,
        }
    }
}

impl fmt::Display for ObservationShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.vehicles, self.features)
    }
}

/// Shape-contract violations. Never repaired by padding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("observation has no rows")]
    Empty,

    #[error("row {row} has {found} features, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("observation has {found} feature columns, at least {required} required")]
    TooFewFeatures { required: usize, found: usize },

    #[error("observation has no '{feature}' column")]
    MissingFeature { feature: FeatureColumn },

    #[error("appended column has {found} values for {expected} rows")]
    ColumnLength { expected: usize, found: usize },

    #[error("observation shape {found} does not match declared shape {expected}")]
    ShapeMismatch {
        expected: ObservationShape,
        found: ObservationShape,
    },
}

/// Observation matrix of shape (V, F).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationMatrix {
    obs_version: u32,
    vehicles: usize,
    features: usize,
    data: Vec<f64>,
    appended: Vec<FeatureColumn>,
}

impl ObservationMatrix {
    /// Build a matrix from per-vehicle rows (row 0 = ego).
    ///
    /// Every row must have the same length, and that length must cover the
    /// base kinematic columns.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ShapeError> {
        let first = rows.first().ok_or(ShapeError::Empty)?;
        let features = first.len();
        if features < BASE_FEATURES {
            return Err(ShapeError::TooFewFeatures {
                required: BASE_FEATURES,
                found: features,
            });
        }

        let vehicles = rows.len();
        let mut data = Vec::with_capacity(vehicles * features);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != features {
                return Err(ShapeError::RaggedRow {
                    row,
                    expected: features,
                    found: values.len(),
                });
            }
            data.extend(values);
        }

        Ok(Self {
            obs_version: OBS_VERSION,
            vehicles,
            features,
            data,
            appended: Vec::new(),
        })
    }

    pub fn obs_version(&self) -> u32 {
        self.obs_version
    }

    pub fn shape(&self) -> ObservationShape {
        ObservationShape::new(self.vehicles, self.features)
    }

    pub fn vehicles(&self) -> usize {
        self.vehicles
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// Labels of the trailing columns, in append order.
    pub fn appended(&self) -> &[FeatureColumn] {
        &self.appended
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.features;
        &self.data[start..start + self.features]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.features)
    }

    /// Ego vehicle row.
    pub fn ego(&self) -> &[f64] {
        self.row(0)
    }

    /// Rows of every vehicle other than ego.
    pub fn others(&self) -> impl Iterator<Item = &[f64]> {
        self.rows().skip(1)
    }

    /// Mutable view of the kinematic columns (x, lane, vx, vy) of one row.
    pub fn kinematics_mut(&mut self, index: usize) -> &mut [f64] {
        let start = index * self.features;
        &mut self.data[start + KINEMATIC_COLUMNS.start..start + KINEMATIC_COLUMNS.end]
    }

    /// Column index of a labelled trailing feature, if present.
    ///
    /// When a label was appended more than once the latest column wins.
    pub fn column_of(&self, feature: FeatureColumn) -> Option<usize> {
        let base = self.features - self.appended.len();
        self.appended
            .iter()
            .rposition(|c| *c == feature)
            .map(|pos| base + pos)
    }

    /// Value of a labelled feature for one row, if the column is present.
    pub fn feature(&self, row: usize, feature: FeatureColumn) -> Option<f64> {
        self.column_of(feature).map(|col| self.row(row)[col])
    }

    /// Append a labelled trailing column. Output shape is (V, F + 1).
    pub fn with_column(self, label: FeatureColumn, values: &[f64]) -> Result<Self, ShapeError> {
        if values.len() != self.vehicles {
            return Err(ShapeError::ColumnLength {
                expected: self.vehicles,
                found: values.len(),
            });
        }

        let features = self.features + 1;
        let mut data = Vec::with_capacity(self.vehicles * features);
        for (row, value) in self.data.chunks_exact(self.features).zip(values) {
            data.extend_from_slice(row);
            data.push(*value);
        }

        let mut appended = self.appended;
        appended.push(label);

        Ok(Self {
            obs_version: self.obs_version,
            vehicles: self.vehicles,
            features,
            data,
            appended,
        })
    }

    /// Fail unless the matrix has exactly the declared shape.
    pub fn ensure_shape(&self, expected: ObservationShape) -> Result<(), ShapeError> {
        let found = self.shape();
        if found != expected {
            return Err(ShapeError::ShapeMismatch { expected, found });
        }
        Ok(())
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows().map(|r| r.to_vec()).collect()
    }

    /// Serialize to canonical JSON (deterministic field order).
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
