/// Series, LagResult, LagSweep, CalibrationModel, AlignedPair, AgreementStats, PipelineError
/// core data structures and error handling
///
/// Core data types for the snow scale validation pipeline.
///
/// This module defines the shared domain model imported by all other modules.
/// It holds the types and the checks that keep their invariants; the
/// numerical work lives under `analysis`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// A single sampled signal: ordered (timestamp, value) pairs.
///
/// Timestamps are non-decreasing but not necessarily regular. A missing
/// sample is an explicit `None` and keeps its slot in the index, so two
/// series cut from the same logger file stay row-aligned.
///
/// Transformations never mutate a series in place; they build a new one and
/// append a step name to its lineage (e.g. `["thermal_corrected", "ma12c"]`).
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    name: String,
    timestamps: Vec<NaiveDateTime>,
    values: Vec<Option<f64>>,
    lineage: Vec<String>,
}

impl Series {
    /// Builds a series, rejecting mismatched lengths and out-of-order
    /// timestamps. Non-finite values are stored as missing.
    pub fn new(
        name: impl Into<String>,
        timestamps: Vec<NaiveDateTime>,
        values: Vec<Option<f64>>,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        if timestamps.len() != values.len() {
            return Err(PipelineError::MalformedInput(format!(
                "series '{}' has {} timestamps but {} values",
                name,
                timestamps.len(),
                values.len()
            )));
        }
        if let Some(pos) = timestamps.windows(2).position(|w| w[1] < w[0]) {
            return Err(PipelineError::MalformedInput(format!(
                "series '{}' timestamps go backwards at row {} ({} after {})",
                name,
                pos + 1,
                timestamps[pos + 1],
                timestamps[pos]
            )));
        }
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        Ok(Series {
            name,
            timestamps,
            values,
            lineage: Vec::new(),
        })
    }

    /// Builds a series from plain floats; `NaN` marks a missing sample.
    pub fn from_values(
        name: impl Into<String>,
        timestamps: Vec<NaiveDateTime>,
        values: Vec<f64>,
    ) -> Result<Self, PipelineError> {
        Self::new(name, timestamps, values.into_iter().map(Some).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Transformation steps applied since ingestion, oldest first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    /// Value recorded exactly at `timestamp`, if any. When a timestamp is
    /// repeated the first row wins.
    pub fn value_at_time(&self, timestamp: NaiveDateTime) -> Option<f64> {
        let idx = self.timestamps.partition_point(|t| *t < timestamp);
        match self.timestamps.get(idx) {
            Some(t) if *t == timestamp => self.value_at(idx),
            _ => None,
        }
    }

    /// Number of non-missing samples.
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// True when both series have the same timestamps row for row.
    pub fn shares_timeline(&self, other: &Series) -> bool {
        self.timestamps == other.timestamps
    }

    /// Returns a copy under a new name, keeping lineage.
    pub fn renamed(&self, name: impl Into<String>) -> Series {
        Series {
            name: name.into(),
            ..self.clone()
        }
    }

    /// New series on the same timeline with replacement values, recording
    /// `step` in the lineage.
    pub fn derive(
        &self,
        step: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<Series, PipelineError> {
        let mut derived = Series::new(self.name.clone(), self.timestamps.clone(), values)?;
        derived.lineage = self.lineage.clone();
        derived.lineage.push(step.into());
        Ok(derived)
    }

    /// Applies `f` to every present value (unit conversions, datum changes).
    /// Results that are not finite become missing.
    pub fn map_values(&self, step: impl Into<String>, f: impl Fn(f64) -> f64) -> Series {
        let mut lineage = self.lineage.clone();
        lineage.push(step.into());
        Series {
            name: self.name.clone(),
            timestamps: self.timestamps.clone(),
            values: self
                .values
                .iter()
                .map(|v| v.map(&f).filter(|x| x.is_finite()))
                .collect(),
            lineage,
        }
    }

    /// Marks values outside `[min, max]` as missing. Either bound may be open.
    pub fn mask_outside(&self, min: Option<f64>, max: Option<f64>) -> Series {
        let lo = min.unwrap_or(f64::NEG_INFINITY);
        let hi = max.unwrap_or(f64::INFINITY);
        let mut lineage = self.lineage.clone();
        lineage.push(format!("mask[{:?},{:?}]", min, max));
        Series {
            name: self.name.clone(),
            timestamps: self.timestamps.clone(),
            values: self
                .values
                .iter()
                .map(|v| v.filter(|x| *x >= lo && *x <= hi))
                .collect(),
            lineage,
        }
    }

    /// Rows whose timestamp lies in `[start, end]` (inclusive, open bounds
    /// allowed).
    pub fn between(&self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Series {
        let from = start.map_or(0, |s| self.timestamps.partition_point(|t| *t < s));
        let to = end.map_or(self.len(), |e| self.timestamps.partition_point(|t| *t <= e));
        let to = to.max(from);
        let mut lineage = self.lineage.clone();
        if start.is_some() || end.is_some() {
            lineage.push("period".to_string());
        }
        Series {
            name: self.name.clone(),
            timestamps: self.timestamps[from..to].to_vec(),
            values: self.values[from..to].to_vec(),
            lineage,
        }
    }
}

// ---------------------------------------------------------------------------
// Lag search types
// ---------------------------------------------------------------------------

/// Scoring rule for a lag search. One rule is used for every lag of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagScore {
    /// Pearson correlation coefficient (symmetric).
    #[default]
    Pearson,
    /// Coefficient of determination, reference treated as ground truth and
    /// the shifted candidate as its prediction.
    RSquared,
}

/// Score of a single candidate lag.
///
/// `lag` is in samples; `score` is `-inf` when the overlap had no usable
/// pairs or the score was undefined (e.g. a constant input).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LagResult {
    pub lag: i64,
    pub score: f64,
    /// Jointly non-missing pairs the score was computed over.
    pub overlap: usize,
}

/// Every lag examined by one search, in ascending lag order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LagSweep {
    pub scoring: LagScore,
    pub results: Vec<LagResult>,
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Ordinary least-squares line `response ≈ slope · predictor + intercept`.
///
/// Immutable once fit; `n` is the number of pairs it was fit over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationModel {
    pub slope: f64,
    pub intercept: f64,
    pub n: usize,
}

impl CalibrationModel {
    pub fn predict(&self, predictor: f64) -> f64 {
        self.slope * predictor + self.intercept
    }
}

// ---------------------------------------------------------------------------
// Aligned pair
// ---------------------------------------------------------------------------

/// Reference and candidate values matched onto one timestamp axis.
///
/// Every row has a timestamp taken from one of the sources and two present
/// values. Rows are in chronological order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlignedPair {
    timestamps: Vec<NaiveDateTime>,
    reference: Vec<f64>,
    candidate: Vec<f64>,
}

impl AlignedPair {
    /// Builds a pair from `(timestamp, reference, candidate)` rows. Rows with
    /// a non-finite value are dropped.
    pub fn from_rows(rows: impl IntoIterator<Item = (NaiveDateTime, f64, f64)>) -> Self {
        let mut pair = AlignedPair::default();
        for (t, r, c) in rows {
            if r.is_finite() && c.is_finite() {
                pair.timestamps.push(t);
                pair.reference.push(r);
                pair.candidate.push(c);
            }
        }
        pair
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn reference(&self) -> &[f64] {
        &self.reference
    }

    pub fn candidate(&self) -> &[f64] {
        &self.candidate
    }

    pub fn rows(&self) -> impl Iterator<Item = (NaiveDateTime, f64, f64)> + '_ {
        self.timestamps
            .iter()
            .zip(&self.reference)
            .zip(&self.candidate)
            .map(|((t, r), c)| (*t, *r, *c))
    }

    /// Keeps only rows for which `keep(reference, candidate)` holds.
    pub fn retain(&self, keep: impl Fn(f64, f64) -> bool) -> AlignedPair {
        AlignedPair::from_rows(self.rows().filter(|(_, r, c)| keep(*r, *c)))
    }

    /// Replaces every candidate value with `f(candidate)`.
    pub fn map_candidate(&self, f: impl Fn(f64) -> f64) -> AlignedPair {
        AlignedPair::from_rows(self.rows().map(|(t, r, c)| (t, r, f(c))))
    }
}

// ---------------------------------------------------------------------------
// Agreement statistics
// ---------------------------------------------------------------------------

/// Which quantity is reported as R².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum R2Convention {
    /// `1 − SS_res / SS_tot`, reference as truth, candidate as prediction.
    #[default]
    CoefficientOfDetermination,
    /// Square of the Pearson correlation. Blind to systematic offsets.
    SquaredPearson,
}

/// Sign convention of Bland-Altman differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceSign {
    #[default]
    CandidateMinusReference,
    ReferenceMinusCandidate,
}

/// Agreement between a candidate and a reference over one `AlignedPair`.
///
/// Every field is computed over the same `n` rows. `r2` and `pearson_r` are
/// `None` when a series has zero variance; `mape` is `None` when every
/// reference value is zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgreementStats {
    pub n: usize,
    pub r2: Option<f64>,
    pub r2_convention: R2Convention,
    pub rmse: f64,
    pub mae: f64,
    pub mape: Option<f64>,
    /// Rows with a non-zero reference, i.e. the MAPE denominator.
    pub mape_rows: usize,
    pub pearson_r: Option<f64>,
    pub difference: DifferenceSign,
    pub mean_diff: f64,
    /// Population standard deviation (divisor N) of the differences.
    pub std_diff: f64,
    pub loa_upper: f64,
    pub loa_lower: f64,
    pub n_outside_loa: usize,
    pub pct_outside_loa: f64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by ingestion and the correction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Smoothing (or matching) window parameters are out of range.
    InvalidWindow(String),
    /// Too few (temperature, weight) pairs to fit the thermal model.
    InsufficientCalibrationData { required: usize, found: usize },
    /// A lag search or alignment found no jointly valid samples.
    NoOverlap(String),
    /// Input could not be parsed or violates the series invariants.
    MalformedInput(String),
    /// An input file could not be read.
    Io { path: String, message: String },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidWindow(msg) => write!(f, "Invalid window: {}", msg),
            PipelineError::InsufficientCalibrationData { required, found } => write!(
                f,
                "Insufficient calibration data: need {} valid pairs, found {}",
                required, found
            ),
            PipelineError::NoOverlap(msg) => write!(f, "No overlap: {}", msg),
            PipelineError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            PipelineError::Io { path, message } => {
                write!(f, "Could not read {}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
