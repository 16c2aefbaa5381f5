/// Lag discovery between two row-aligned signals, and lag application.
///
/// # Sign convention
/// A lag of `L` compares `candidate[t]` with `reference[t − L]`. A positive
/// lag therefore means the candidate trails the reference by `L` samples.
/// To put the candidate back onto the reference timeline its value at `t`
/// must be taken from `candidate[t + L]`, which is what
/// [`align_to_reference`] does.
///
/// Shifting is a true time shift: samples pushed past either end are lost and
/// the gap opened at the other end is filled according to [`BoundaryFill`].
/// Nothing wraps around.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::analysis::numeric;
use crate::model::{LagResult, LagScore, LagSweep, PipelineError, Series};

// ---------------------------------------------------------------------------
// Boundary policy
// ---------------------------------------------------------------------------

/// How the gap opened by a shift is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryFill {
    /// Propagate the first valid shifted value backward into a leading gap.
    /// A trailing gap stays missing; values are never carried forward.
    #[default]
    Backward,
    /// Fill both ends from the nearest valid shifted value, forward into a
    /// trailing gap as well.
    Nearest,
    /// Leave the gap missing.
    Missing,
}

// ---------------------------------------------------------------------------
// Lag search
// ---------------------------------------------------------------------------

impl LagSweep {
    /// Highest-scoring lag. Ties go to the smallest `|lag|`, then to the
    /// negative lag. `None` when no lag produced a finite score.
    pub fn best(&self) -> Option<&LagResult> {
        self.results
            .iter()
            .filter(|r| r.score.is_finite())
            .fold(None, |best: Option<&LagResult>, r| match best {
                None => Some(r),
                Some(b)
                    if r.score > b.score
                        || (r.score == b.score && (r.lag.abs(), r.lag) < (b.lag.abs(), b.lag)) =>
                {
                    Some(r)
                }
                keep => keep,
            })
    }
}

/// Scores every lag in `lags` (ascending).
///
/// The two slices are row-aligned: index `t` of each refers to the same
/// sample time. Only jointly present pairs enter a score.
pub fn lag_sweep(
    reference: &[Option<f64>],
    candidate: &[Option<f64>],
    lags: RangeInclusive<i64>,
    scoring: LagScore,
) -> LagSweep {
    let results = lags
        .map(|lag| {
            let (r, c) = lagged_pairs(reference, candidate, lag);
            let score = match scoring {
                LagScore::Pearson => numeric::pearson(&r, &c),
                LagScore::RSquared => numeric::r_squared(&r, &c),
            };
            LagResult {
                lag,
                score: score.unwrap_or(f64::NEG_INFINITY),
                overlap: r.len(),
            }
        })
        .collect();
    LagSweep { scoring, results }
}

/// Finds the lag that maximises agreement between `candidate` and
/// `reference`.
///
/// # Errors
/// `NoOverlap` if the range is empty or no lag yields a finite score.
pub fn best_lag(
    reference: &[Option<f64>],
    candidate: &[Option<f64>],
    lags: RangeInclusive<i64>,
    scoring: LagScore,
) -> Result<LagResult, PipelineError> {
    let range = format!("{}..={}", lags.start(), lags.end());
    let sweep = lag_sweep(reference, candidate, lags, scoring);
    sweep.best().copied().ok_or_else(|| {
        PipelineError::NoOverlap(format!(
            "no lag in {} produced a usable {:?} score",
            range, scoring
        ))
    })
}

/// [`best_lag`] over two series that must share one timeline.
pub fn best_lag_series(
    reference: &Series,
    candidate: &Series,
    lags: RangeInclusive<i64>,
    scoring: LagScore,
) -> Result<LagResult, PipelineError> {
    if !reference.shares_timeline(candidate) {
        return Err(PipelineError::MalformedInput(format!(
            "lag search needs '{}' and '{}' on the same timeline",
            reference.name(),
            candidate.name()
        )));
    }
    best_lag(reference.values(), candidate.values(), lags, scoring)
}

fn lagged_pairs(reference: &[Option<f64>], candidate: &[Option<f64>], lag: i64) -> (Vec<f64>, Vec<f64>) {
    let start = lag.max(0);
    let end = (candidate.len() as i64).min(reference.len() as i64 + lag);
    (start..end.max(start))
        .filter_map(|t| {
            let r = reference[(t - lag) as usize]?;
            let c = candidate[t as usize]?;
            Some((r, c))
        })
        .unzip()
}

// ---------------------------------------------------------------------------
// Lag application
// ---------------------------------------------------------------------------

/// Time-shifts `series` by `lag` samples: output at `t` is input at
/// `t − lag`.
pub fn shift(series: &Series, lag: i64, fill: BoundaryFill) -> Series {
    let values = series.values();
    let n = values.len() as i64;
    let mut out: Vec<Option<f64>> = (0..n)
        .map(|t| {
            let src = t - lag;
            if (0..n).contains(&src) {
                values[src as usize]
            } else {
                None
            }
        })
        .collect();

    if fill != BoundaryFill::Missing && lag != 0 && lag.abs() < n {
        let gap = lag.unsigned_abs() as usize;
        let len = out.len();
        if lag > 0 {
            let nearest = out[gap..].iter().flatten().next().copied();
            out[..gap].iter_mut().for_each(|v| *v = nearest);
        } else if fill == BoundaryFill::Nearest {
            let nearest = out[..len - gap].iter().rev().flatten().next().copied();
            out[len - gap..].iter_mut().for_each(|v| *v = nearest);
        }
    }

    // Same length and timeline as the input, so this cannot fail.
    series
        .derive(format!("shift{:+}", lag), out)
        .unwrap_or_else(|_| series.clone())
}

/// Re-times `candidate` by a lag found with [`best_lag`] so that each of its
/// samples lines up with the reference sample it matched.
pub fn align_to_reference(candidate: &Series, lag: i64, fill: BoundaryFill) -> Series {
    shift(candidate, -lag, fill)
}
