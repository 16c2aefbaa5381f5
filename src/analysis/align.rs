/// Nearest-timestamp alignment of two series recorded at different rates.
///
/// The sparser series (fewer valid samples) drives: each of its valid rows is
/// matched to the nearest valid row of the denser series, if one lies within
/// the tolerance. Matching is one-to-one. When two driving rows compete for
/// the same dense sample the closer one gets it and the other falls back to
/// its next-nearest free sample, or is dropped. Unmatched rows are never
/// null-filled. Equal distances resolve to the earlier candidate.
///
/// Range checks on the matched values (negative or absurd weights) are the
/// caller's job; see `AlignedPair::retain`.

use chrono::{Duration, NaiveDateTime};

use crate::logging::{self, Stage};
use crate::model::{AlignedPair, PipelineError, Series};

/// Aligns `candidate` against `reference` within `tolerance`.
///
/// Output rows carry the driving (sparser) series' timestamps in
/// chronological order, so the pair never has more rows than the shorter
/// input.
///
/// # Errors
/// - `InvalidWindow` for a negative tolerance.
/// - `NoOverlap` when no row finds a partner.
pub fn align(
    reference: &Series,
    candidate: &Series,
    tolerance: Duration,
) -> Result<AlignedPair, PipelineError> {
    if tolerance < Duration::zero() {
        return Err(PipelineError::InvalidWindow(format!(
            "alignment tolerance must not be negative, got {}",
            tolerance
        )));
    }
    let reference_points = valid_points(reference);
    let candidate_points = valid_points(candidate);
    let reference_drives = reference_points.len() <= candidate_points.len();

    let (driver, dense) = if reference_drives {
        (&reference_points, &candidate_points)
    } else {
        (&candidate_points, &reference_points)
    };

    let matches = assign(driver, dense, tolerance);
    let rows = driver.iter().zip(&matches).filter_map(|(&(t, v), m)| {
        let matched = dense[(*m)?].1;
        Some(if reference_drives {
            (t, v, matched)
        } else {
            (t, matched, v)
        })
    });
    let pair = AlignedPair::from_rows(rows);

    if pair.is_empty() {
        return Err(PipelineError::NoOverlap(format!(
            "no '{}' sample within {} of a '{}' sample",
            candidate.name(),
            tolerance,
            reference.name()
        )));
    }
    logging::debug(
        Stage::Align,
        None,
        &format!(
            "matched {} of {} '{}' rows",
            pair.len(),
            driver.len(),
            if reference_drives { reference.name() } else { candidate.name() }
        ),
    );
    Ok(pair)
}

fn valid_points(series: &Series) -> Vec<(NaiveDateTime, f64)> {
    series
        .timestamps()
        .iter()
        .zip(series.values())
        .filter_map(|(t, v)| Some((*t, (*v)?)))
        .collect()
}

/// Dense index matched to each driving row.
///
/// Every (driver, dense) pair within `tolerance` is a candidate; pairs are
/// taken closest first, skipping any whose driver or dense row is already
/// used. Equal distances prefer the earlier dense row, then the earlier
/// driving row.
fn assign(
    driver: &[(NaiveDateTime, f64)],
    dense: &[(NaiveDateTime, f64)],
    tolerance: Duration,
) -> Vec<Option<usize>> {
    let mut candidates: Vec<(Duration, usize, usize)> = Vec::new();
    for (i, &(t, _)) in driver.iter().enumerate() {
        let from = dense.partition_point(|p| p.0 < t - tolerance);
        let to = dense.partition_point(|p| p.0 <= t + tolerance);
        candidates.extend((from..to).map(|j| (gap(dense[j].0, t), j, i)));
    }
    candidates.sort_unstable();

    let mut matches = vec![None; driver.len()];
    let mut taken = vec![false; dense.len()];
    for (_, j, i) in candidates {
        if matches[i].is_none() && !taken[j] {
            matches[i] = Some(j);
            taken[j] = true;
        }
    }
    matches
}

fn gap(a: NaiveDateTime, b: NaiveDateTime) -> Duration {
    if a >= b { a - b } else { b - a }
}
