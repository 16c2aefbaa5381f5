/// Agreement statistics between a candidate and a reference instrument.
///
/// All statistics are computed over exactly the rows of the `AlignedPair`
/// they are given; nothing is re-filtered part-way. The only exception is
/// MAPE, which by definition skips rows whose reference is zero and reports
/// how many rows it used.
///
/// Conventions:
/// - RMSE, MAE and MAPE treat the reference as ground truth.
/// - `R2Convention` selects whether R² is the coefficient of determination
///   or the squared Pearson correlation.
/// - `DifferenceSign` selects candidate − reference or the reverse for the
///   Bland-Altman differences.
/// - Limits of agreement are mean ± 1.96 · σ with σ the population standard
///   deviation (divisor N).

use serde::Serialize;

use crate::analysis::numeric;
use crate::model::{AgreementStats, AlignedPair, DifferenceSign, PipelineError, R2Convention};

/// Multiplier of the standard deviation for the limits of agreement.
pub const LOA_Z: f64 = 1.96;

/// Reporting conventions for one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgreementOptions {
    pub r2: R2Convention,
    pub difference: DifferenceSign,
}

/// One point of a Bland-Altman scatter plot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlandAltmanPoint {
    /// Mean of the two measurements.
    pub mean: f64,
    /// Difference under the configured sign convention.
    pub diff: f64,
}

/// Computes agreement statistics over `pair`.
///
/// # Errors
/// `NoOverlap` if the pair has no rows.
pub fn analyze(pair: &AlignedPair, options: AgreementOptions) -> Result<AgreementStats, PipelineError> {
    let n = pair.len();
    if n == 0 {
        return Err(PipelineError::NoOverlap(
            "aligned pair has no rows to compare".to_string(),
        ));
    }
    let reference = pair.reference();
    let candidate = pair.candidate();

    let errors: Vec<f64> = candidate.iter().zip(reference).map(|(c, r)| c - r).collect();
    let squared: Vec<f64> = errors.iter().map(|e| e * e).collect();
    let absolute: Vec<f64> = errors.iter().map(|e| e.abs()).collect();
    let rmse = numeric::mean(&squared).unwrap_or(0.0).sqrt();
    let mae = numeric::mean(&absolute).unwrap_or(0.0);

    let percentage: Vec<f64> = errors
        .iter()
        .zip(reference)
        .filter(|(_, r)| **r != 0.0)
        .map(|(e, r)| (e / r).abs() * 100.0)
        .collect();
    let mape = numeric::mean(&percentage);

    let pearson_r = numeric::pearson(reference, candidate);
    let r2 = match options.r2 {
        R2Convention::CoefficientOfDetermination => numeric::r_squared(reference, candidate),
        R2Convention::SquaredPearson => pearson_r.map(|r| r * r),
    };

    let diffs = differences(pair, options.difference);
    let mean_diff = numeric::mean(&diffs).unwrap_or(0.0);
    let std_diff = numeric::population_std_dev(&diffs).unwrap_or(0.0);
    let loa_upper = mean_diff + LOA_Z * std_diff;
    let loa_lower = mean_diff - LOA_Z * std_diff;
    let n_outside_loa = diffs
        .iter()
        .filter(|d| **d < loa_lower || **d > loa_upper)
        .count();

    Ok(AgreementStats {
        n,
        r2,
        r2_convention: options.r2,
        rmse,
        mae,
        mape,
        mape_rows: percentage.len(),
        pearson_r,
        difference: options.difference,
        mean_diff,
        std_diff,
        loa_upper,
        loa_lower,
        n_outside_loa,
        pct_outside_loa: 100.0 * n_outside_loa as f64 / n as f64,
    })
}

/// Bland-Altman scatter points (mean vs difference) for plotting.
pub fn bland_altman_points(pair: &AlignedPair, sign: DifferenceSign) -> Vec<BlandAltmanPoint> {
    pair.reference()
        .iter()
        .zip(pair.candidate())
        .zip(differences(pair, sign))
        .map(|((r, c), diff)| BlandAltmanPoint {
            mean: (r + c) / 2.0,
            diff,
        })
        .collect()
}

fn differences(pair: &AlignedPair, sign: DifferenceSign) -> Vec<f64> {
    pair.reference()
        .iter()
        .zip(pair.candidate())
        .map(|(r, c)| match sign {
            DifferenceSign::CandidateMinusReference => c - r,
            DifferenceSign::ReferenceMinusCandidate => r - c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn pair(reference: &[f64], candidate: &[f64]) -> AlignedPair {
        let t0: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 8, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        AlignedPair::from_rows(
            reference
                .iter()
                .zip(candidate)
                .enumerate()
                .map(|(i, (r, c))| (t0 + Duration::hours(i as i64), *r, *c)),
        )
    }

    #[test]
    fn test_perfect_agreement() {
        let p = pair(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0]);
        let s = analyze(&p, AgreementOptions::default()).unwrap();
        assert_eq!(s.n, 4);
        assert_eq!(s.rmse, 0.0);
        assert_eq!(s.mae, 0.0);
        assert_eq!(s.mape, Some(0.0));
        assert!((s.r2.unwrap() - 1.0).abs() < 1e-12);
        assert!((s.pearson_r.unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(s.n_outside_loa, 0);
    }

    #[test]
    fn test_error_metrics_by_hand() {
        let p = pair(&[10.0, 20.0, 40.0], &[12.0, 18.0, 43.0]);
        let s = analyze(&p, AgreementOptions::default()).unwrap();
        // errors: +2, -2, +3
        assert!((s.rmse - (17.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((s.mae - 7.0 / 3.0).abs() < 1e-12);
        let mape = (20.0 + 10.0 + 7.5) / 3.0;
        assert!((s.mape.unwrap() - mape).abs() < 1e-9);
        assert!((s.mean_diff - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mape_excludes_zero_reference_rows() {
        let p = pair(&[0.0, 10.0, 20.0], &[5.0, 11.0, 22.0]);
        let s = analyze(&p, AgreementOptions::default()).unwrap();
        assert_eq!(s.mape_rows, 2, "the zero-reference row must not enter the denominator");
        assert!((s.mape.unwrap() - 10.0).abs() < 1e-12);
        assert_eq!(s.n, 3, "other statistics still use every row");
    }

    #[test]
    fn test_mape_is_none_when_every_reference_is_zero() {
        let p = pair(&[0.0, 0.0], &[1.0, 2.0]);
        let s = analyze(&p, AgreementOptions::default()).unwrap();
        assert_eq!(s.mape, None);
        assert_eq!(s.mape_rows, 0);
        assert_eq!(s.r2, None, "constant reference leaves R² undefined");
    }

    #[test]
    fn test_r2_conventions_differ_under_systematic_offset() {
        let reference = [1.0, 2.0, 3.0, 4.0, 5.0];
        let candidate: Vec<f64> = reference.iter().map(|v| v + 1.5).collect();
        let p = pair(&reference, &candidate);
        let det = analyze(&p, AgreementOptions::default()).unwrap();
        let sq = analyze(
            &p,
            AgreementOptions {
                r2: R2Convention::SquaredPearson,
                ..Default::default()
            },
        )
        .unwrap();
        assert!((sq.r2.unwrap() - 1.0).abs() < 1e-12);
        assert!(det.r2.unwrap() < 0.5, "offset must lower the coefficient of determination");
        assert_eq!(det.r2_convention, R2Convention::CoefficientOfDetermination);
    }

    #[test]
    fn test_difference_sign_flips_bias_only() {
        let p = pair(&[1.0, 2.0, 3.0], &[2.0, 2.5, 4.5]);
        let a = analyze(&p, AgreementOptions::default()).unwrap();
        let b = analyze(
            &p,
            AgreementOptions {
                difference: DifferenceSign::ReferenceMinusCandidate,
                ..Default::default()
            },
        )
        .unwrap();
        assert!((a.mean_diff + b.mean_diff).abs() < 1e-12);
        assert!((a.std_diff - b.std_diff).abs() < 1e-12);
        assert_eq!(a.rmse, b.rmse);
    }

    #[test]
    fn test_std_diff_uses_population_divisor() {
        // diffs: 0, 2 -> population std 1 (sample std would be sqrt(2))
        let p = pair(&[1.0, 1.0], &[1.0, 3.0]);
        let s = analyze(&p, AgreementOptions::default()).unwrap();
        assert!((s.std_diff - 1.0).abs() < 1e-12);
        assert!((s.loa_upper - (1.0 + 1.96)).abs() < 1e-12);
        assert!((s.loa_lower - (1.0 - 1.96)).abs() < 1e-12);
    }

    #[test]
    fn test_limits_bracket_mean_and_count_outliers() {
        let mut candidate = vec![10.0; 20];
        candidate[7] = 30.0;
        let p = pair(&[10.0; 20], &candidate);
        let s = analyze(&p, AgreementOptions::default()).unwrap();
        assert!(s.loa_upper >= s.mean_diff && s.mean_diff >= s.loa_lower);
        assert_eq!(s.n_outside_loa, 1);
        assert!((s.pct_outside_loa - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_pair_is_no_overlap() {
        let result = analyze(&AlignedPair::default(), AgreementOptions::default());
        assert!(matches!(result, Err(PipelineError::NoOverlap(_))));
    }

    #[test]
    fn test_bland_altman_points() {
        let p = pair(&[2.0, 4.0], &[4.0, 4.0]);
        let pts = bland_altman_points(&p, DifferenceSign::CandidateMinusReference);
        assert_eq!(
            pts,
            vec![
                BlandAltmanPoint { mean: 3.0, diff: 2.0 },
                BlandAltmanPoint { mean: 4.0, diff: 0.0 },
            ]
        );
    }
}
