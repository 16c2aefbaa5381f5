/// Small numerical primitives shared by the analysis stages.
///
/// Means, variances and covariances are delegated to `statrs`; the functions
/// here only add the domain's handling of degenerate input (too few points,
/// zero variance) so callers never receive a silent `NaN`.

use statrs::statistics::Statistics;

use crate::model::{CalibrationModel, PipelineError};

/// Minimum number of pairs needed to fit a line.
pub const MIN_FIT_POINTS: usize = 2;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(Statistics::mean(xs.iter()))
    }
}

/// Population standard deviation (divisor N), `None` for an empty slice.
pub fn population_std_dev(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(Statistics::population_std_dev(xs.iter()))
    }
}

/// Pearson correlation coefficient.
///
/// `None` when there are fewer than two pairs or either side is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let sx = Statistics::population_std_dev(x.iter());
    let sy = Statistics::population_std_dev(y.iter());
    if sx == 0.0 || sy == 0.0 || !sx.is_finite() || !sy.is_finite() {
        return None;
    }
    let cov = Statistics::population_covariance(x.iter(), y.iter());
    Some((cov / (sx * sy)).clamp(-1.0, 1.0))
}

/// Coefficient of determination of `prediction` against `truth`:
/// `1 − Σ(truth − prediction)² / Σ(truth − mean(truth))²`.
///
/// `None` when the slices are empty, differ in length, or `truth` is constant.
pub fn r_squared(truth: &[f64], prediction: &[f64]) -> Option<f64> {
    if truth.len() != prediction.len() || truth.is_empty() {
        return None;
    }
    let m = Statistics::mean(truth.iter());
    let ss_tot: f64 = truth.iter().map(|t| (t - m).powi(2)).sum();
    if ss_tot == 0.0 {
        return None;
    }
    let ss_res: f64 = truth
        .iter()
        .zip(prediction)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    Some(1.0 - ss_res / ss_tot)
}

/// Ordinary least-squares fit of `y ≈ slope · x + intercept`.
///
/// A constant predictor carries no slope information; the fit then returns
/// slope 0 and the mean response as intercept.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<CalibrationModel, PipelineError> {
    let n = x.len().min(y.len());
    if n < MIN_FIT_POINTS {
        return Err(PipelineError::InsufficientCalibrationData {
            required: MIN_FIT_POINTS,
            found: n,
        });
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mx = Statistics::mean(x.iter());
    let my = Statistics::mean(y.iter());
    let var_x = Statistics::population_variance(x.iter());
    let slope = if var_x > 0.0 {
        Statistics::population_covariance(x.iter(), y.iter()) / var_x
    } else {
        0.0
    };
    Ok(CalibrationModel {
        slope,
        intercept: my - slope * mx,
        n,
    })
}

/// Rows where both inputs are present, as two parallel vectors.
pub fn joint_valid(a: &[Option<f64>], b: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    a.iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .unzip()
}
