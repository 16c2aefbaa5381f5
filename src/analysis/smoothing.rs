/// Fixed-window smoothing of a `Series`.
///
/// Two edge policies are supported:
/// - a moving average (centered or causal) that averages over however many
///   valid samples the window holds near the series boundaries, and
/// - a local polynomial (Savitzky-Golay style) fit whose edge windows are
///   pinned to the first/last `window` samples and evaluated off-centre.
///
/// Missing samples are excluded from every local average or fit; they are
/// never treated as zero. Output always has the input's length.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::model::{PipelineError, Series};

/// Smoothing algorithm plus its mode-specific parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothingMode {
    /// Mean of the valid samples in the window. A centered window of size W
    /// covers `W / 2` samples before and `(W − 1) / 2` after each point (so an
    /// even window leans one sample into the past); a causal window covers
    /// the point and the `W − 1` samples before it.
    MovingAverage { centered: bool },
    /// Least-squares polynomial of the given order over an odd window.
    Polynomial { order: usize },
}

/// Config-file form of a smoothing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    pub window: usize,
    #[serde(default)]
    pub kind: SmoothingKind,
    #[serde(default = "default_centered")]
    pub centered: bool,
    #[serde(default = "default_order")]
    pub order: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingKind {
    #[default]
    MovingAverage,
    Polynomial,
}

fn default_centered() -> bool {
    true
}

fn default_order() -> usize {
    2
}

impl SmoothingConfig {
    pub fn mode(&self) -> SmoothingMode {
        match self.kind {
            SmoothingKind::MovingAverage => SmoothingMode::MovingAverage {
                centered: self.centered,
            },
            SmoothingKind::Polynomial => SmoothingMode::Polynomial { order: self.order },
        }
    }

    pub fn apply(&self, series: &Series) -> Result<Series, PipelineError> {
        smooth(series, self.window, self.mode())
    }
}

/// Smooths `series` with a window of `window` samples.
///
/// # Errors
/// `InvalidWindow` if `window` is zero, or for the polynomial mode if the
/// window is even, longer than the series, or not longer than the order.
pub fn smooth(series: &Series, window: usize, mode: SmoothingMode) -> Result<Series, PipelineError> {
    if window == 0 {
        return Err(PipelineError::InvalidWindow(
            "window must be at least one sample".to_string(),
        ));
    }
    match mode {
        SmoothingMode::MovingAverage { centered } => {
            let values = moving_average(series.values(), window, centered);
            let tag = if centered { "c" } else { "" };
            series.derive(format!("ma{}{}", window, tag), values)
        }
        SmoothingMode::Polynomial { order } => {
            if window % 2 == 0 {
                return Err(PipelineError::InvalidWindow(format!(
                    "polynomial smoothing needs an odd window, got {}",
                    window
                )));
            }
            if window > series.len() {
                return Err(PipelineError::InvalidWindow(format!(
                    "window {} exceeds series length {}",
                    window,
                    series.len()
                )));
            }
            if order >= window {
                return Err(PipelineError::InvalidWindow(format!(
                    "polynomial order {} must be below window {}",
                    order, window
                )));
            }
            let values = local_polynomial(series.values(), window, order);
            series.derive(format!("poly{}w{}", order, window), values)
        }
    }
}

fn moving_average(values: &[Option<f64>], window: usize, centered: bool) -> Vec<Option<f64>> {
    let n = values.len();
    let (before, after) = if centered {
        (window / 2, (window - 1) / 2)
    } else {
        (window - 1, 0)
    };
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + after + 1).min(n);
            let (sum, count) = values[start..end]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

fn local_polynomial(values: &[Option<f64>], window: usize, order: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half).min(n - window);
            // Offsets are relative to i so the fitted constant term is the
            // smoothed value at i.
            let points: Vec<(f64, f64)> = (start..start + window)
                .filter_map(|j| values[j].map(|v| (j as f64 - i as f64, v)))
                .collect();
            if points.is_empty() {
                return None;
            }
            let degree = order.min(points.len() - 1);
            fitted_constant(&points, degree)
        })
        .collect()
}

fn fitted_constant(points: &[(f64, f64)], degree: usize) -> Option<f64> {
    let design = DMatrix::from_fn(points.len(), degree + 1, |r, c| points[r].0.powi(c as i32));
    let target = DVector::from_iterator(points.len(), points.iter().map(|p| p.1));
    let coefficients = design.svd(true, true).solve(&target, 1e-12).ok()?;
    let value = coefficients[0];
    value.is_finite().then_some(value)
}
