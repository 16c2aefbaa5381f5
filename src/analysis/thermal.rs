/// Thermal bias correction of the load-cell weight signal.
///
/// The experimental scale drifts with its own temperature. During a dry
/// period (no snow on the plate) the weight signal is pure drift, so a line
/// fit of weight against lag-aligned temperature over that window gives the
/// bias model, which is then subtracted from the whole record.
///
/// The `lag` passed in is the one returned by a lag search with the weight
/// as reference and the temperature as candidate; the temperature is
/// re-timed by that lag over the full record before fitting and correcting.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::analysis::lag::{self, BoundaryFill};
use crate::analysis::numeric;
use crate::model::{CalibrationModel, PipelineError, Series};

// ---------------------------------------------------------------------------
// Calibration window
// ---------------------------------------------------------------------------

/// Snow-free predicate over a depth/height series on the weight's timeline.
#[derive(Debug, Clone, Copy)]
pub struct DryCondition<'a> {
    pub snow_depth: &'a Series,
    pub max_depth: f64,
    /// Whether a depth equal to `max_depth` still counts as dry.
    pub inclusive: bool,
}

impl DryCondition<'_> {
    fn is_dry(&self, row: usize) -> bool {
        match self.snow_depth.value_at(row) {
            Some(d) if self.inclusive => d <= self.max_depth,
            Some(d) => d < self.max_depth,
            None => false,
        }
    }
}

/// Which rows the thermal model is fit over.
#[derive(Debug, Clone, Copy)]
pub enum CalibrationWindow<'a> {
    /// Rows within `span` of the first timestamp, optionally also dry.
    InitialSpan {
        span: Duration,
        dry: Option<DryCondition<'a>>,
    },
    /// The first `count` dry rows, in chronological order.
    FirstDrySamples { count: usize, dry: DryCondition<'a> },
}

impl CalibrationWindow<'_> {
    /// Indices of rows inside the window where both signals are present.
    pub fn select(&self, temperature: &Series, weight: &Series) -> Result<Vec<usize>, PipelineError> {
        if let Some(dry) = self.dry() {
            if dry.snow_depth.len() != weight.len() {
                return Err(PipelineError::MalformedInput(format!(
                    "snow depth has {} rows but weight has {}",
                    dry.snow_depth.len(),
                    weight.len()
                )));
            }
        }
        let valid = |i: &usize| temperature.value_at(*i).is_some() && weight.value_at(*i).is_some();
        let rows = match self {
            CalibrationWindow::InitialSpan { span, dry } => {
                let Some(&first) = weight.timestamps().first() else {
                    return Ok(Vec::new());
                };
                let end = first + *span;
                (0..weight.len())
                    .take_while(|i| weight.timestamps()[*i] < end)
                    .filter(|i| dry.is_none_or(|d| d.is_dry(*i)))
                    .filter(valid)
                    .collect()
            }
            CalibrationWindow::FirstDrySamples { count, dry } => (0..weight.len())
                .filter(|i| dry.is_dry(*i))
                .filter(valid)
                .take(*count)
                .collect(),
        };
        Ok(rows)
    }

    fn dry(&self) -> Option<&DryCondition<'_>> {
        match self {
            CalibrationWindow::InitialSpan { dry, .. } => dry.as_ref(),
            CalibrationWindow::FirstDrySamples { dry, .. } => Some(dry),
        }
    }
}

/// Config-file form of a calibration window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CalibrationPolicy {
    InitialSpan {
        days: i64,
        #[serde(default)]
        max_depth: Option<f64>,
        #[serde(default = "default_inclusive")]
        inclusive: bool,
    },
    FirstDrySamples {
        count: usize,
        max_depth: f64,
        #[serde(default = "default_inclusive")]
        inclusive: bool,
    },
}

fn default_inclusive() -> bool {
    true
}

impl CalibrationPolicy {
    /// Whether the policy needs a snow depth signal.
    pub fn needs_snow_depth(&self) -> bool {
        match self {
            CalibrationPolicy::InitialSpan { max_depth, .. } => max_depth.is_some(),
            CalibrationPolicy::FirstDrySamples { .. } => true,
        }
    }

    /// Binds the policy to a depth series.
    pub fn window<'a>(&self, snow_depth: Option<&'a Series>) -> Result<CalibrationWindow<'a>, PipelineError> {
        let missing_depth = || {
            PipelineError::MalformedInput(
                "calibration window needs a snow depth series".to_string(),
            )
        };
        Ok(match *self {
            CalibrationPolicy::InitialSpan {
                days,
                max_depth,
                inclusive,
            } => CalibrationWindow::InitialSpan {
                span: Duration::days(days),
                dry: match max_depth {
                    Some(max_depth) => Some(DryCondition {
                        snow_depth: snow_depth.ok_or_else(missing_depth)?,
                        max_depth,
                        inclusive,
                    }),
                    None => None,
                },
            },
            CalibrationPolicy::FirstDrySamples {
                count,
                max_depth,
                inclusive,
            } => CalibrationWindow::FirstDrySamples {
                count,
                dry: DryCondition {
                    snow_depth: snow_depth.ok_or_else(missing_depth)?,
                    max_depth,
                    inclusive,
                },
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Correction
// ---------------------------------------------------------------------------

/// Result of a thermal correction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalCorrection {
    pub model: CalibrationModel,
    pub lag: i64,
    /// Rows the model was fit over.
    pub calibration_rows: usize,
    pub corrected: Series,
}

/// Fits and removes the linear temperature → weight bias.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThermalCorrector {
    /// Fill for the edge rows left empty by re-timing the temperature.
    pub boundary_fill: BoundaryFill,
}

impl ThermalCorrector {
    pub fn new(boundary_fill: BoundaryFill) -> Self {
        Self { boundary_fill }
    }

    /// Corrected weight = raw weight − (slope · aligned temperature + intercept).
    ///
    /// # Errors
    /// - `MalformedInput` if temperature and weight are not on one timeline.
    /// - `InsufficientCalibrationData` if the window holds fewer than two
    ///   valid (temperature, weight) pairs.
    pub fn fit_and_correct(
        &self,
        temperature: &Series,
        weight: &Series,
        window: &CalibrationWindow<'_>,
        lag: i64,
    ) -> Result<ThermalCorrection, PipelineError> {
        if !temperature.shares_timeline(weight) {
            return Err(PipelineError::MalformedInput(format!(
                "temperature '{}' and weight '{}' must share a timeline",
                temperature.name(),
                weight.name()
            )));
        }
        let aligned = lag::align_to_reference(temperature, lag, self.boundary_fill);
        let rows = window.select(&aligned, weight)?;
        let (t, w): (Vec<f64>, Vec<f64>) = rows
            .iter()
            .filter_map(|&i| Some((aligned.value_at(i)?, weight.value_at(i)?)))
            .unzip();
        let model = numeric::fit_line(&t, &w)?;

        let values = aligned
            .values()
            .iter()
            .zip(weight.values())
            .map(|(t, w)| Some((*w)? - model.predict((*t)?)))
            .collect();
        let corrected = weight.derive("thermal_corrected", values)?;

        Ok(ThermalCorrection {
            model,
            lag,
            calibration_rows: rows.len(),
            corrected,
        })
    }
}

/// [`ThermalCorrector::fit_and_correct`] with backward boundary fill.
pub fn fit_and_correct(
    temperature: &Series,
    weight: &Series,
    window: &CalibrationWindow<'_>,
    lag: i64,
) -> Result<ThermalCorrection, PipelineError> {
    ThermalCorrector::default().fit_and_correct(temperature, weight, window, lag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn hourly(name: &str, values: Vec<Option<f64>>) -> Series {
        let ts = (0..values.len() as i64).map(|h| t0() + Duration::hours(h)).collect();
        Series::new(name, ts, values).unwrap()
    }

    fn daily(name: &str, values: Vec<f64>) -> Series {
        let ts = (0..values.len() as i64).map(|d| t0() + Duration::days(d)).collect();
        Series::from_values(name, ts, values).unwrap()
    }

    #[test]
    fn test_removes_pure_thermal_drift() {
        let temps: Vec<f64> = (0..48).map(|h| 5.0 * ((h as f64) / 4.0).sin()).collect();
        let temperature = hourly("t", temps.iter().copied().map(Some).collect());
        let weight = hourly("w", temps.iter().map(|t| Some(0.8 * t + 3.0)).collect());
        let window = CalibrationWindow::InitialSpan {
            span: Duration::days(1),
            dry: None,
        };
        let result = fit_and_correct(&temperature, &weight, &window, 0).unwrap();
        assert!((result.model.slope - 0.8).abs() < 1e-9);
        assert!((result.model.intercept - 3.0).abs() < 1e-9);
        assert_eq!(result.calibration_rows, 24);
        for v in result.corrected.values() {
            assert!(v.unwrap().abs() < 1e-9, "drift-only weight must correct to zero");
        }
        assert_eq!(result.corrected.lineage(), &["thermal_corrected".to_string()]);
    }

    #[test]
    fn test_uses_lag_aligned_temperature_everywhere() {
        // Weight responds to the temperature two samples later:
        // weight[t] = 2·temp[t + 2], i.e. temperature trails by 2.
        let temps: Vec<f64> = (0..40).map(|h| ((h * 37) % 11) as f64).collect();
        let weights: Vec<f64> = (0..40).map(|t| 2.0 * temps.get(t + 2).copied().unwrap_or(temps[39])).collect();
        let temperature = hourly("t", temps.iter().copied().map(Some).collect());
        let weight = hourly("w", weights.iter().copied().map(Some).collect());

        let found = lag::best_lag_series(&weight, &temperature, -3..=3, crate::model::LagScore::Pearson)
            .unwrap();
        assert_eq!(found.lag, 2);

        let window = CalibrationWindow::InitialSpan {
            span: Duration::hours(20),
            dry: None,
        };
        let result = fit_and_correct(&temperature, &weight, &window, found.lag).unwrap();
        assert!((result.model.slope - 2.0).abs() < 1e-9, "slope {}", result.model.slope);
        for t in 0..38 {
            let v = result.corrected.value_at(t).unwrap();
            assert!(v.abs() < 1e-9, "row {} should be fully corrected, got {}", t, v);
        }
        // Re-timing leaves the last two rows without a temperature reading.
        assert_eq!(result.corrected.value_at(38), None);
        assert_eq!(result.corrected.value_at(39), None);
    }

    #[test]
    fn test_first_dry_samples_policy_skips_snowy_and_incomplete_rows() {
        let depth = daily("depth", vec![30.0, 5.0, 8.0, 40.0, 10.0, 2.0, 1.0]);
        let temperature = Series::new(
            "t",
            depth.timestamps().to_vec(),
            vec![Some(0.0), Some(1.0), None, Some(3.0), Some(4.0), Some(5.0), Some(6.0)],
        )
        .unwrap();
        let weight = daily("w", vec![99.0, 1.0, 2.0, 99.0, 4.0, 5.0, 6.0]);
        let window = CalibrationWindow::FirstDrySamples {
            count: 3,
            dry: DryCondition {
                snow_depth: &depth,
                max_depth: 10.0,
                inclusive: true,
            },
        };
        let rows = window.select(&temperature, &weight).unwrap();
        assert_eq!(rows, vec![1, 4, 5], "snowy rows 0,3 and incomplete row 2 are skipped");

        let strict = CalibrationWindow::FirstDrySamples {
            count: 3,
            dry: DryCondition {
                snow_depth: &depth,
                max_depth: 10.0,
                inclusive: false,
            },
        };
        assert_eq!(strict.select(&temperature, &weight).unwrap(), vec![1, 5, 6]);
    }

    #[test]
    fn test_initial_span_intersects_dry_predicate() {
        let depth = daily("depth", vec![1.0, 20.0, 3.0, 2.0, 0.0]);
        let temperature = daily("t", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let weight = daily("w", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let window = CalibrationWindow::InitialSpan {
            span: Duration::days(4),
            dry: Some(DryCondition {
                snow_depth: &depth,
                max_depth: 15.0,
                inclusive: false,
            }),
        };
        assert_eq!(window.select(&temperature, &weight).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn test_constant_temperature_and_weight_gives_zero_slope() {
        let temperature = hourly("t", vec![Some(0.0); 10]);
        let weight = hourly("w", vec![Some(12.0); 10]);
        let window = CalibrationWindow::InitialSpan {
            span: Duration::days(7),
            dry: None,
        };
        let result = fit_and_correct(&temperature, &weight, &window, 0).unwrap();
        assert!(result.model.slope.abs() < 1e-12);
        assert!((result.model.intercept - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_calibration_point_is_insufficient() {
        let depth = hourly("depth", vec![Some(0.0), Some(50.0), Some(50.0)]);
        let temperature = hourly("t", vec![Some(0.0); 3]);
        let weight = hourly("w", vec![Some(1.0); 3]);
        let window = CalibrationWindow::FirstDrySamples {
            count: 7,
            dry: DryCondition {
                snow_depth: &depth,
                max_depth: 10.0,
                inclusive: true,
            },
        };
        let result = fit_and_correct(&temperature, &weight, &window, 0);
        assert_eq!(
            result,
            Err(PipelineError::InsufficientCalibrationData { required: 2, found: 1 })
        );
    }

    #[test]
    fn test_mismatched_timelines_are_rejected() {
        let temperature = hourly("t", vec![Some(1.0); 4]);
        let weight = daily("w", vec![1.0; 4]);
        let window = CalibrationWindow::InitialSpan {
            span: Duration::days(7),
            dry: None,
        };
        let result = fit_and_correct(&temperature, &weight, &window, 0);
        assert!(matches!(result, Err(PipelineError::MalformedInput(_))));
    }

    #[test]
    fn test_policy_binding_requires_depth_when_thresholded() {
        let policy = CalibrationPolicy::FirstDrySamples {
            count: 7,
            max_depth: 10.0,
            inclusive: true,
        };
        assert!(policy.needs_snow_depth());
        assert!(matches!(policy.window(None), Err(PipelineError::MalformedInput(_))));

        let policy: CalibrationPolicy =
            toml::from_str("policy = \"initial_span\"\ndays = 7").unwrap();
        assert!(!policy.needs_snow_depth());
        assert!(policy.window(None).is_ok());
    }
}
