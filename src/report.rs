/// Validation reports
///
/// Turns a `SiteOutcome` into a console summary, a JSON report and a
/// plot-ready JSON file (time series panel plus Bland-Altman scatter) for an
/// external plotting tool.

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::agreement::{self, BlandAltmanPoint};
use crate::model::{AgreementStats, CalibrationModel, DifferenceSign, LagResult, PipelineError, R2Convention};
use crate::pipeline::SiteOutcome;

// ============================================================================
// Report structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteReport {
    pub generated_at: String,
    pub site_id: String,
    pub site_name: String,
    pub reference_label: String,
    pub thermal: Option<ThermalReport>,
    pub reference_lag: Option<LagResult>,
    pub reference_calibration: Option<CalibrationModel>,
    pub rows_filtered: usize,
    pub stats: AgreementStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermalReport {
    pub lag: i64,
    pub lag_score: f64,
    pub slope: f64,
    pub intercept: f64,
    pub calibration_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotData {
    pub site_id: String,
    pub reference_label: String,
    pub time_series: TimeSeriesPanel,
    pub bland_altman: BlandAltmanPanel,
}

/// Aligned rows, one entry per statistic row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPanel {
    pub timestamps: Vec<NaiveDateTime>,
    pub candidate: Vec<f64>,
    pub reference: Vec<f64>,
    /// Snow depth at the aligned timestamps, when the site measures it.
    pub snow_depth: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlandAltmanPanel {
    pub difference: DifferenceSign,
    pub points: Vec<BlandAltmanPoint>,
    pub mean_diff: f64,
    pub loa_upper: f64,
    pub loa_lower: f64,
}

impl From<&SiteOutcome> for SiteReport {
    fn from(outcome: &SiteOutcome) -> Self {
        SiteReport {
            generated_at: Utc::now().to_rfc3339(),
            site_id: outcome.site_id.clone(),
            site_name: outcome.site_name.clone(),
            reference_label: outcome.reference_label.clone(),
            thermal: outcome.thermal.as_ref().map(|t| ThermalReport {
                lag: t.lag.lag,
                lag_score: t.lag.score,
                slope: t.model.slope,
                intercept: t.model.intercept,
                calibration_rows: t.calibration_rows,
            }),
            reference_lag: outcome.reference_lag,
            reference_calibration: outcome.reference_calibration,
            rows_filtered: outcome.rows_filtered,
            stats: outcome.stats.clone(),
        }
    }
}

impl From<&SiteOutcome> for PlotData {
    fn from(outcome: &SiteOutcome) -> Self {
        let pair = &outcome.pair;
        let stats = &outcome.stats;
        PlotData {
            site_id: outcome.site_id.clone(),
            reference_label: outcome.reference_label.clone(),
            time_series: TimeSeriesPanel {
                timestamps: pair.timestamps().to_vec(),
                candidate: pair.candidate().to_vec(),
                reference: pair.reference().to_vec(),
                snow_depth: outcome.snow_depth.as_ref().map(|depth| {
                    pair.timestamps()
                        .iter()
                        .map(|t| depth.value_at_time(*t))
                        .collect()
                }),
            },
            bland_altman: BlandAltmanPanel {
                difference: stats.difference,
                points: agreement::bland_altman_points(pair, stats.difference),
                mean_diff: stats.mean_diff,
                loa_upper: stats.loa_upper,
                loa_lower: stats.loa_lower,
            },
        }
    }
}

// ============================================================================
// Console output
// ============================================================================

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn print_summary(report: &SiteReport) {
    let s = &report.stats;
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 {}: scale vs {}", report.site_name, report.reference_label);
    println!("═══════════════════════════════════════════════════════════");

    if let Some(t) = &report.thermal {
        println!(
            "Thermal correction:  lag {:+} (score {:.3}), bias = {:.4}·T + {:.4}  [{} dry rows]",
            t.lag, t.lag_score, t.slope, t.intercept, t.calibration_rows
        );
    }
    if let Some(lag) = &report.reference_lag {
        println!("Reference lag:       {:+} samples (score {:.3})", lag.lag, lag.score);
    }
    if let Some(cal) = &report.reference_calibration {
        println!("Reference fit:       ref = {:.4}·scale + {:.4}", cal.slope, cal.intercept);
    }
    if report.rows_filtered > 0 {
        println!("Range filter:        {} rows dropped", report.rows_filtered);
    }
    println!();

    let r2_label = match s.r2_convention {
        R2Convention::CoefficientOfDetermination => "R²",
        R2Convention::SquaredPearson => "R² (r²)",
    };
    println!("Rows compared:       {}", s.n);
    println!("{:<21}{}", format!("{}:", r2_label), fmt_opt(s.r2, 4));
    println!("RMSE:                {:.2} mm", s.rmse);
    println!("MAE:                 {:.2} mm", s.mae);
    println!("MAPE:                {} % ({} rows)", fmt_opt(s.mape, 2), s.mape_rows);
    println!("Pearson r:           {}", fmt_opt(s.pearson_r, 4));
    println!();

    let sign = match s.difference {
        DifferenceSign::CandidateMinusReference => "scale − reference",
        DifferenceSign::ReferenceMinusCandidate => "reference − scale",
    };
    println!("Bland-Altman ({}):", sign);
    println!("  Mean difference:   {:.2} mm", s.mean_diff);
    println!("  Std difference:    {:.2} mm", s.std_diff);
    println!("  Limits:            [{:.2}, {:.2}] mm", s.loa_lower, s.loa_upper);
    println!("  Outside limits:    {} ({:.1}%)", s.n_outside_loa, s.pct_outside_loa);
    println!("═══════════════════════════════════════════════════════════");
}

/// Batch totals printed after all sites ran.
pub fn print_run_summary(total: usize, successful: usize) {
    let rate = if total > 0 {
        (successful as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    println!("\nSites validated: {}/{} ({:.1}%)", successful, total, rate);
}

// ============================================================================
// File output
// ============================================================================

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), PipelineError> {
    let io_err = |message: String| PipelineError::Io {
        path: path.display().to_string(),
        message,
    };
    let text = serde_json::to_string_pretty(value).map_err(|e| io_err(e.to_string()))?;
    fs::write(path, text).map_err(|e| io_err(e.to_string()))
}

/// Writes `<site>_report.json` and `<site>_plot_data.json` into `dir`,
/// creating it if needed. Returns the written paths.
pub fn write_site_outputs(outcome: &SiteOutcome, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::Io {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    let report_path = dir.join(format!("{}_report.json", outcome.site_id));
    write_json(&SiteReport::from(outcome), &report_path)?;

    let plot_path = dir.join(format!("{}_plot_data.json", outcome.site_id));
    write_json(&PlotData::from(outcome), &plot_path)?;

    Ok(vec![report_path, plot_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::agreement::AgreementOptions;
    use crate::model::{AlignedPair, Series};
    use crate::pipeline::ThermalSummary;
    use chrono::{Duration, NaiveDate};

    fn outcome() -> SiteOutcome {
        let t0 = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let ts: Vec<NaiveDateTime> = (0..4).map(|h| t0 + Duration::hours(h)).collect();
        let pair = AlignedPair::from_rows(
            ts.iter()
                .zip([10.0, 20.0, 30.0, 40.0])
                .zip([11.0, 19.0, 32.0, 41.0])
                .map(|((t, r), c)| (*t, r, c)),
        );
        let stats = agreement::analyze(&pair, AgreementOptions::default()).unwrap();
        let depth = Series::from_values("snow_depth", ts.clone(), vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        SiteOutcome {
            site_id: "demo".to_string(),
            site_name: "Demo".to_string(),
            reference_label: "REF".to_string(),
            thermal: Some(ThermalSummary {
                lag: LagResult { lag: 2, score: 0.95, overlap: 100 },
                model: CalibrationModel { slope: 0.4, intercept: -1.0, n: 7 },
                calibration_rows: 7,
            }),
            reference_lag: None,
            reference_calibration: None,
            rows_filtered: 0,
            candidate: Series::from_values("weight", ts.clone(), vec![11.0, 19.0, 32.0, 41.0]).unwrap(),
            reference: Series::from_values("reference", ts, vec![10.0, 20.0, 30.0, 40.0]).unwrap(),
            snow_depth: Some(depth),
            pair,
            stats,
        }
    }

    #[test]
    fn test_report_carries_thermal_model() {
        let report = SiteReport::from(&outcome());
        let thermal = report.thermal.unwrap();
        assert_eq!(thermal.lag, 2);
        assert_eq!(thermal.calibration_rows, 7);
        assert_eq!(report.stats.n, 4);
    }

    #[test]
    fn test_plot_data_panels_match_pair() {
        let plot = PlotData::from(&outcome());
        assert_eq!(plot.time_series.timestamps.len(), 4);
        assert_eq!(plot.bland_altman.points.len(), 4);
        assert_eq!(plot.bland_altman.points[0], BlandAltmanPoint { mean: 10.5, diff: 1.0 });
        assert_eq!(
            plot.time_series.snow_depth,
            Some(vec![Some(5.0), Some(6.0), Some(7.0), Some(8.0)])
        );
    }

    #[test]
    fn test_report_serializes_to_json() {
        let json = serde_json::to_value(SiteReport::from(&outcome())).unwrap();
        assert_eq!(json["site_id"], "demo");
        assert_eq!(json["stats"]["r2_convention"], "coefficient_of_determination");
        assert_eq!(json["stats"]["difference"], "candidate_minus_reference");
    }

    #[test]
    fn test_write_site_outputs_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let paths = write_site_outputs(&outcome(), &out).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(out.join("demo_report.json").exists());
        let plot: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("demo_plot_data.json")).unwrap()).unwrap();
        assert_eq!(plot["time_series"]["candidate"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_fmt_opt() {
        assert_eq!(fmt_opt(Some(0.12345), 3), "0.123");
        assert_eq!(fmt_opt(None, 3), "n/a");
    }
}
