/// Per-site validation run.
///
/// Chains the analysis components in the fixed order every site follows:
///
/// 1. study period restriction
/// 2. unit conversions and raw plausibility masks
/// 3. snow depth smoothing
/// 4. thermal lag search and correction (sites with a temperature sensor)
/// 5. weight and reference smoothing
/// 6. reference lag search (only when both share a timeline)
/// 7. nearest-timestamp alignment
/// 8. candidate range filter and optional reference calibration
/// 9. agreement statistics
///
/// Failures are logged here with the stage they happened in, so callers
/// only need to count them.

use std::collections::HashMap;
use std::path::Path;

use crate::analysis::agreement::{self, AgreementOptions};
use crate::analysis::lag::{self, BoundaryFill};
use crate::analysis::neutron;
use crate::analysis::numeric;
use crate::analysis::thermal::ThermalCorrector;
use crate::analysis::align;
use crate::config::{LagSearchSpan, SiteConfig, Signal};
use crate::ingest::{self, SignalTable};
use crate::logging::{self, Stage};
use crate::model::{AgreementStats, AlignedPair, CalibrationModel, LagResult, PipelineError, Series};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw signals of one site, as loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteSignals {
    pub weight: Series,
    pub temperature: Option<Series>,
    pub snow_depth: Option<Series>,
    /// Reference SWE; already converted for neutron probe sites.
    pub reference: Series,
}

/// Outcome of the thermal correction step.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalSummary {
    pub lag: LagResult,
    pub model: CalibrationModel,
    pub calibration_rows: usize,
}

/// Everything a report needs about one validated site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteOutcome {
    pub site_id: String,
    pub site_name: String,
    pub reference_label: String,
    pub thermal: Option<ThermalSummary>,
    pub reference_lag: Option<LagResult>,
    /// reference ≈ slope · candidate + intercept, when enabled.
    pub reference_calibration: Option<CalibrationModel>,
    /// Rows removed by the candidate plausibility range.
    pub rows_filtered: usize,
    /// Candidate after correction, smoothing and re-timing.
    pub candidate: Series,
    /// Reference after smoothing.
    pub reference: Series,
    pub snow_depth: Option<Series>,
    /// Rows the statistics were computed over.
    pub pair: AlignedPair,
    pub stats: AgreementStats,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads every source of `site` and assembles its signals.
///
/// # Errors
/// `Io` or `MalformedInput` from the adapters, or `InsufficientCalibrationData`
/// from the neutron probe conversion.
pub fn load_signals(site: &SiteConfig, data_dir: &Path) -> Result<SiteSignals, PipelineError> {
    let mut tables: HashMap<String, SignalTable> = HashMap::new();
    for source in &site.sources {
        let table = ingest::load_source(source, data_dir)?;
        logging::info(
            Stage::Ingest,
            Some(&site.id),
            &format!("{}: {} rows", source.path, table.len()),
        );
        tables.insert(source.path.clone(), table);
    }

    let signal = |signal: Signal| -> Result<Option<Series>, PipelineError> {
        match site.source_for(signal) {
            Some((source, column)) => {
                let table = tables.get(&source.path).ok_or_else(|| {
                    PipelineError::MalformedInput(format!("source '{}' was not loaded", source.path))
                })?;
                table.series(column, &signal.to_string()).map(Some)
            }
            None => Ok(None),
        }
    };
    let required = |s: Signal| -> Result<Series, PipelineError> {
        signal(s)?.ok_or_else(|| {
            PipelineError::MalformedInput(format!("site '{}' provides no {} signal", site.id, s))
        })
    };

    let weight = required(Signal::Weight)?;
    let reference = match &site.neutron {
        Some(probe) => {
            let ground = required(Signal::NeutronGround)?;
            let counts = required(Signal::NeutronReference)?;
            neutron::counts_to_swe(&ground, &counts, probe)?.renamed("reference")
        }
        None => required(Signal::Reference)?,
    };

    Ok(SiteSignals {
        weight,
        temperature: signal(Signal::Temperature)?,
        snow_depth: signal(Signal::SnowDepth)?,
        reference,
    })
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn staged<T>(site: &str, stage: Stage, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
    if let Err(e) = &result {
        logging::log_site_failure(site, stage, e);
    }
    result
}

/// Runs the validation chain over already loaded signals.
pub fn run_pipeline(signals: &SiteSignals, site: &SiteConfig) -> Result<SiteOutcome, PipelineError> {
    let id = site.id.as_str();
    let (start, end) = site
        .period
        .map(|p| (p.start, p.end))
        .unwrap_or((None, None));

    // Period and unit conversions
    let mut weight = signals.weight.between(start, end);
    let mut reference = signals.reference.between(start, end);
    let mut snow_depth = signals.snow_depth.as_ref().map(|s| s.between(start, end));
    let temperature = signals.temperature.as_ref().map(|s| s.between(start, end));

    let transforms = &site.transforms;
    if let Some(t) = transforms.weight {
        weight = weight.map_values("weight_units", |v| t.apply(v));
    }
    if transforms.weight_min.is_some() || transforms.weight_max.is_some() {
        weight = weight.mask_outside(transforms.weight_min, transforms.weight_max);
    }
    if let Some(t) = transforms.reference {
        reference = reference.map_values("reference_units", |v| t.apply(v));
    }
    if let Some(t) = transforms.snow_depth {
        snow_depth = snow_depth.map(|s| s.map_values("depth_units", |v| t.apply(v)));
    }

    if let (Some(cfg), Some(depth)) = (&site.depth_smoothing, &snow_depth) {
        snow_depth = Some(staged(id, Stage::Smooth, cfg.apply(depth))?);
    }

    // Thermal correction
    let mut thermal = None;
    if let Some(cfg) = &site.thermal {
        let temperature = staged(
            id,
            Stage::Thermal,
            temperature.as_ref().ok_or_else(|| {
                PipelineError::MalformedInput("thermal correction needs a temperature series".to_string())
            }),
        )?;
        let window = staged(id, Stage::Thermal, cfg.calibration.window(snow_depth.as_ref()))?;

        let lag_result = match cfg.lag_search {
            LagSearchSpan::FullSeries => {
                lag::best_lag_series(&weight, temperature, cfg.lag_range(), cfg.score)
            }
            LagSearchSpan::CalibrationWindow => window.select(temperature, &weight).and_then(|rows| {
                if rows.len() < numeric::MIN_FIT_POINTS {
                    return Err(PipelineError::InsufficientCalibrationData {
                        required: numeric::MIN_FIT_POINTS,
                        found: rows.len(),
                    });
                }
                let w = keep_rows(&weight, &rows);
                let t = keep_rows(temperature, &rows);
                lag::best_lag(&w, &t, cfg.lag_range(), cfg.score)
            }),
        };
        let lag_result = staged(id, Stage::Lag, lag_result)?;
        logging::info(
            Stage::Lag,
            Some(id),
            &format!(
                "temperature lag {:+} samples ({:?} {:.3} over {} pairs)",
                lag_result.lag, cfg.score, lag_result.score, lag_result.overlap
            ),
        );

        let correction = staged(
            id,
            Stage::Thermal,
            ThermalCorrector::new(cfg.boundary_fill).fit_and_correct(
                temperature,
                &weight,
                &window,
                lag_result.lag,
            ),
        )?;
        logging::info(
            Stage::Thermal,
            Some(id),
            &format!(
                "bias = {:.4} · T + {:.4} from {} dry rows",
                correction.model.slope, correction.model.intercept, correction.calibration_rows
            ),
        );
        weight = correction.corrected;
        thermal = Some(ThermalSummary {
            lag: lag_result,
            model: correction.model,
            calibration_rows: correction.calibration_rows,
        });
    }

    if let Some(cfg) = &site.weight_smoothing {
        weight = staged(id, Stage::Smooth, cfg.apply(&weight))?;
    }
    if let Some(cfg) = &site.reference_smoothing {
        reference = staged(id, Stage::Smooth, cfg.apply(&reference))?;
    }

    // Reference lag
    let cmp = &site.comparison;
    let mut reference_lag = None;
    if let Some(range) = cmp.lag_range() {
        let found = staged(
            id,
            Stage::Lag,
            lag::best_lag_series(&reference, &weight, range, cmp.lag_score),
        )?;
        logging::info(
            Stage::Lag,
            Some(id),
            &format!("reference lag {:+} samples ({:.3})", found.lag, found.score),
        );
        weight = lag::align_to_reference(&weight, found.lag, BoundaryFill::Missing);
        reference_lag = Some(found);
    }

    // Alignment and filtering
    let aligned = staged(id, Stage::Align, align::align(&reference, &weight, cmp.tolerance()))?;
    let mut pair = aligned.retain(|_, c| {
        cmp.plausible_min.is_none_or(|min| c >= min) && cmp.plausible_max.is_none_or(|max| c <= max)
    });
    let rows_filtered = aligned.len() - pair.len();
    if rows_filtered > 0 {
        logging::info(
            Stage::Align,
            Some(id),
            &format!("{} rows outside the plausible range dropped", rows_filtered),
        );
    }
    if pair.is_empty() {
        return staged(
            id,
            Stage::Align,
            Err(PipelineError::NoOverlap(
                "every aligned row fell outside the plausible range".to_string(),
            )),
        );
    }
    logging::info(Stage::Align, Some(id), &format!("{} aligned rows", pair.len()));

    let mut reference_calibration = None;
    if cmp.reference_calibration {
        let model = staged(id, Stage::Agree, numeric::fit_line(pair.candidate(), pair.reference()))?;
        pair = pair.map_candidate(|c| model.predict(c));
        reference_calibration = Some(model);
    }

    let options = AgreementOptions {
        r2: cmp.r2,
        difference: cmp.difference,
    };
    let stats = staged(id, Stage::Agree, agreement::analyze(&pair, options))?;
    logging::info(
        Stage::Agree,
        Some(id),
        &format!("n = {}, RMSE = {:.2}, bias = {:.2}", stats.n, stats.rmse, stats.mean_diff),
    );

    Ok(SiteOutcome {
        site_id: site.id.clone(),
        site_name: site.name.clone(),
        reference_label: site.reference_label.clone(),
        thermal,
        reference_lag,
        reference_calibration,
        rows_filtered,
        candidate: weight,
        reference,
        snow_depth,
        pair,
        stats,
    })
}

/// Values at `rows`, missing everywhere else.
fn keep_rows(series: &Series, rows: &[usize]) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    for &i in rows {
        out[i] = series.value_at(i);
    }
    out
}

/// Loads and validates one site.
pub fn run_site(site: &SiteConfig, data_dir: &Path) -> Result<SiteOutcome, PipelineError> {
    logging::info(Stage::System, Some(&site.id), &format!("validating {}", site.name));
    let signals = staged(&site.id, Stage::Ingest, load_signals(site, data_dir))?;
    run_pipeline(&signals, site)
}
