/// Cosmic-ray neutron probe (CRD) counts to snow water equivalent.
///
/// The probe has a ground detector under the snowpack and a reference
/// detector above it. Snow attenuates the ground count, so the ratio
/// reference / ground rises with SWE. The ratio is normalised by its mean
/// over a known snow-free period and scaled by the site's attenuation factor:
///
/// ```text
/// normalised = raw_ratio / dry_mean_ratio × target_ratio
/// swe        = attenuation_factor × (normalised / target_ratio − 1)
/// ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::analysis::numeric;
use crate::model::{PipelineError, Series};

/// Calibration constants for one neutron probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeutronProbeConfig {
    #[serde(default = "default_ground_range")]
    pub ground_range: (f64, f64),
    #[serde(default = "default_reference_range")]
    pub reference_range: (f64, f64),
    /// Snow-free period used to normalise the count ratio (inclusive).
    pub dry_start: NaiveDateTime,
    pub dry_end: NaiveDateTime,
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f64,
    /// Millimetres of SWE per unit of relative ratio change.
    #[serde(default = "default_attenuation_factor")]
    pub attenuation_factor: f64,
}

fn default_ground_range() -> (f64, f64) {
    (25_000.0, 40_000.0)
}

fn default_reference_range() -> (f64, f64) {
    (15_000.0, 22_000.0)
}

fn default_target_ratio() -> f64 {
    0.5356
}

fn default_attenuation_factor() -> f64 {
    1829.0
}

/// Converts detector counts into an SWE series on the counts' timeline.
///
/// Rows with either count outside its plausible range become missing.
///
/// # Errors
/// - `MalformedInput` if the two count series do not share a timeline.
/// - `InsufficientCalibrationData` if the dry period holds no valid row.
pub fn counts_to_swe(
    ground: &Series,
    reference: &Series,
    config: &NeutronProbeConfig,
) -> Result<Series, PipelineError> {
    if !ground.shares_timeline(reference) {
        return Err(PipelineError::MalformedInput(
            "neutron ground and reference counts must share a timeline".to_string(),
        ));
    }
    let (g_lo, g_hi) = config.ground_range;
    let (r_lo, r_hi) = config.reference_range;
    let ground = ground.mask_outside(Some(g_lo), Some(g_hi));
    let reference = reference.mask_outside(Some(r_lo), Some(r_hi));

    let ratios: Vec<Option<f64>> = reference
        .values()
        .iter()
        .zip(ground.values())
        .map(|(r, g)| {
            let (r, g) = ((*r)?, (*g)?);
            (g != 0.0).then(|| r / g)
        })
        .collect();

    let dry: Vec<f64> = ground
        .timestamps()
        .iter()
        .zip(&ratios)
        .filter(|(t, _)| **t >= config.dry_start && **t <= config.dry_end)
        .filter_map(|(_, r)| *r)
        .collect();
    let dry_mean = numeric::mean(&dry)
        .filter(|m| *m != 0.0)
        .ok_or(PipelineError::InsufficientCalibrationData {
            required: 1,
            found: dry.len(),
        })?;

    let swe = ratios
        .iter()
        .map(|r| {
            r.map(|ratio| {
                let normalised = ratio / dry_mean * config.target_ratio;
                config.attenuation_factor * (normalised / config.target_ratio - 1.0)
            })
        })
        .collect();
    Ok(ground.derive("crd_swe", swe)?.renamed("swe_crd"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 12, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn config() -> NeutronProbeConfig {
        NeutronProbeConfig {
            ground_range: default_ground_range(),
            reference_range: default_reference_range(),
            dry_start: t0(),
            dry_end: t0() + Duration::days(1),
            target_ratio: default_target_ratio(),
            attenuation_factor: default_attenuation_factor(),
        }
    }

    fn hourly(name: &str, values: &[f64]) -> Series {
        let ts = (0..values.len() as i64).map(|h| t0() + Duration::hours(h * 12)).collect();
        Series::from_values(name, ts, values.to_vec()).unwrap()
    }

    #[test]
    fn test_dry_period_maps_to_zero_swe() {
        let ground = hourly("ground", &[32_000.0, 32_000.0, 30_000.0]);
        let reference = hourly("reference", &[17_000.0, 17_000.0, 18_000.0]);
        let swe = counts_to_swe(&ground, &reference, &config()).unwrap();
        assert!(swe.value_at(0).unwrap().abs() < 1e-9, "dry rows carry no SWE");
        // Ratio rises from 0.53125 to 0.6: +12.94% → 1829 × 0.1294
        let expected = 1829.0 * ((18_000.0 / 30_000.0) / (17_000.0 / 32_000.0) - 1.0);
        assert!((swe.value_at(2).unwrap() - expected).abs() < 1e-6);
        assert_eq!(swe.name(), "swe_crd");
    }

    #[test]
    fn test_out_of_range_counts_become_missing() {
        let ground = hourly("ground", &[32_000.0, 50_000.0, 32_000.0]);
        let reference = hourly("reference", &[17_000.0, 17_000.0, 9_000.0]);
        let swe = counts_to_swe(&ground, &reference, &config()).unwrap();
        assert!(swe.value_at(0).is_some());
        assert_eq!(swe.value_at(1), None);
        assert_eq!(swe.value_at(2), None);
        assert_eq!(swe.len(), 3, "masked rows keep their slots");
    }

    #[test]
    fn test_empty_dry_period_is_insufficient() {
        let ground = hourly("ground", &[32_000.0, 32_000.0]);
        let reference = hourly("reference", &[17_000.0, 17_000.0]);
        let mut cfg = config();
        cfg.dry_start = t0() + Duration::days(30);
        cfg.dry_end = t0() + Duration::days(31);
        let result = counts_to_swe(&ground, &reference, &cfg);
        assert_eq!(
            result,
            Err(PipelineError::InsufficientCalibrationData { required: 1, found: 0 })
        );
    }

    #[test]
    fn test_config_defaults_from_toml() {
        let cfg: NeutronProbeConfig = toml::from_str(
            "dry_start = \"2023-12-01T00:00:00\"\ndry_end = \"2023-12-31T00:00:00\"",
        )
        .unwrap();
        assert_eq!(cfg.attenuation_factor, 1829.0);
        assert_eq!(cfg.ground_range, (25_000.0, 40_000.0));
    }
}
