/// Site registry for the snow-scale validation pipeline.
///
/// Every validation site is described by one `[[site]]` table in
/// `sites.toml`: where its files are, which column carries which signal,
/// and the per-site constants (windows, lag ranges, thresholds, unit
/// conversions, reporting conventions). This is the single source of truth
/// for those constants; the analysis code never hardcodes a site.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::analysis::lag::BoundaryFill;
use crate::analysis::neutron::NeutronProbeConfig;
use crate::analysis::smoothing::{SmoothingConfig, SmoothingKind};
use crate::analysis::thermal::CalibrationPolicy;
use crate::model::{DifferenceSign, LagScore, R2Convention};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The configuration file could not be read
    Io { path: String, message: String },
    /// The file is not valid TOML or does not match the schema
    Parse(String),
    /// The file parsed but a site is inconsistent
    Invalid { site: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, message } => write!(f, "Could not read {}: {}", path, message),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Invalid { site, message } => {
                write!(f, "Invalid config for site '{}': {}", site, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Site configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SitesFile {
    #[serde(rename = "site", default)]
    pub sites: Vec<SiteConfig>,
}

/// One validation site: a tested snow scale next to a reference instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Short identifier used on the command line and in output file names.
    pub id: String,
    pub name: String,
    /// Reference instrument label for reports (e.g. "CS725", "SSG-2", "CRD").
    pub reference_label: String,
    #[serde(default)]
    pub period: Option<Period>,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub transforms: Transforms,
    #[serde(default)]
    pub depth_smoothing: Option<SmoothingConfig>,
    #[serde(default)]
    pub thermal: Option<ThermalConfig>,
    #[serde(default)]
    pub weight_smoothing: Option<SmoothingConfig>,
    #[serde(default)]
    pub reference_smoothing: Option<SmoothingConfig>,
    /// Present when the reference is a neutron probe reporting raw counts.
    #[serde(default)]
    pub neutron: Option<NeutronProbeConfig>,
    #[serde(default)]
    pub comparison: ComparisonConfig,
}

/// Study period, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Period {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Header row plus delimiter-separated columns.
    Delimited,
    /// Datalogger table: fixed preamble, positional columns, quoted fields.
    Datalogger,
    /// `key,value,key,value,...` records, one per line.
    KeyValue,
}

/// One input file and the signals it provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Relative paths resolve against the data directory.
    pub path: String,
    pub format: SourceFormat,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Lines discarded before the first record (datalogger preamble).
    #[serde(default)]
    pub skip_rows: usize,
    /// Positional column names for header-less files.
    #[serde(default)]
    pub column_names: Vec<String>,
    pub timestamp_column: String,
    /// Tried in order; empty means the built-in ISO-like formats.
    #[serde(default)]
    pub timestamp_formats: Vec<String>,
    pub signals: SignalColumns,
}

fn default_delimiter() -> char {
    ','
}

/// Column carrying each signal, if this source provides it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalColumns {
    pub weight: Option<String>,
    pub temperature: Option<String>,
    pub snow_depth: Option<String>,
    pub reference: Option<String>,
    pub neutron_ground: Option<String>,
    pub neutron_reference: Option<String>,
}

/// Logical signals a site can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Weight,
    Temperature,
    SnowDepth,
    Reference,
    NeutronGround,
    NeutronReference,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Weight => write!(f, "weight"),
            Signal::Temperature => write!(f, "temperature"),
            Signal::SnowDepth => write!(f, "snow_depth"),
            Signal::Reference => write!(f, "reference"),
            Signal::NeutronGround => write!(f, "neutron_ground"),
            Signal::NeutronReference => write!(f, "neutron_reference"),
        }
    }
}

impl SignalColumns {
    /// (signal, column) for every signal this source provides.
    pub fn provided(&self) -> Vec<(Signal, &str)> {
        [
            (Signal::Weight, &self.weight),
            (Signal::Temperature, &self.temperature),
            (Signal::SnowDepth, &self.snow_depth),
            (Signal::Reference, &self.reference),
            (Signal::NeutronGround, &self.neutron_ground),
            (Signal::NeutronReference, &self.neutron_reference),
        ]
        .into_iter()
        .filter_map(|(signal, column)| column.as_deref().map(|c| (signal, c)))
        .collect()
    }
}

/// `value × scale + offset`, e.g. 25 − depth or load ÷ plate area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTransform {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl LinearTransform {
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }
}

/// Unit conversions and plausibility masks applied right after loading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transforms {
    pub weight: Option<LinearTransform>,
    pub snow_depth: Option<LinearTransform>,
    pub reference: Option<LinearTransform>,
    /// Raw (converted) weights outside these bounds become missing.
    pub weight_min: Option<f64>,
    pub weight_max: Option<f64>,
}

/// Which rows the thermal lag search looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagSearchSpan {
    #[default]
    FullSeries,
    CalibrationWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalConfig {
    #[serde(default = "default_thermal_lag_min")]
    pub lag_min: i64,
    #[serde(default = "default_thermal_lag_max")]
    pub lag_max: i64,
    #[serde(default)]
    pub score: LagScore,
    #[serde(default)]
    pub lag_search: LagSearchSpan,
    #[serde(default)]
    pub boundary_fill: BoundaryFill,
    pub calibration: CalibrationPolicy,
}

fn default_thermal_lag_min() -> i64 {
    -3
}

fn default_thermal_lag_max() -> i64 {
    3
}

impl ThermalConfig {
    pub fn lag_range(&self) -> RangeInclusive<i64> {
        self.lag_min..=self.lag_max
    }
}

/// How the corrected candidate is compared with the reference.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Reference lag search; both ends or neither. Only meaningful when the
    /// candidate and reference share a timeline.
    pub lag_min: Option<i64>,
    pub lag_max: Option<i64>,
    #[serde(default)]
    pub lag_score: LagScore,
    /// Nearest-timestamp alignment tolerance.
    #[serde(default)]
    pub tolerance_minutes: i64,
    #[serde(default)]
    pub r2: R2Convention,
    #[serde(default)]
    pub difference: DifferenceSign,
    /// Aligned rows whose candidate value falls outside are dropped.
    pub plausible_min: Option<f64>,
    pub plausible_max: Option<f64>,
    /// Fit reference ≈ a · candidate + b and report on the calibrated values.
    #[serde(default)]
    pub reference_calibration: bool,
}

impl ComparisonConfig {
    pub fn lag_range(&self) -> Option<RangeInclusive<i64>> {
        match (self.lag_min, self.lag_max) {
            (Some(min), Some(max)) => Some(min..=max),
            _ => None,
        }
    }

    pub fn tolerance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.tolerance_minutes)
    }
}

impl SiteConfig {
    /// Source that provides `signal`, with its column name.
    pub fn source_for(&self, signal: Signal) -> Option<(&SourceConfig, &str)> {
        self.sources.iter().find_map(|source| {
            source
                .signals
                .provided()
                .into_iter()
                .find(|(s, _)| *s == signal)
                .map(|(_, column)| (source, column))
        })
    }

    pub fn provides(&self, signal: Signal) -> bool {
        self.source_for(signal).is_some()
    }

    /// Checks cross-field consistency that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            site: self.id.clone(),
            message,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("site id must not be empty".to_string()));
        }
        if self.sources.is_empty() {
            return Err(invalid("at least one source is required".to_string()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            for (signal, _) in source.signals.provided() {
                if !seen.insert(signal) {
                    return Err(invalid(format!("signal '{}' is provided by more than one source", signal)));
                }
            }
            if source.format == SourceFormat::Datalogger && source.column_names.is_empty() {
                return Err(invalid(format!("datalogger source '{}' needs column_names", source.path)));
            }
        }

        if !self.provides(Signal::Weight) {
            return Err(invalid("no source provides the weight signal".to_string()));
        }
        match (&self.neutron, self.provides(Signal::Reference)) {
            (Some(_), true) => {
                return Err(invalid(
                    "reference column and neutron probe are mutually exclusive".to_string(),
                ));
            }
            (Some(_), false) => {
                if !self.provides(Signal::NeutronGround) || !self.provides(Signal::NeutronReference) {
                    return Err(invalid(
                        "neutron probe needs neutron_ground and neutron_reference columns".to_string(),
                    ));
                }
            }
            (None, false) => {
                return Err(invalid("no source provides a reference signal".to_string()));
            }
            (None, true) => {}
        }

        if self.depth_smoothing.is_some() && !self.provides(Signal::SnowDepth) {
            return Err(invalid("depth_smoothing set but no snow_depth signal".to_string()));
        }
        for (label, smoothing) in [
            ("depth_smoothing", &self.depth_smoothing),
            ("weight_smoothing", &self.weight_smoothing),
            ("reference_smoothing", &self.reference_smoothing),
        ] {
            if let Some(s) = smoothing {
                if s.window == 0 {
                    return Err(invalid(format!("{} window must be at least 1", label)));
                }
                if s.kind == SmoothingKind::Polynomial && (s.window % 2 == 0 || s.order >= s.window) {
                    return Err(invalid(format!(
                        "{} polynomial needs an odd window longer than its order",
                        label
                    )));
                }
            }
        }

        if let Some(thermal) = &self.thermal {
            if !self.provides(Signal::Temperature) {
                return Err(invalid("thermal correction needs a temperature signal".to_string()));
            }
            if thermal.calibration.needs_snow_depth() && !self.provides(Signal::SnowDepth) {
                return Err(invalid("calibration policy needs a snow_depth signal".to_string()));
            }
            if thermal.lag_min > thermal.lag_max {
                return Err(invalid(format!(
                    "thermal lag_min {} exceeds lag_max {}",
                    thermal.lag_min, thermal.lag_max
                )));
            }
        }

        let cmp = &self.comparison;
        match (cmp.lag_min, cmp.lag_max) {
            (Some(min), Some(max)) if min > max => {
                return Err(invalid(format!("comparison lag_min {} exceeds lag_max {}", min, max)));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(invalid("comparison lag_min and lag_max go together".to_string()));
            }
            _ => {}
        }
        if cmp.tolerance_minutes < 0 {
            return Err(invalid("tolerance_minutes must not be negative".to_string()));
        }
        if let Some(period) = &self.period {
            if let (Some(start), Some(end)) = (period.start, period.end) {
                if start > end {
                    return Err(invalid("period start is after its end".to_string()));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parses and validates a sites file held in memory.
pub fn parse_sites(text: &str) -> Result<Vec<SiteConfig>, ConfigError> {
    let file: SitesFile = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut ids = HashSet::new();
    for site in &file.sites {
        site.validate()?;
        if !ids.insert(site.id.as_str()) {
            return Err(ConfigError::Invalid {
                site: site.id.clone(),
                message: "duplicate site id".to_string(),
            });
        }
    }
    Ok(file.sites)
}

/// Reads, parses and validates the sites file at `path`.
pub fn load_sites(path: &Path) -> Result<Vec<SiteConfig>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_sites(&text)
}

/// Looks up a site by id. Returns `None` if not found.
pub fn find_site<'a>(sites: &'a [SiteConfig], id: &str) -> Option<&'a SiteConfig> {
    sites.iter().find(|s| s.id == id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLED: &str = include_str!("../sites.toml");

    fn bundled() -> Vec<SiteConfig> {
        parse_sites(BUNDLED).expect("bundled sites.toml should parse and validate")
    }

    const MINIMAL: &str = r#"
        [[site]]
        id = "test"
        name = "Test site"
        reference_label = "REF"

        [[site.sources]]
        path = "test.csv"
        format = "delimited"
        timestamp_column = "time"
        signals = { weight = "w", reference = "r" }
    "#;

    #[test]
    fn test_bundled_registry_contains_all_field_sites() {
        let sites = bundled();
        for id in ["tapado", "guandacol", "tascadero", "broken_river"] {
            assert!(find_site(&sites, id).is_some(), "sites.toml missing expected site '{}'", id);
        }
    }

    #[test]
    fn test_no_duplicate_site_ids_in_bundled_registry() {
        let sites = bundled();
        let mut seen = HashSet::new();
        for site in &sites {
            assert!(seen.insert(&site.id), "duplicate site id '{}'", site.id);
        }
    }

    #[test]
    fn test_tapado_constants() {
        let sites = bundled();
        let tapado = find_site(&sites, "tapado").unwrap();
        let thermal = tapado.thermal.as_ref().expect("Tapado is thermally corrected");
        assert_eq!(thermal.lag_range(), -3..=3);
        assert_eq!(
            thermal.calibration,
            CalibrationPolicy::FirstDrySamples { count: 7, max_depth: 10.0, inclusive: true }
        );
        assert_eq!(tapado.comparison.lag_range(), Some(-24..=24));
        assert_eq!(tapado.comparison.r2, R2Convention::SquaredPearson);
        assert_eq!(tapado.sources[0].delimiter, ';');
        assert_eq!(tapado.weight_smoothing.as_ref().map(|s| s.window), Some(12));
    }

    #[test]
    fn test_broken_river_uses_neutron_reference() {
        let sites = bundled();
        let br = find_site(&sites, "broken_river").unwrap();
        assert!(br.neutron.is_some());
        assert!(br.thermal.is_none());
        assert_eq!(br.comparison.tolerance_minutes, 30);
        assert_eq!(br.comparison.lag_range(), None);
        assert_eq!(br.transforms.weight_min, None, "raw weights feed the rolling mean unmasked");
        assert_eq!(
            (br.comparison.plausible_min, br.comparison.plausible_max),
            (Some(0.0), Some(500.0))
        );
        let (source, column) = br.source_for(Signal::NeutronGround).unwrap();
        assert_eq!(source.format, SourceFormat::Datalogger);
        assert_eq!(column, "Ground_Det");
    }

    #[test]
    fn test_guandacol_depth_is_inverted_and_polynomially_smoothed() {
        let sites = bundled();
        let g = find_site(&sites, "guandacol").unwrap();
        let depth = g.transforms.snow_depth.unwrap();
        assert_eq!(depth.apply(5.0), 20.0, "25 − 5 cm");
        let smoothing = g.depth_smoothing.as_ref().unwrap();
        assert_eq!(smoothing.kind, SmoothingKind::Polynomial);
        assert_eq!((smoothing.window, smoothing.order), (13, 2));
        assert!(g.comparison.reference_calibration);
    }

    #[test]
    fn test_minimal_site_gets_defaults() {
        let sites = parse_sites(MINIMAL).unwrap();
        let site = &sites[0];
        assert_eq!(site.sources[0].delimiter, ',');
        assert_eq!(site.comparison.tolerance_minutes, 0);
        assert_eq!(site.comparison.difference, DifferenceSign::CandidateMinusReference);
        assert_eq!(site.comparison.r2, R2Convention::CoefficientOfDetermination);
        assert!(site.thermal.is_none());
    }

    #[test]
    fn test_missing_reference_is_rejected() {
        let text = MINIMAL.replace(r#", reference = "r""#, "");
        let err = parse_sites(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "got {:?}", err);
    }

    #[test]
    fn test_thermal_without_temperature_is_rejected() {
        let text = format!(
            "{}\n[site.thermal]\ncalibration = {{ policy = \"initial_span\", days = 7 }}\n",
            MINIMAL
        );
        let err = parse_sites(&text).unwrap_err();
        assert!(err.to_string().contains("temperature"), "got {}", err);
    }

    #[test]
    fn test_half_open_comparison_lag_is_rejected() {
        let text = format!("{}\n[site.comparison]\nlag_min = -3\n", MINIMAL);
        assert!(parse_sites(&text).is_err());
    }

    #[test]
    fn test_duplicate_site_ids_are_rejected() {
        let text = format!("{}{}", MINIMAL, MINIMAL);
        let err = parse_sites(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got {}", err);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(parse_sites("[[site]\nid ="), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_sites(Path::new("/nonexistent/sites.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_find_site_returns_none_for_unknown_id() {
        assert!(find_site(&bundled(), "nowhere").is_none());
    }
}
