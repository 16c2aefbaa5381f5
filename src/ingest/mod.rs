/// Input adapters for field data files.
///
/// Each adapter turns one file layout into a `SignalTable`: a chronological
/// timeline plus named numeric columns. Which column carries which signal is
/// decided by the site configuration, not here.
///
/// Submodules:
/// - `delimited` : header row + delimiter (station logger exports).
/// - `datalogger`: header-less datalogger tables with a fixed preamble.
/// - `keyvalue`  : `key,value,...` telemetry records.

pub mod datalogger;
pub mod delimited;
pub mod keyvalue;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};

use crate::config::{SourceConfig, SourceFormat};
use crate::logging::{self, Stage};
use crate::model::{PipelineError, Series};

/// Tried when a source lists no timestamp formats.
pub const DEFAULT_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

// ---------------------------------------------------------------------------
// Signal table
// ---------------------------------------------------------------------------

/// Timestamps plus named numeric columns, sorted chronologically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignalTable {
    timestamps: Vec<NaiveDateTime>,
    columns: Vec<(String, Vec<Option<f64>>)>,
}

impl SignalTable {
    /// Builds a table from unsorted rows. Each row carries one value per
    /// column name; rows with equal timestamps keep their file order.
    pub fn from_rows(names: Vec<String>, mut rows: Vec<(NaiveDateTime, Vec<Option<f64>>)>) -> Self {
        rows.sort_by_key(|(t, _)| *t);
        let mut columns: Vec<(String, Vec<Option<f64>>)> = names
            .into_iter()
            .map(|name| (name, Vec::with_capacity(rows.len())))
            .collect();
        let mut timestamps = Vec::with_capacity(rows.len());
        for (t, values) in rows {
            timestamps.push(t);
            for (i, (_, column)) in columns.iter_mut().enumerate() {
                column.push(values.get(i).copied().flatten());
            }
        }
        SignalTable { timestamps, columns }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// The named column as a `Series` called `series_name`.
    ///
    /// # Errors
    /// `MalformedInput` if the table has no such column.
    pub fn series(&self, column: &str, series_name: &str) -> Result<Series, PipelineError> {
        let (_, values) = self
            .columns
            .iter()
            .find(|(name, _)| name == column)
            .ok_or_else(|| {
                PipelineError::MalformedInput(format!(
                    "column '{}' not found (have: {})",
                    column,
                    self.column_names().join(", ")
                ))
            })?;
        Series::new(series_name, self.timestamps.clone(), values.clone())
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Parses a numeric cell. Empty cells and `NaN`/`NAN`/`null` markers are
/// missing; a decimal comma is accepted when no dot is present.
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = unquote(raw);
    if s.is_empty()
        || s.eq_ignore_ascii_case("nan")
        || s.eq_ignore_ascii_case("null")
        || s.eq_ignore_ascii_case("none")
    {
        return None;
    }
    let parsed = s.parse::<f64>().ok().or_else(|| {
        (s.matches(',').count() == 1 && !s.contains('.'))
            .then(|| s.replace(',', "."))
            .and_then(|fixed| fixed.parse::<f64>().ok())
    })?;
    parsed.is_finite().then_some(parsed)
}

/// Parses a timestamp with the first matching format.
///
/// Offset-qualified timestamps (RFC 3339 or a trailing `%z`) are reduced to
/// their local wall time; a bare date means midnight.
pub fn parse_timestamp(raw: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let s = unquote(raw);
    if s.is_empty() {
        return None;
    }
    let parsed = if formats.is_empty() {
        DEFAULT_TIMESTAMP_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    } else {
        formats
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    };
    parsed
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local()))
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z"]
                .iter()
                .find_map(|f| DateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.naive_local())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Splits a record on `delimiter`, honouring double-quoted fields.
pub fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn unquote(raw: &str) -> &str {
    let s = raw.trim();
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
        .trim()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Resolves `path` against `base_dir` unless it is absolute.
pub fn resolve_path(path: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Reads one configured source into a `SignalTable`.
///
/// # Errors
/// - `Io` if the file cannot be read.
/// - `MalformedInput` from the format adapter.
pub fn load_source(source: &SourceConfig, base_dir: &Path) -> Result<SignalTable, PipelineError> {
    let path = resolve_path(&source.path, base_dir);
    let bytes = std::fs::read(&path).map_err(|e| PipelineError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let text = String::from_utf8_lossy(&bytes);

    let table = match source.format {
        SourceFormat::Delimited => delimited::parse(
            &text,
            &delimited::DelimitedLayout {
                delimiter: source.delimiter,
                skip_rows: source.skip_rows,
                column_names: &source.column_names,
                timestamp_column: &source.timestamp_column,
                timestamp_formats: &source.timestamp_formats,
            },
        )?,
        SourceFormat::Datalogger => datalogger::parse(
            &text,
            &datalogger::DataloggerLayout {
                skip_rows: source.skip_rows,
                column_names: &source.column_names,
                timestamp_column: &source.timestamp_column,
                timestamp_formats: &source.timestamp_formats,
            },
        )?,
        SourceFormat::KeyValue => {
            keyvalue::parse(&text, &source.timestamp_column, &source.timestamp_formats)
        }
    };

    logging::debug(
        Stage::Ingest,
        None,
        &format!("{}: {} rows, columns [{}]", path.display(), table.len(), table.column_names().join(", ")),
    );
    Ok(table)
}
