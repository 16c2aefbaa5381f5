/// Datalogger tables (Campbell-style `.dat`).
///
/// The file opens with a fixed number of preamble lines (station info, field
/// names, units, processing), followed by comma-separated records with quoted
/// timestamps and `"NAN"` for missing readings. Column names are supplied by
/// the site configuration.

use crate::ingest::{parse_number, parse_timestamp, split_fields, SignalTable};
use crate::model::PipelineError;

#[derive(Debug, Clone, Copy)]
pub struct DataloggerLayout<'a> {
    pub skip_rows: usize,
    pub column_names: &'a [String],
    pub timestamp_column: &'a str,
    pub timestamp_formats: &'a [String],
}

/// Parses a datalogger table.
///
/// Records too short to hold the timestamp are skipped; trailing columns a
/// record does not reach are missing.
///
/// # Errors
/// `MalformedInput` if the timestamp column is not among the configured
/// names or a record's timestamp cannot be parsed.
pub fn parse(text: &str, layout: &DataloggerLayout<'_>) -> Result<SignalTable, PipelineError> {
    let ts_idx = layout
        .column_names
        .iter()
        .position(|n| n == layout.timestamp_column)
        .ok_or_else(|| {
            PipelineError::MalformedInput(format!(
                "timestamp column '{}' not in column_names",
                layout.timestamp_column
            ))
        })?;
    let value_names: Vec<String> = layout
        .column_names
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_idx)
        .map(|(_, n)| n.clone())
        .collect();

    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate().skip(layout.skip_rows) {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(line, ',');
        if fields.len() <= ts_idx {
            continue;
        }

        let timestamp = parse_timestamp(&fields[ts_idx], layout.timestamp_formats).ok_or_else(|| {
            PipelineError::MalformedInput(format!(
                "line {}: unparseable timestamp '{}'",
                line_no + 1,
                fields[ts_idx].trim()
            ))
        })?;
        let values = (0..layout.column_names.len())
            .filter(|i| *i != ts_idx)
            .map(|i| fields.get(i).and_then(|f| parse_number(f)))
            .collect();
        rows.push((timestamp, values));
    }

    Ok(SignalTable::from_rows(value_names, rows))
}
