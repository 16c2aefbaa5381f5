/// Delimited text exports with a header row.
///
/// Station loggers export one row per sample: a timestamp column followed by
/// one column per sensor, often `;`-separated with day-first dates.

use crate::ingest::{parse_number, parse_timestamp, split_fields, SignalTable};
use crate::model::PipelineError;

/// Layout of one delimited file.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedLayout<'a> {
    pub delimiter: char,
    /// Lines discarded before the header.
    pub skip_rows: usize,
    /// Replaces the file's own header names when non-empty.
    pub column_names: &'a [String],
    pub timestamp_column: &'a str,
    pub timestamp_formats: &'a [String],
}

/// Parses a delimited file into a `SignalTable`.
///
/// Rows with fewer fields than the header are skipped. Every non-timestamp
/// column becomes a numeric column; unparseable cells are missing.
///
/// # Errors
/// `MalformedInput` if the header is missing, lacks the timestamp column, or
/// a kept row has an unparseable timestamp (the message names the line).
pub fn parse(text: &str, layout: &DelimitedLayout<'_>) -> Result<SignalTable, PipelineError> {
    let mut lines = text
        .lines()
        .enumerate()
        .skip(layout.skip_rows)
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| PipelineError::MalformedInput("file has no header row".to_string()))?;
    let header = header.trim_start_matches('\u{feff}');
    let names: Vec<String> = if layout.column_names.is_empty() {
        split_fields(header, layout.delimiter)
            .iter()
            .map(|h| h.trim().to_string())
            .collect()
    } else {
        layout.column_names.to_vec()
    };

    let ts_idx = names
        .iter()
        .position(|n| n == layout.timestamp_column)
        .ok_or_else(|| {
            PipelineError::MalformedInput(format!(
                "timestamp column '{}' not in header",
                layout.timestamp_column
            ))
        })?;
    let value_names: Vec<String> = names
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_idx)
        .map(|(_, n)| n.clone())
        .collect();

    let mut rows = Vec::new();
    for (line_no, line) in lines {
        let fields = split_fields(line, layout.delimiter);
        if fields.len() < names.len() {
            continue; // Skip incomplete rows
        }

        let timestamp = parse_timestamp(&fields[ts_idx], layout.timestamp_formats).ok_or_else(|| {
            PipelineError::MalformedInput(format!(
                "line {}: unparseable timestamp '{}'",
                line_no + 1,
                fields[ts_idx].trim()
            ))
        })?;
        let values = fields
            .iter()
            .take(names.len())
            .enumerate()
            .filter(|(i, _)| *i != ts_idx)
            .map(|(_, f)| parse_number(f))
            .collect();
        rows.push((timestamp, values));
    }

    Ok(SignalTable::from_rows(value_names, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn layout<'a>(formats: &'a [String], names: &'a [String]) -> DelimitedLayout<'a> {
        DelimitedLayout {
            delimiter: ';',
            skip_rows: 0,
            column_names: names,
            timestamp_column: "Fecha",
            timestamp_formats: formats,
        }
    }

    fn day_first() -> Vec<String> {
        vec!["%d-%m-%Y %H:%M".to_string()]
    }

    #[test]
    fn test_parses_semicolon_export_with_day_first_dates() {
        let csv = "Fecha;Peso[kg/m²];Temp[°C]\n\
                   01-07-2024 00:00;10.5;-2.0\n\
                   01-07-2024 01:00;;-2.5\n";
        let formats = day_first();
        let table = parse(csv, &layout(&formats, &[])).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column_names(), vec!["Peso[kg/m²]", "Temp[°C]"]);
        let w = table.series("Peso[kg/m²]", "weight").unwrap();
        assert_eq!(w.values(), &[Some(10.5), None], "empty cell is missing");
        assert_eq!(
            w.timestamps()[1],
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap().and_hms_opt(1, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let csv = "Fecha;a;b\n01-07-2024 00:00;1;2\n01-07-2024 01:00;3\n01-07-2024 02:00;5;6\n";
        let formats = day_first();
        let table = parse(csv, &layout(&formats, &[])).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.series("b", "b").unwrap().values(), &[Some(2.0), Some(6.0)]);
    }

    #[test]
    fn test_bad_timestamp_names_the_line() {
        let csv = "Fecha;a\n01-07-2024 00:00;1\nyesterday;2\n";
        let formats = day_first();
        let err = parse(csv, &layout(&formats, &[])).unwrap_err();
        match err {
            PipelineError::MalformedInput(msg) => assert!(msg.contains("line 3"), "got {}", msg),
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_timestamp_column_is_malformed() {
        let formats = day_first();
        let result = parse("Date;a\n01-07-2024 00:00;1\n", &layout(&formats, &[]));
        assert!(matches!(result, Err(PipelineError::MalformedInput(_))));
    }

    #[test]
    fn test_column_names_override_header() {
        let csv = "x;y;z\n01-07-2024 00:00;1;NaN\n";
        let formats = day_first();
        let names: Vec<String> = ["Fecha", "w", "t"].iter().map(|s| s.to_string()).collect();
        let table = parse(csv, &layout(&formats, &names)).unwrap();
        assert_eq!(table.series("w", "w").unwrap().values(), &[Some(1.0)]);
        assert_eq!(table.series("t", "t").unwrap().values(), &[None]);
    }

    #[test]
    fn test_out_of_order_rows_are_sorted() {
        let csv = "Fecha;a\n01-07-2024 02:00;2\n01-07-2024 01:00;1\n";
        let formats = day_first();
        let table = parse(csv, &layout(&formats, &[])).unwrap();
        assert_eq!(table.series("a", "a").unwrap().values(), &[Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let formats = day_first();
        assert!(parse("\n\n", &layout(&formats, &[])).is_err());
    }
}
