/// Key-value telemetry records.
///
/// Each line is a flat `key,value,key,value,...` record as forwarded by the
/// scale's IoT gateway, e.g. `dt,2023-06-06T10:20:00+12:00,sw,12.3,sh,180`.
/// Lines with an odd number of fields are corrupt and skipped; records whose
/// timestamp cannot be parsed are dropped.

use std::collections::HashMap;

use crate::ingest::{parse_number, parse_timestamp, SignalTable};

/// Parses key-value records. Columns appear in order of first sighting;
/// a key absent from a record is missing in that row.
pub fn parse(text: &str, timestamp_key: &str, timestamp_formats: &[String]) -> SignalTable {
    let mut names: Vec<String> = Vec::new();
    let mut records: Vec<(chrono::NaiveDateTime, HashMap<String, Option<f64>>)> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() % 2 != 0 {
            continue; // Corrupt record
        }

        let mut timestamp = None;
        let mut values = HashMap::new();
        for pair in fields.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key == timestamp_key {
                timestamp = parse_timestamp(value, timestamp_formats);
            } else {
                if !names.iter().any(|n| n == key) {
                    names.push(key.to_string());
                }
                values.insert(key.to_string(), parse_number(value));
            }
        }
        if let Some(t) = timestamp {
            records.push((t, values));
        }
    }

    let rows = records
        .into_iter()
        .map(|(t, values)| {
            let row = names.iter().map(|n| values.get(n).copied().flatten()).collect();
            (t, row)
        })
        .collect();
    SignalTable::from_rows(names, rows)
}
