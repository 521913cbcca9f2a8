//! Sheet boundary: rows of key/value records in, rows out.
//!
//! Imports arrive as CSV with a header row. Exports go through a
//! [`SheetWriter`] so the binary format can be swapped without touching the
//! engine.

use crate::EngineError;
use leadflow_core::RowPayload;
use serde_json::Value;
use std::collections::BTreeSet;

pub trait SheetWriter: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn extension(&self) -> &'static str;
    fn write_rows(&self, rows: &[RowPayload]) -> Result<Vec<u8>, EngineError>;
}

/// Writes rows as CSV. The header is the first-seen union of row keys, so
/// rows with missing columns leave those cells empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSheetWriter;

impl SheetWriter for CsvSheetWriter {
    fn content_type(&self) -> &'static str {
        "text/csv"
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn write_rows(&self, rows: &[RowPayload]) -> Result<Vec<u8>, EngineError> {
        let mut columns: Vec<&str> = Vec::new();
        let mut seen = BTreeSet::new();
        for row in rows {
            for key in row.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.as_str());
                }
            }
        }
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&columns)
            .map_err(|err| EngineError::Sheet(err.to_string()))?;
        for row in rows {
            let record = columns
                .iter()
                .map(|column| row.get(*column).map(cell_text).unwrap_or_default());
            writer
                .write_record(record)
                .map_err(|err| EngineError::Sheet(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| EngineError::Sheet(err.to_string()))
    }
}

/// Parses a CSV sheet into rows keyed by the header row.
///
/// Blank cells are left out of the row and rows with no values are skipped.
/// Blank headers become `__EMPTY_<n>` and repeated headers get a `_<n>` suffix.
pub fn read_csv_rows(bytes: &[u8]) -> Result<Vec<RowPayload>, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|err| EngineError::validation(format!("failed to read sheet headers: {err}")))?
        .clone();
    let keys = header_keys(headers.iter());

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|err| {
            EngineError::validation(format!("failed to read sheet row {}: {err}", line + 2))
        })?;
        let mut row = RowPayload::new();
        for (index, cell) in record.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let key = keys
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("__EMPTY_{index}"));
            row.insert(key, Value::String(cell.to_string()));
        }
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn header_keys<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for (index, header) in headers.enumerate() {
        let base = if header.is_empty() {
            format!("__EMPTY_{index}")
        } else {
            header.to_string()
        };
        let mut key = base.clone();
        let mut suffix = 1;
        while !seen.insert(key.clone()) {
            key = format!("{base}_{suffix}");
            suffix += 1;
        }
        keys.push(key);
    }
    keys
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_rows_keyed_by_header_and_skips_blanks() {
        let sheet = b"Name,Phone,City\nAda, 0123 ,\n,,\nGrace,0456,Paris\n";
        let rows = read_csv_rows(sheet).expect("parse sheet");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Name"], json!("Ada"));
        assert_eq!(rows[0]["Phone"], json!("0123"));
        assert!(!rows[0].contains_key("City"));
        assert_eq!(rows[1]["City"], json!("Paris"));
    }

    #[test]
    fn keeps_column_order_and_disambiguates_headers() {
        let rows = read_csv_rows(b"Zip,Name,Name,\n1,a,b,c\n").expect("parse sheet");
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Zip", "Name", "Name_1", "__EMPTY_3"]);
    }

    #[test]
    fn writer_uses_first_seen_union_of_columns() {
        let mut first = RowPayload::new();
        first.insert("Name".to_string(), json!("Ada"));
        first.insert("Score".to_string(), json!(7));
        let mut second = RowPayload::new();
        second.insert("Name".to_string(), json!("Grace, H."));
        second.insert("City".to_string(), json!("Paris"));

        let bytes = CsvSheetWriter
            .write_rows(&[first, second])
            .expect("write sheet");
        let text = String::from_utf8(bytes).expect("utf8");
        assert_eq!(text, "Name,Score,City\nAda,7,\n\"Grace, H.\",,Paris\n");
    }

    #[test]
    fn writer_emits_nothing_for_no_rows() {
        assert!(CsvSheetWriter.write_rows(&[]).expect("write").is_empty());
    }
}
