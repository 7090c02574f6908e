//! Flattened CSV output
//!
//! Nested objects become dotted columns (`amount.value`). Columns appear in
//! the order they are first seen; cells a record lacks or holds as `null`
//! stay empty. Files use
//! `;` as delimiter and start with a UTF-8 BOM so spreadsheet software picks
//! the right encoding.

use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const BOM: &[u8] = b"\xEF\xBB\xBF";
const DELIMITER: u8 = b';';

const DATE_COLUMNS: &[&str] = &["timestamp"];
const AMOUNT_COLUMNS: &[&str] = &[
    "amount.value",
    "amount.fractionDigits",
    "subAmount.value",
    "subAmount.fractionDigits",
];

/// Rectangular, string-valued table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    // Per column: some row holds a non-null value
    filled: Vec<bool>,
}

impl Table {
    /// Flatten JSON records into a table
    pub fn flatten(records: &[Value]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut filled: Vec<bool> = Vec::new();
        let mut flat_records = Vec::with_capacity(records.len());

        for record in records {
            let mut cells = Vec::new();
            match record {
                Value::Object(object) => flatten_object(object, "", &mut cells),
                other => cells.push(("value".to_string(), other)),
            }
            for (key, value) in &cells {
                let i = *index.entry(key.clone()).or_insert_with(|| {
                    columns.push(key.clone());
                    filled.push(false);
                    columns.len() - 1
                });
                filled[i] |= !value.is_null();
            }
            flat_records.push(cells);
        }

        let rows = flat_records
            .into_iter()
            .map(|cells| {
                let mut row = vec![String::new(); columns.len()];
                for (key, value) in cells {
                    row[index[&key]] = render(value);
                }
                row
            })
            .collect();

        Self { columns, rows, filled }
    }

    /// Check if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remove columns that are `null` or missing in every row
    ///
    /// Empty strings count as values, so a column of `""` is kept.
    pub fn drop_empty_columns(&mut self) {
        let keep = std::mem::take(&mut self.filled);

        self.columns = retain_flagged(std::mem::take(&mut self.columns), &keep);
        for row in &mut self.rows {
            *row = retain_flagged(std::mem::take(row), &keep);
        }
        self.filled = vec![true; self.columns.len()];
    }

    /// French formatting: `DD/MM/YYYY` dates and decimal commas in amounts
    pub fn localize(&mut self) {
        for (i, column) in self.columns.iter().enumerate() {
            let convert: fn(&str) -> String = if DATE_COLUMNS.contains(&column.as_str()) {
                french_date
            } else if AMOUNT_COLUMNS.contains(&column.as_str()) {
                decimal_comma
            } else {
                continue;
            };
            for row in &mut self.rows {
                row[i] = convert(&row[i]);
            }
        }
    }

    /// Write to `path`
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()
    }

    /// Write BOM, header and rows
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_all(BOM)?;
        let mut writer = ::csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_writer(out);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()
    }
}

fn flatten_object<'a>(object: &'a Map<String, Value>, prefix: &str, out: &mut Vec<(String, &'a Value)>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten_object(inner, &name, out),
            leaf => out.push((name, leaf)),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn retain_flagged<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, &keep)| keep.then_some(item))
        .collect()
}

/// `2024-03-01T09:15:02.123+0000` -> `01/03/2024`; unparseable -> empty
fn french_date(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|date| date.format("%d/%m/%Y").to_string())
        .unwrap_or_default()
}

/// `-12.5` -> `-12,5`; non-numeric -> empty
fn decimal_comma(raw: &str) -> String {
    let raw = raw.trim();
    if raw.parse::<f64>().is_ok() {
        raw.replace('.', ",")
    } else {
        String::new()
    }
}
