//! Collection export: CSV, JSON and JSON lines
//!
//! Exports read the whole collection, then serialize it. Only the natural key
//! and the record's fields are written; store bookkeeping (first seen,
//! updated at) stays out. Column order follows the header list.

use crate::record::Record;
use crate::storage::{Sink, StorageError};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use thiserror::Error;

/// Name of the natural key column
pub const KEY_COLUMN: &str = "key";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown export format '{0}' (expected csv, json or jsonl)")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    /// One pretty-printed JSON array
    Json,
    /// One compact JSON object per line
    JsonLines,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            _ => Err(ExportError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::JsonLines => "jsonl",
        };
        write!(f, "{}", name)
    }
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::JsonLines => "jsonl",
        }
    }
}

/// Column order for an export
///
/// The key always comes first. Declared `export_fields` follow in their
/// order; without them, the sorted union of every record's field names.
pub fn resolve_header(export_fields: &[String], records: &[Record]) -> Vec<String> {
    let fields: Vec<String> = if export_fields.is_empty() {
        let names: BTreeSet<&String> = records
            .iter()
            .flat_map(|record| record.fields.keys())
            .collect();
        names.into_iter().cloned().collect()
    } else {
        export_fields.to_vec()
    };

    std::iter::once(KEY_COLUMN.to_string())
        .chain(fields.into_iter().filter(|name| name != KEY_COLUMN))
        .collect()
}

/// Writes records in the given format and returns how many were written
pub fn export_records<W: Write>(
    records: &[Record],
    header: &[String],
    format: ExportFormat,
    mut writer: W,
) -> Result<usize, ExportError> {
    match format {
        ExportFormat::Csv => {
            write_row(&mut writer, header)?;
            for record in records {
                let row: Vec<String> = header.iter().map(|column| cell(record, column)).collect();
                write_row(&mut writer, &row)?;
            }
        }
        ExportFormat::Json => {
            let objects: Vec<Value> = records
                .iter()
                .map(|record| Value::Object(project(record, header)))
                .collect();
            serde_json::to_writer_pretty(&mut writer, &objects)?;
            writeln!(writer)?;
        }
        ExportFormat::JsonLines => {
            for record in records {
                serde_json::to_writer(&mut writer, &project(record, header))?;
                writeln!(writer)?;
            }
        }
    }

    writer.flush()?;
    Ok(records.len())
}

/// Reads a whole collection from the sink and exports it
pub fn export_collection<W: Write>(
    sink: &dyn Sink,
    collection: &str,
    export_fields: &[String],
    format: ExportFormat,
    writer: W,
) -> Result<usize, ExportError> {
    let records: Vec<Record> = sink
        .records(collection)?
        .into_iter()
        .map(|stored| stored.record)
        .collect();

    let header = resolve_header(export_fields, &records);
    let written = export_records(&records, &header, format, writer)?;
    tracing::info!("Exported {} {} records as {}", written, collection, format);
    Ok(written)
}

fn cell(record: &Record, column: &str) -> String {
    if column == KEY_COLUMN {
        record.key.clone()
    } else {
        record.field_text(column).unwrap_or_default()
    }
}

/// The key plus the header's fields, in header order; absent fields are left out
fn project(record: &Record, header: &[String]) -> Map<String, Value> {
    let mut object = Map::new();
    for column in header {
        if column == KEY_COLUMN {
            object.insert(KEY_COLUMN.to_string(), Value::String(record.key.clone()));
        } else if let Some(value) = record.get(column) {
            object.insert(column.clone(), value.clone());
        }
    }
    object
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(writer: &mut W, row: &[String]) -> io::Result<()> {
    let line: Vec<String> = row
        .iter()
        .map(|field| {
            if needs_quotes(field) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect();
    writeln!(writer, "{}", line.join(","))
}
