//! Export of query results as txt, csv, tsv or json.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use clap::ValueEnum;
use log::info;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::table::CoOccurrenceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Txt,
    Csv,
    Tsv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Json => "json",
        }
    }
}

/// Neutralizes spreadsheet formulas by prefixing a single quote to cells
/// starting with `=`, `+`, `-`, `@`, tab or carriage return.
pub fn csv_safe_cell(cell: String) -> String {
    match cell.chars().next() {
        Some('=' | '+' | '-' | '@' | '\t' | '\r') => format!("'{cell}"),
        _ => cell,
    }
}

/// Header and cell values of a table, with optional columns only when
/// some row has them.
fn records(table: &CoOccurrenceTable) -> (Vec<String>, Vec<Vec<Value>>) {
    let rows = table.rows();
    let any = |f: fn(&crate::table::CoOccurrence) -> bool| rows.iter().any(f);
    let decoded = table.is_decoded();
    let has_document_id = any(|r| r.document_id.is_some());
    let has_n_d = any(|r| r.value_n_d.is_some());
    let has_n_t = any(|r| r.value_n_t.is_some());
    let has_hal = any(|r| r.hal_value.is_some());
    let has_score = any(|r| r.score.is_some());

    let mut header: Vec<String> = table.key_columns().to_vec();
    if has_document_id {
        header.push("document_id".into());
    }
    header.extend(["w1_id", "w2_id"].map(String::from));
    if decoded {
        header.extend(["w1", "w2", "token"].map(String::from));
    }
    header.push("value".into());
    for (present, name) in [
        (has_n_d, "value_n_d"),
        (has_n_t, "value_n_t"),
        (has_hal, "hal_value"),
        (has_score, "score"),
    ] {
        if present {
            header.push(name.into());
        }
    }

    let float = |v: Option<f64>| v.map(Value::from).unwrap_or(Value::Null);
    let text = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
    let cells = rows
        .iter()
        .map(|row| {
            let mut cells: Vec<Value> = row
                .keys
                .iter()
                .map(|k| match k {
                    crate::document_index::PivotValue::Int(n) => Value::from(*n),
                    crate::document_index::PivotValue::Text(s) => Value::String(s.clone()),
                })
                .collect();
            if has_document_id {
                cells.push(row.document_id.map(Value::from).unwrap_or(Value::Null));
            }
            cells.push(Value::from(row.w1_id));
            cells.push(Value::from(row.w2_id));
            if decoded {
                cells.extend([text(&row.w1), text(&row.w2), text(&row.token)]);
            }
            cells.push(Value::from(row.value));
            for (present, value) in [
                (has_n_d, row.value_n_d),
                (has_n_t, row.value_n_t),
                (has_hal, row.hal_value),
                (has_score, row.score),
            ] {
                if present {
                    cells.push(float(value));
                }
            }
            cells
        })
        .collect();
    (header, cells)
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_safe_cell(s.clone()),
        other => other.to_string(),
    }
}

fn delimited(table: &CoOccurrenceTable, delimiter: u8) -> Result<Vec<u8>> {
    let (header, rows) = records(table);
    let mut wtr = csv::WriterBuilder::new().delimiter(delimiter).from_writer(Vec::new());
    wtr.write_record(&header)?;
    for row in rows {
        wtr.write_record(row.iter().map(cell_to_string))?;
    }
    wtr.flush()?;
    wtr.into_inner()
        .map_err(|e| crate::error::CoOccurrenceError::Io(e.into_error()))
}

/// Column-aligned plain text rendering.
pub fn render_txt(table: &CoOccurrenceTable) -> String {
    let (header, rows) = records(table);
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| match v {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    Value::Number(n) => match n.as_f64() {
                        Some(f) if n.is_f64() => format!("{f:.6}"),
                        _ => n.to_string(),
                    },
                    other => other.to_string(),
                })
                .collect()
        })
        .collect();
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    let mut out = String::new();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    }
    out
}

pub fn render_json(table: &CoOccurrenceTable) -> Result<String> {
    let (header, rows) = records(table);
    let objects: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            let object: Map<String, Value> = header.iter().cloned().zip(row).collect();
            Value::Object(object)
        })
        .collect();
    Ok(serde_json::to_string_pretty(&objects)?)
}

/// Writes `table` to `<dir>/<stem>_<YYYYMMDD_HHMMSS>_<suffix>.<ext>`.
pub fn export_table(
    table: &CoOccurrenceTable,
    dir: &Path,
    stem: &str,
    suffix: &str,
    format: ExportFormat,
) -> Result<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{stem}_{timestamp}_{suffix}.{}", format.extension()));
    let content = match format {
        ExportFormat::Txt => render_txt(table).into_bytes(),
        ExportFormat::Csv => delimited(table, b',')?,
        ExportFormat::Tsv => delimited(table, b'\t')?,
        ExportFormat::Json => render_json(table)?.into_bytes(),
    };
    std::fs::write(&path, content)?;
    info!("exported {} rows to {}", table.len(), path.display());
    Ok(path)
}
