//! Long-format co-occurrence table and the builder that fills it from
//! per-partition term-term matrices.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, TermTermMatrix};
use crate::document_index::{Document, DocumentIndex, N_RAW_TOKENS, N_TOKENS, PivotValue};
use crate::error::{CoOccurrenceError, Result};
use crate::vocabulary::Token2Id;

pub const N_DOCUMENTS: &str = "n_documents";
pub const N_WINDOWS: &str = "n_windows";
pub const N_WINDOW_TOKENS: &str = "n_window_tokens";

/// One co-occurring pair, `w1_id < w2_id`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoOccurrence {
    /// Values of the table's key columns, in column order.
    pub keys: Vec<PivotValue>,
    /// Row of the partition document index; `None` after regrouping.
    pub document_id: Option<u32>,
    pub w1_id: u32,
    pub w2_id: u32,
    pub value: u64,
    pub hal_value: Option<f64>,
    pub value_n_d: Option<f64>,
    pub value_n_t: Option<f64>,
    pub score: Option<f64>,
    /// Id of the `w1/w2` pair token in the vectorized corpus.
    pub token_id: Option<u32>,
    pub w1: Option<String>,
    pub w2: Option<String>,
    pub token: Option<String>,
}

impl CoOccurrence {
    pub fn new(w1_id: u32, w2_id: u32, value: u64) -> Self {
        CoOccurrence {
            w1_id,
            w2_id,
            value,
            ..Default::default()
        }
    }

    pub fn get(&self, column: ValueColumn) -> Option<f64> {
        match column {
            ValueColumn::Value => Some(self.value as f64),
            ValueColumn::ValueNd => self.value_n_d,
            ValueColumn::ValueNt => self.value_n_t,
            ValueColumn::HalValue => self.hal_value,
            ValueColumn::Score => self.score,
        }
    }
}

/// Numeric columns that can be ranked or normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueColumn {
    Value,
    ValueNd,
    ValueNt,
    HalValue,
    Score,
}

impl ValueColumn {
    pub fn name(&self) -> &'static str {
        match self {
            ValueColumn::Value => "value",
            ValueColumn::ValueNd => "value_n_d",
            ValueColumn::ValueNt => "value_n_t",
            ValueColumn::HalValue => "hal_value",
            ValueColumn::Score => "score",
        }
    }
}

impl fmt::Display for ValueColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueColumn {
    type Err = CoOccurrenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "value" => Ok(ValueColumn::Value),
            "value_n_d" => Ok(ValueColumn::ValueNd),
            "value_n_t" => Ok(ValueColumn::ValueNt),
            "hal_value" => Ok(ValueColumn::HalValue),
            "score" => Ok(ValueColumn::Score),
            other => Err(CoOccurrenceError::usage(format!(
                "expected one of value, value_n_d, value_n_t, hal_value, score but found {other}"
            ))),
        }
    }
}

/// Denominators used for `value_n_d`/`value_n_t`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalsBasis {
    /// Partition totals from the document index, unaffected by truncation.
    #[default]
    DocumentIndex,
    /// `value_n_t` divides by the sum of the values retained in the partition.
    RetainedPairs,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoOccurrenceTable {
    key_columns: Vec<String>,
    rows: Vec<CoOccurrence>,
}

const ID_COLUMNS: [&str; 4] = ["document_id", "w1_id", "w2_id", "token_id"];

impl CoOccurrenceTable {
    pub fn new(key_columns: Vec<String>, rows: Vec<CoOccurrence>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|r| r.keys.len() != key_columns.len()) {
            return Err(CoOccurrenceError::usage(format!(
                "row ({}, {}) has {} key values, table has {} key columns",
                row.w1_id,
                row.w2_id,
                row.keys.len(),
                key_columns.len()
            )));
        }
        Ok(CoOccurrenceTable { key_columns, rows })
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn has_key_column(&self, column: &str) -> bool {
        self.key_columns.iter().any(|c| c == column)
    }

    pub fn rows(&self) -> &[CoOccurrence] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<CoOccurrence> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_value(&self) -> u64 {
        self.rows.iter().map(|r| r.value).sum()
    }

    pub fn is_decoded(&self) -> bool {
        self.rows.first().is_some_and(|r| r.w1.is_some())
    }

    pub fn retain<F: FnMut(&CoOccurrence) -> bool>(&mut self, f: F) {
        self.rows.retain(f);
    }

    pub fn truncate(&mut self, n: usize) {
        self.rows.truncate(n);
    }

    /// New table holding the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        CoOccurrenceTable {
            key_columns: self.key_columns.clone(),
            rows: indices.iter().filter_map(|&i| self.rows.get(i).cloned()).collect(),
        }
    }

    /// Value of a key or id column for `row`.
    pub fn column_value(&self, row: &CoOccurrence, column: &str) -> Option<PivotValue> {
        if let Some(i) = self.key_columns.iter().position(|c| c == column) {
            return row.keys.get(i).cloned();
        }
        let int = |n: u32| Some(PivotValue::Int(n as i64));
        match column {
            "document_id" => row.document_id.and_then(int),
            "w1_id" => int(row.w1_id),
            "w2_id" => int(row.w2_id),
            "token_id" => row.token_id.and_then(int),
            _ => None,
        }
    }

    /// Group key of `row` over `columns`; every column must resolve.
    pub fn group_key(&self, row: &CoOccurrence, columns: &[String]) -> Result<Vec<PivotValue>> {
        columns
            .iter()
            .map(|c| {
                self.column_value(row, c).ok_or_else(|| {
                    CoOccurrenceError::usage(format!("unknown or empty group column {c:?}"))
                })
            })
            .collect()
    }

    pub fn is_known_column(&self, column: &str) -> bool {
        self.has_key_column(column) || ID_COLUMNS.contains(&column)
    }

    /// Appends a key column computed per row.
    pub fn add_key_column<F>(&mut self, name: &str, mut value: F) -> Result<()>
    where
        F: FnMut(&CoOccurrence) -> Option<PivotValue>,
    {
        if self.has_key_column(name) {
            return Err(CoOccurrenceError::usage(format!("column {name:?} already exists")));
        }
        for row in &mut self.rows {
            let v = value(row).ok_or_else(|| {
                CoOccurrenceError::usage(format!(
                    "no value for new column {name:?} in row ({}, {})",
                    row.w1_id, row.w2_id
                ))
            })?;
            row.keys.push(v);
        }
        self.key_columns.push(name.to_string());
        Ok(())
    }

    /// Adds `target` as a copy of key column `source` unless `target` exists.
    pub fn alias_key_column(&mut self, source: &str, target: &str) -> Result<()> {
        if self.has_key_column(target) {
            return Ok(());
        }
        let i = self
            .key_columns
            .iter()
            .position(|c| c == source)
            .ok_or_else(|| CoOccurrenceError::usage(format!("no key column {source:?}")))?;
        self.add_key_column(target, |row| row.keys.get(i).cloned())
    }

    /// Fills `w1`, `w2` and `token` from the vocabulary. No-op when decoded.
    pub fn decode(&mut self, vocabulary: &Token2Id) -> Result<()> {
        if self.is_decoded() {
            return Ok(());
        }
        for row in &mut self.rows {
            let (w1, w2) = decode_pair(vocabulary, row.w1_id, row.w2_id)?;
            row.token = Some(pair_token(&w1, &w2));
            row.w1 = Some(w1);
            row.w2 = Some(w2);
        }
        Ok(())
    }

    /// Builds the `w1/w2` pair vocabulary in row order and sets `token_id`.
    pub fn assign_pair_ids(&mut self, vocabulary: &Token2Id) -> Result<Token2Id> {
        let mut pairs = Token2Id::new();
        for row in &mut self.rows {
            let (w1, w2) = decode_pair(vocabulary, row.w1_id, row.w2_id)?;
            row.token_id = Some(pairs.add(&pair_token(&w1, &w2))?);
        }
        pairs.close();
        Ok(pairs)
    }

    /// Drops rows whose pair total across all rows is below `threshold`.
    pub fn truncate_by_global_count(&mut self, threshold: u64) {
        if threshold < 2 {
            return;
        }
        let mut totals: HashMap<(u32, u32), u64> = HashMap::new();
        for row in &self.rows {
            *totals.entry((row.w1_id, row.w2_id)).or_insert(0) += row.value;
        }
        self.rows.retain(|row| totals[&(row.w1_id, row.w2_id)] >= threshold);
    }

    /// Computes `value_n_d` and `value_n_t` from the partition index.
    pub fn compute_normalized(
        &mut self,
        partition_index: &DocumentIndex,
        basis: TotalsBasis,
    ) -> Result<()> {
        let mut retained: HashMap<u32, u64> = HashMap::new();
        if basis == TotalsBasis::RetainedPairs {
            for row in &self.rows {
                if let Some(id) = row.document_id {
                    *retained.entry(id).or_insert(0) += row.value;
                }
            }
        }
        for row in &mut self.rows {
            let document_id = row.document_id.ok_or_else(|| {
                CoOccurrenceError::usage("normalization requires a document_id on every row")
            })?;
            let partition = partition_index.get(document_id).ok_or_else(|| {
                CoOccurrenceError::usage(format!(
                    "document_id {document_id} not in partition index"
                ))
            })?;
            let n_documents = partition.value(N_DOCUMENTS).and_then(|v| v.as_f64());
            let n_tokens = match basis {
                TotalsBasis::DocumentIndex => partition.n_raw_tokens.map(|n| n as f64),
                TotalsBasis::RetainedPairs => retained.get(&document_id).map(|&n| n as f64),
            };
            row.value_n_d = ratio(row.value, n_documents);
            row.value_n_t = ratio(row.value, n_tokens);
        }
        Ok(())
    }

    pub fn store<W: Write>(&self, writer: W) -> Result<()> {
        let optional = |f: fn(&CoOccurrence) -> bool| self.rows.iter().any(f);
        let has_hal = optional(|r| r.hal_value.is_some());
        let has_score = optional(|r| r.score.is_some());
        let has_token_id = optional(|r| r.token_id.is_some());
        let decoded = self.is_decoded();

        let mut header: Vec<String> = vec!["w1_id".into(), "w2_id".into(), "value".into()];
        header.extend(self.key_columns.iter().cloned());
        header.extend(["document_id", "value_n_d", "value_n_t"].map(String::from));
        if has_hal {
            header.push("hal_value".into());
        }
        if has_score {
            header.push("score".into());
        }
        if has_token_id {
            header.push("token_id".into());
        }
        if decoded {
            header.extend(["w1", "w2", "token"].map(String::from));
        }

        let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&header)?;
        for row in &self.rows {
            let mut record =
                vec![row.w1_id.to_string(), row.w2_id.to_string(), row.value.to_string()];
            record.extend(row.keys.iter().map(|k| k.to_string()));
            record.push(row.document_id.map(|d| d.to_string()).unwrap_or_default());
            record.push(opt(row.value_n_d));
            record.push(opt(row.value_n_t));
            if has_hal {
                record.push(opt(row.hal_value));
            }
            if has_score {
                record.push(opt(row.score));
            }
            if has_token_id {
                record.push(row.token_id.map(|t| t.to_string()).unwrap_or_default());
            }
            if decoded {
                for s in [&row.w1, &row.w2, &row.token] {
                    record.push(s.clone().unwrap_or_default());
                }
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reads a table written by [`store`](Self::store). Unrecognized columns
    /// become key columns.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let known = [
            "w1_id",
            "w2_id",
            "value",
            "document_id",
            "value_n_d",
            "value_n_t",
            "hal_value",
            "score",
            "token_id",
            "w1",
            "w2",
            "token",
        ];
        let at: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
        for required in ["w1_id", "w2_id", "value"] {
            if !at.contains_key(required) {
                return Err(CoOccurrenceError::usage(format!(
                    "co-occurrence file lacks column {required}"
                )));
            }
        }
        let key_positions: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !known.contains(h))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let field = |name: &str| {
                at.get(name)
                    .and_then(|&i| record.get(i))
                    .filter(|v| !v.is_empty())
            };
            let int = |name: &str| field(name).map(|v| parse_cell::<u64>(name, v)).transpose();
            let float = |name: &str| field(name).map(|v| parse_cell::<f64>(name, v)).transpose();
            let text = |name: &str| field(name).map(str::to_string);
            let required = |name: &str| -> Result<u64> {
                int(name)?.ok_or_else(|| CoOccurrenceError::usage(format!("empty {name}")))
            };
            rows.push(CoOccurrence {
                keys: key_positions
                    .iter()
                    .map(|(i, _)| PivotValue::parse(record.get(*i).unwrap_or_default()))
                    .collect(),
                document_id: int("document_id")?.map(|d| d as u32),
                w1_id: required("w1_id")? as u32,
                w2_id: required("w2_id")? as u32,
                value: required("value")?,
                hal_value: float("hal_value")?,
                value_n_d: float("value_n_d")?,
                value_n_t: float("value_n_t")?,
                score: float("score")?,
                token_id: int("token_id")?.map(|t| t as u32),
                w1: text("w1"),
                w2: text("w2"),
                token: text("token"),
            });
        }
        Self::new(key_positions.into_iter().map(|(_, h)| h).collect(), rows)
    }
}

fn ratio(value: u64, denominator: Option<f64>) -> Option<f64> {
    denominator.filter(|d| *d > 0.0).map(|d| value as f64 / d)
}

fn parse_cell<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| CoOccurrenceError::usage(format!("bad {name} {value:?}")))
}

pub fn pair_token(w1: &str, w2: &str) -> String {
    format!("{w1}/{w2}")
}

fn decode_pair(vocabulary: &Token2Id, w1_id: u32, w2_id: u32) -> Result<(String, String)> {
    let lookup = |id: u32| {
        vocabulary
            .id2token(id)
            .map(str::to_string)
            .ok_or_else(|| CoOccurrenceError::usage(format!("token id {id} not in vocabulary")))
    };
    Ok((lookup(w1_id)?, lookup(w2_id)?))
}

/// One partition's matrix and its row in the partition index.
pub struct PartitionMatrix<'a> {
    pub key: Option<PivotValue>,
    pub document_id: u32,
    pub matrix: &'a TermTermMatrix,
}

/// Converts partition matrices into a sorted long-format table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableBuilder {
    pub min_count: u64,
    pub totals: TotalsBasis,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_count(mut self, min_count: u64) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn totals(mut self, totals: TotalsBasis) -> Self {
        self.totals = totals;
        self
    }

    /// Rows are sorted by `(w1_id, w2_id)`; equal pairs keep partition order.
    /// Rows below `min_count` are dropped before normalized columns are computed.
    pub fn build(
        &self,
        key_column: Option<&str>,
        partitions: &[PartitionMatrix<'_>],
        partition_index: &DocumentIndex,
    ) -> Result<CoOccurrenceTable> {
        let mut rows = Vec::new();
        for partition in partitions {
            let keys: Vec<PivotValue> = match (key_column, &partition.key) {
                (Some(_), Some(key)) => vec![key.clone()],
                (None, _) => Vec::new(),
                (Some(column), None) => {
                    return Err(CoOccurrenceError::usage(format!(
                        "partition {} has no value for {column:?}",
                        partition.document_id
                    )));
                }
            };
            for cell in partition.matrix.cells() {
                if cell.value < self.min_count {
                    continue;
                }
                rows.push(CoOccurrence {
                    keys: keys.clone(),
                    document_id: Some(partition.document_id),
                    hal_value: cell.hal_value,
                    ..CoOccurrence::new(cell.w1_id, cell.w2_id, cell.value)
                });
            }
        }
        rows.sort_by_key(|r| (r.w1_id, r.w2_id));
        let key_columns = key_column.map(|k| vec![k.to_string()]).unwrap_or_default();
        let mut table = CoOccurrenceTable::new(key_columns, rows)?;
        table.compute_normalized(partition_index, self.totals)?;
        Ok(table)
    }
}

/// One row per partition: key value, document count, token and window totals.
pub fn partition_document_index(
    key_column: Option<&str>,
    partitions: &[(Option<PivotValue>, Vec<u32>, &Aggregate)],
    source: &DocumentIndex,
) -> Result<DocumentIndex> {
    let mut documents = Vec::with_capacity(partitions.len());
    for (i, (key, document_ids, aggregate)) in partitions.iter().enumerate() {
        let filename = match (key_column, key) {
            (Some(column), Some(value)) => format!("{column}_{value}"),
            _ => "corpus".to_string(),
        };
        let mut document = Document::new(i as u32, filename);
        if let (Some(column), Some(value)) = (key_column, key) {
            document.attributes.insert(column.to_string(), value.clone());
        }
        let has_raw = document_ids
            .iter()
            .any(|&id| source.get(id).is_some_and(|d| d.n_raw_tokens.is_some()));
        if has_raw {
            document.n_raw_tokens = Some(source.sum_of(document_ids, N_RAW_TOKENS) as u64);
            document.n_tokens = Some(source.sum_of(document_ids, N_TOKENS) as u64);
        }
        let n_windows: u64 = aggregate.document_stats.iter().map(|s| s.n_windows).sum();
        let n_window_tokens: u64 = aggregate.document_stats.iter().map(|s| s.n_tokens).sum();
        for (name, value) in [
            (N_DOCUMENTS, document_ids.len() as u64),
            (N_WINDOWS, n_windows),
            (N_WINDOW_TOKENS, n_window_tokens),
        ] {
            document.attributes.insert(name.to_string(), PivotValue::Int(value as i64));
        }
        documents.push(document);
    }
    DocumentIndex::new(documents)
}
