//! Document index: one row per document with token counts and pivot columns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{CoOccurrenceError, Result};

pub const DOCUMENT_ID: &str = "document_id";
pub const FILENAME: &str = "filename";
pub const DOCUMENT_NAME: &str = "document_name";
pub const N_TOKENS: &str = "n_tokens";
pub const N_RAW_TOKENS: &str = "n_raw_tokens";

const BUILTIN_COLUMNS: [&str; 5] = [DOCUMENT_ID, FILENAME, DOCUMENT_NAME, N_TOKENS, N_RAW_TOKENS];

/// A value in a pivot/partition column. Integers order before text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PivotValue {
    Int(i64),
    Text(String),
}

impl PivotValue {
    /// Parses integers as `Int`, everything else as `Text`.
    pub fn parse(value: &str) -> Self {
        match value.trim().parse::<i64>() {
            Ok(n) => PivotValue::Int(n),
            Err(_) => PivotValue::Text(value.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PivotValue::Int(n) => Some(*n as f64),
            PivotValue::Text(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for PivotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PivotValue::Int(n) => write!(f, "{n}"),
            PivotValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PivotValue {
    fn from(n: i64) -> Self {
        PivotValue::Int(n)
    }
}

impl From<i32> for PivotValue {
    fn from(n: i32) -> Self {
        PivotValue::Int(n as i64)
    }
}

impl From<u64> for PivotValue {
    fn from(n: u64) -> Self {
        PivotValue::Int(n as i64)
    }
}

impl From<&str> for PivotValue {
    fn from(s: &str) -> Self {
        PivotValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub document_id: u32,
    pub filename: String,
    pub document_name: String,
    pub n_tokens: Option<u64>,
    pub n_raw_tokens: Option<u64>,
    pub attributes: BTreeMap<String, PivotValue>,
}

impl Document {
    pub fn new(document_id: u32, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Document {
            document_id,
            document_name: strip_path_and_extension(&filename),
            filename,
            n_tokens: None,
            n_raw_tokens: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<PivotValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_token_counts(mut self, n_raw_tokens: u64, n_tokens: u64) -> Self {
        self.n_raw_tokens = Some(n_raw_tokens);
        self.n_tokens = Some(n_tokens);
        self
    }

    /// Value of a built-in or attribute column.
    pub fn value(&self, column: &str) -> Option<PivotValue> {
        match column {
            DOCUMENT_ID => Some(PivotValue::Int(self.document_id as i64)),
            FILENAME => Some(PivotValue::Text(self.filename.clone())),
            DOCUMENT_NAME => Some(PivotValue::Text(self.document_name.clone())),
            N_TOKENS => self.n_tokens.map(|n| PivotValue::Int(n as i64)),
            N_RAW_TOKENS => self.n_raw_tokens.map(|n| PivotValue::Int(n as i64)),
            other => self.attributes.get(other).cloned(),
        }
    }
}

/// Strips directories and the last extension: `a/b/doc_1990.txt` -> `doc_1990`.
pub fn strip_path_and_extension(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// Extracts a pivot value from a filename: `year:_:1` splits the file stem on
/// `_` and takes part 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilenameField {
    pub name: String,
    pub separator: String,
    pub index: usize,
}

impl FilenameField {
    pub fn extract(&self, filename: &str) -> Option<PivotValue> {
        let stem = strip_path_and_extension(filename);
        stem.split(self.separator.as_str())
            .nth(self.index)
            .filter(|part| !part.is_empty())
            .map(PivotValue::parse)
    }
}

impl FromStr for FilenameField {
    type Err = CoOccurrenceError;

    fn from_str(field: &str) -> Result<Self> {
        let parts: Vec<&str> = field.split(':').collect();
        match parts.as_slice() {
            [name, separator, index] if !name.is_empty() && !separator.is_empty() => {
                let index = index.parse::<usize>().map_err(|_| {
                    CoOccurrenceError::config(format!("filename field {field:?}: bad index"))
                })?;
                Ok(FilenameField {
                    name: name.to_string(),
                    separator: separator.to_string(),
                    index,
                })
            }
            _ => Err(CoOccurrenceError::config(format!(
                "filename field {field:?}: expected name:separator:index"
            ))),
        }
    }
}

/// Rows are ordered by `document_id`, which is dense and starts at 0.
/// Filenames are unique; document names (file stems) may repeat across folders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentIndex {
    documents: Vec<Document>,
    by_filename: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
}

impl DocumentIndex {
    pub fn new(documents: Vec<Document>) -> Result<Self> {
        for (i, document) in documents.iter().enumerate() {
            if document.document_id as usize != i {
                return Err(CoOccurrenceError::DocumentIndex(format!(
                    "document_id must be a monotonic increasing integer series starting from 0 \
                     (row {i} has {})",
                    document.document_id
                )));
            }
        }
        let mut by_filename = HashMap::with_capacity(documents.len());
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, document) in documents.iter().enumerate() {
            if by_filename.insert(document.filename.clone(), i).is_some() {
                return Err(CoOccurrenceError::DocumentIndex(format!(
                    "duplicate filename {:?} in document index",
                    document.filename
                )));
            }
            by_name.entry(document.document_name.clone()).or_default().push(i);
        }
        Ok(DocumentIndex {
            documents,
            by_filename,
            by_name,
        })
    }

    /// Builds an index from filenames, extracting pivot columns from each name.
    pub fn from_filenames<I, S>(filenames: I, fields: &[FilenameField]) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let documents = filenames
            .into_iter()
            .enumerate()
            .map(|(i, filename)| {
                let filename = filename.as_ref();
                let mut document = Document::new(i as u32, filename);
                for field in fields {
                    if let Some(value) = field.extract(filename) {
                        document.attributes.insert(field.name.clone(), value);
                    }
                }
                document
            })
            .collect();
        Self::new(documents)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, document_id: u32) -> Option<&Document> {
        self.documents.get(document_id as usize)
    }

    /// Row of `filename`. Falls back to the document name (file stem) only
    /// when exactly one document has it.
    fn position(&self, filename: &str) -> Option<usize> {
        if let Some(&i) = self.by_filename.get(filename) {
            return Some(i);
        }
        match self.by_name.get(&strip_path_and_extension(filename))?.as_slice() {
            [i] => Some(*i),
            _ => None,
        }
    }

    /// Looks up a document by filename or unambiguous document name.
    pub fn by_filename(&self, filename: &str) -> Option<&Document> {
        self.position(filename).map(|i| &self.documents[i])
    }

    /// All column names: built-ins first, then attribute columns sorted by name.
    pub fn columns(&self) -> Vec<String> {
        let attributes: BTreeSet<&String> = self
            .documents
            .iter()
            .flat_map(|d| d.attributes.keys())
            .collect();
        BUILTIN_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(attributes.into_iter().cloned())
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        BUILTIN_COLUMNS.contains(&column)
            || self.documents.iter().any(|d| d.attributes.contains_key(column))
    }

    /// Sets `n_raw_tokens`/`n_tokens` from `(filename, n_raw_tokens, n_tokens)`
    /// triples. Documents not mentioned keep their values.
    pub fn update_token_counts(&mut self, counts: &[(String, u64, u64)]) {
        for (filename, n_raw_tokens, n_tokens) in counts {
            match self.position(filename) {
                Some(i) => {
                    self.documents[i].n_raw_tokens = Some(*n_raw_tokens);
                    self.documents[i].n_tokens = Some(*n_tokens);
                }
                None => warn!("token counts for unknown document {filename:?} ignored"),
            }
        }
    }

    /// Adds or overwrites integer statistics columns for one document.
    pub fn update_statistics(
        &mut self,
        document_name: &str,
        statistics: &[(&str, u64)],
    ) -> Result<()> {
        let i = self.position(document_name).ok_or_else(|| {
            CoOccurrenceError::DocumentIndex(format!("unknown document {document_name:?}"))
        })?;
        for (column, value) in statistics {
            match *column {
                N_TOKENS => self.documents[i].n_tokens = Some(*value),
                N_RAW_TOKENS => self.documents[i].n_raw_tokens = Some(*value),
                DOCUMENT_ID | FILENAME | DOCUMENT_NAME => {
                    return Err(CoOccurrenceError::DocumentIndex(format!(
                        "column {column} cannot be updated"
                    )));
                }
                _ => {
                    self.documents[i]
                        .attributes
                        .insert(column.to_string(), PivotValue::Int(*value as i64));
                }
            }
        }
        Ok(())
    }

    /// Document ids grouped by the value of `key`, in key order.
    pub fn partition_documents(&self, key: &str) -> Result<BTreeMap<PivotValue, Vec<u32>>> {
        let mut groups: BTreeMap<PivotValue, Vec<u32>> = BTreeMap::new();
        for document in &self.documents {
            let value = document.value(key).ok_or_else(|| {
                CoOccurrenceError::DocumentIndex(format!(
                    "document {:?} has no value for partition key {key:?}",
                    document.filename
                ))
            })?;
            groups.entry(value).or_default().push(document.document_id);
        }
        Ok(groups)
    }

    /// Sums a numeric column per distinct combination of `keys`.
    pub fn group_sum(
        &self,
        keys: &[String],
        column: &str,
    ) -> Result<HashMap<Vec<PivotValue>, f64>> {
        let mut sums: HashMap<Vec<PivotValue>, f64> = HashMap::new();
        for document in &self.documents {
            let group = keys
                .iter()
                .map(|k| {
                    document.value(k).ok_or_else(|| {
                        CoOccurrenceError::DocumentIndex(format!("missing column {k:?}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let value = document
                .value(column)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| {
                    CoOccurrenceError::DocumentIndex(format!(
                        "column {column:?} is missing or not numeric for {:?}",
                        document.filename
                    ))
                })?;
            *sums.entry(group).or_insert(0.0) += value;
        }
        Ok(sums)
    }

    /// Sum of a numeric column over a set of documents; missing values count as 0.
    pub fn sum_of(&self, document_ids: &[u32], column: &str) -> f64 {
        document_ids
            .iter()
            .filter_map(|&id| self.get(id))
            .filter_map(|d| d.value(column).and_then(|v| v.as_f64()))
            .sum()
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Writes the index as tab-separated values with a header row.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let columns = self.columns();
        let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
        wtr.write_record(&columns)?;
        for document in &self.documents {
            let record: Vec<String> = columns
                .iter()
                .map(|c| document.value(c).map(|v| v.to_string()).unwrap_or_default())
                .collect();
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reads a tab-separated index. `filename` is mandatory; `document_id` is
    /// assigned from row order when absent, `document_name` derived from the filename.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
        let headers = rdr.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h == name);
        let filename_at = position(FILENAME).ok_or_else(|| {
            CoOccurrenceError::DocumentIndex(
                "expected mandatory column `filename` in document index".to_string(),
            )
        })?;
        let document_id_at = position(DOCUMENT_ID);
        let document_name_at = position(DOCUMENT_NAME);
        let n_tokens_at = position(N_TOKENS);
        let n_raw_tokens_at = position(N_RAW_TOKENS);

        let parse_count = |record: &csv::StringRecord, at: Option<usize>| -> Result<Option<u64>> {
            match at.and_then(|i| record.get(i)).filter(|v| !v.is_empty()) {
                Some(v) => v.parse::<f64>().map(|n| Some(n as u64)).map_err(|_| {
                    CoOccurrenceError::DocumentIndex(format!("bad token count {v:?}"))
                }),
                None => Ok(None),
            }
        };

        let mut documents = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let filename = record.get(filename_at).unwrap_or_default();
            let document_id = match document_id_at.and_then(|i| record.get(i)) {
                Some(v) => v.parse::<u32>().map_err(|_| {
                    CoOccurrenceError::DocumentIndex(format!("bad document_id {v:?}"))
                })?,
                None => row as u32,
            };
            let mut document = Document::new(document_id, filename);
            if let Some(name) = document_name_at
                .and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
            {
                document.document_name = name.to_string();
            }
            document.n_tokens = parse_count(&record, n_tokens_at)?;
            document.n_raw_tokens = parse_count(&record, n_raw_tokens_at)?;
            for (i, header) in headers.iter().enumerate() {
                if BUILTIN_COLUMNS.contains(&header) || header.is_empty() {
                    continue;
                }
                if let Some(value) = record.get(i).filter(|v| !v.is_empty()) {
                    document.attributes.insert(header.to_string(), PivotValue::parse(value));
                }
            }
            documents.push(document);
        }
        Self::new(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DocumentIndex {
        DocumentIndex::new(vec![
            Document::new(0, "a_1990.txt").with_attribute("year", 1990).with_token_counts(100, 90),
            Document::new(1, "b_1990.txt").with_attribute("year", 1990).with_token_counts(50, 40),
            Document::new(2, "c_1991.txt").with_attribute("year", 1991).with_token_counts(200, 150),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_non_dense_document_ids() {
        let err = DocumentIndex::new(vec![Document::new(1, "a.txt")]).unwrap_err();
        assert!(matches!(err, CoOccurrenceError::DocumentIndex(_)));
    }

    #[test]
    fn filename_fields_extract_pivot_values() {
        let field: FilenameField = "year:_:1".parse().unwrap();
        let index =
            DocumentIndex::from_filenames(["doc_1990_x.txt", "doc_abc.txt", "doc.txt"], &[field])
                .unwrap();
        assert_eq!(index.get(0).unwrap().value("year"), Some(PivotValue::Int(1990)));
        assert_eq!(index.get(1).unwrap().value("year"), Some(PivotValue::Text("abc".into())));
        assert_eq!(index.get(2).unwrap().value("year"), None);
        assert_eq!(index.get(0).unwrap().document_name, "doc_1990_x");
        assert!("year:_".parse::<FilenameField>().is_err());
    }

    #[test]
    fn partitions_and_group_sums() {
        let index = sample();
        let groups = index.partition_documents("year").unwrap();
        assert_eq!(groups[&PivotValue::Int(1990)], vec![0, 1]);
        assert_eq!(groups[&PivotValue::Int(1991)], vec![2]);

        let sums = index.group_sum(&["year".to_string()], N_RAW_TOKENS).unwrap();
        assert_eq!(sums[&vec![PivotValue::Int(1990)]], 150.0);
        assert_eq!(index.sum_of(&[0, 2], N_TOKENS), 240.0);
        assert!(index.partition_documents("author").is_err());
    }

    #[test]
    fn token_counts_update_only_known_documents() {
        let mut index = sample();
        index.update_token_counts(&[
            ("dir/a_1990.txt".to_string(), 7, 5),
            ("zzz.txt".to_string(), 1, 1),
        ]);
        assert_eq!(index.get(0).unwrap().n_raw_tokens, Some(7));
        assert_eq!(index.get(1).unwrap().n_raw_tokens, Some(50));

        index.update_statistics("c_1991", &[("n_windows", 12)]).unwrap();
        assert_eq!(index.get(2).unwrap().value("n_windows"), Some(PivotValue::Int(12)));
        assert!(index.update_statistics("c_1991", &[(FILENAME, 1)]).is_err());
    }

    #[test]
    fn same_stem_in_different_folders_stays_apart() {
        let mut index = DocumentIndex::from_filenames(
            ["a/report_1990.txt", "b/report_1990.txt", "c/summary.txt"],
            &[],
        )
        .unwrap();
        index.update_token_counts(&[
            ("a/report_1990.txt".to_string(), 3, 3),
            ("b/report_1990.txt".to_string(), 2, 2),
            ("report_1990.txt".to_string(), 9, 9),
        ]);
        assert_eq!(index.get(0).unwrap().n_raw_tokens, Some(3));
        assert_eq!(index.get(1).unwrap().n_raw_tokens, Some(2));
        assert!(index.by_filename("report_1990").is_none());
        assert_eq!(index.by_filename("summary").unwrap().document_id, 2);

        index.update_statistics("b/report_1990.txt", &[("n_windows", 4)]).unwrap();
        assert_eq!(index.get(0).unwrap().value("n_windows"), None);
        assert!(index.update_statistics("report_1990", &[("n_windows", 1)]).is_err());
    }

    #[test]
    fn rejects_duplicate_filenames() {
        let err = DocumentIndex::new(vec![Document::new(0, "a.txt"), Document::new(1, "a.txt")])
            .unwrap_err();
        assert!(matches!(err, CoOccurrenceError::DocumentIndex(_)));
    }

    #[test]
    fn tsv_round_trip() {
        let index = sample();
        let mut buffer = Vec::new();
        index.to_writer(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        let header = "document_id\tfilename\tdocument_name\tn_tokens\tn_raw_tokens\tyear\n";
        assert!(text.starts_with(header));
        let loaded = DocumentIndex::from_reader(buffer.as_slice()).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn load_without_document_id_uses_row_order() {
        let data = "filename\tyear\nx_1.txt\t1\ny_2.txt\t2\n";
        let index = DocumentIndex::from_reader(data.as_bytes()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.by_filename("y_2.txt").unwrap().document_id, 1);
        assert!(DocumentIndex::from_reader("name\nx\n".as_bytes()).is_err());
    }
}
