//! Re-vectorized co-occurrence corpus: one row per partition, one column per
//! `w1/w2` pair token.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::bundle::{read_zip_entry, write_zip};
use crate::document_index::{DocumentIndex, PivotValue};
use crate::error::{CoOccurrenceError, Result};
use crate::table::{CoOccurrence, CoOccurrenceTable, TotalsBasis};
use crate::vocabulary::Token2Id;

const BAG_TERM_MATRIX: &str = "bag_term_matrix.csv";
const TOKEN2ID: &str = "token2id.json";
const DOCUMENT_INDEX: &str = "document_index.csv";
const PIVOT_KEYS: &str = "pivot_keys.json";

#[derive(Debug, Serialize, Deserialize)]
struct MatrixEntry {
    document_id: u32,
    token_id: u32,
    value: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorizedCorpus {
    /// `(document_id, token_id) -> value`
    bag_term_matrix: BTreeMap<(u32, u32), u64>,
    token2id: Token2Id,
    document_index: DocumentIndex,
    pivot_keys: Vec<String>,
}

impl VectorizedCorpus {
    pub fn new(
        bag_term_matrix: BTreeMap<(u32, u32), u64>,
        token2id: Token2Id,
        document_index: DocumentIndex,
        pivot_keys: Vec<String>,
    ) -> Result<Self> {
        let (n_docs, n_terms) = (document_index.len() as u32, token2id.len() as u32);
        if let Some(&(d, t)) = bag_term_matrix
            .keys()
            .find(|&&(d, t)| d >= n_docs || t >= n_terms)
        {
            return Err(CoOccurrenceError::usage(format!(
                "matrix entry ({d}, {t}) outside {n_docs} x {n_terms} corpus"
            )));
        }
        Ok(VectorizedCorpus {
            bag_term_matrix,
            token2id,
            document_index,
            pivot_keys,
        })
    }

    /// Builds the corpus from a table whose rows carry `document_id` and `token_id`.
    pub fn from_co_occurrences(
        table: &CoOccurrenceTable,
        token2id: Token2Id,
        document_index: DocumentIndex,
    ) -> Result<Self> {
        let mut bag_term_matrix = BTreeMap::new();
        for row in table.rows() {
            let (Some(document_id), Some(token_id)) = (row.document_id, row.token_id) else {
                return Err(CoOccurrenceError::usage(
                    "vectorizing requires document_id and token_id on every row",
                ));
            };
            *bag_term_matrix.entry((document_id, token_id)).or_insert(0) += row.value;
        }
        Self::new(bag_term_matrix, token2id, document_index, table.key_columns().to_vec())
    }

    pub fn token2id(&self) -> &Token2Id {
        &self.token2id
    }

    pub fn document_index(&self) -> &DocumentIndex {
        &self.document_index
    }

    pub fn pivot_keys(&self) -> &[String] {
        &self.pivot_keys
    }

    pub fn n_docs(&self) -> usize {
        self.document_index.len()
    }

    pub fn n_terms(&self) -> usize {
        self.token2id.len()
    }

    pub fn get(&self, document_id: u32, token_id: u32) -> u64 {
        self.bag_term_matrix
            .get(&(document_id, token_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn sum(&self) -> u64 {
        self.bag_term_matrix.values().sum()
    }

    /// Column sums, indexed by pair token id.
    pub fn term_frequencies(&self) -> Vec<u64> {
        let mut tf = vec![0u64; self.n_terms()];
        for (&(_, token_id), &value) in &self.bag_term_matrix {
            tf[token_id as usize] += value;
        }
        tf
    }

    /// Pair token ids whose corpus-wide frequency is below `threshold`.
    pub fn term_frequencies_below_threshold(&self, threshold: u64) -> HashSet<u32> {
        self.term_frequencies()
            .into_iter()
            .enumerate()
            .filter(|(_, tf)| *tf < threshold)
            .map(|(id, _)| id as u32)
            .collect()
    }

    /// Expands the corpus back into long format, resolving pair tokens with
    /// `source` (the word vocabulary).
    pub fn to_co_occurrences(&self, source: &Token2Id) -> Result<CoOccurrenceTable> {
        let mut pair_ids: Vec<Option<(u32, u32)>> = vec![None; self.n_terms()];
        let mut rows = Vec::with_capacity(self.bag_term_matrix.len());
        for (&(document_id, token_id), &value) in &self.bag_term_matrix {
            let (w1_id, w2_id) = match pair_ids[token_id as usize] {
                Some(ids) => ids,
                None => {
                    let token = self.token2id.id2token(token_id).unwrap_or_default();
                    let ids = split_pair(token, source)?;
                    pair_ids[token_id as usize] = Some(ids);
                    ids
                }
            };
            let document = self.document_index.get(document_id);
            let keys: Vec<PivotValue> = self
                .pivot_keys
                .iter()
                .map(|k| {
                    document.and_then(|d| d.value(k)).ok_or_else(|| {
                        CoOccurrenceError::usage(format!(
                            "document {document_id} lacks pivot column {k:?}"
                        ))
                    })
                })
                .collect::<Result<_>>()?;
            rows.push(CoOccurrence {
                keys,
                document_id: Some(document_id),
                token_id: Some(token_id),
                ..CoOccurrence::new(w1_id, w2_id, value)
            });
        }
        rows.sort_by_key(|r| (r.w1_id, r.w2_id));
        let mut table = CoOccurrenceTable::new(self.pivot_keys.clone(), rows)?;
        table.compute_normalized(&self.document_index, TotalsBasis::DocumentIndex)?;
        Ok(table)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let mut matrix = csv::Writer::from_writer(Vec::new());
        for (&(document_id, token_id), &value) in &self.bag_term_matrix {
            matrix.serialize(MatrixEntry {
                document_id,
                token_id,
                value,
            })?;
        }
        let matrix = matrix
            .into_inner()
            .map_err(|e| CoOccurrenceError::Io(e.into_error()))?;
        let mut index = Vec::new();
        self.document_index.to_writer(&mut index)?;
        write_zip(
            path,
            &[
                (BAG_TERM_MATRIX, matrix),
                (TOKEN2ID, serde_json::to_vec(&self.token2id)?),
                (DOCUMENT_INDEX, index),
                (PIVOT_KEYS, serde_json::to_vec(&self.pivot_keys)?),
            ],
        )?;
        info!(
            "stored vectorized corpus ({} x {}) to {}",
            self.n_docs(),
            self.n_terms(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let token2id: Token2Id = serde_json::from_slice(&read_zip_entry(&mut archive, TOKEN2ID)?)?;
        let pivot_keys: Vec<String> =
            serde_json::from_slice(&read_zip_entry(&mut archive, PIVOT_KEYS)?)?;
        let document_index =
            DocumentIndex::from_reader(read_zip_entry(&mut archive, DOCUMENT_INDEX)?.as_slice())?;
        let matrix = read_zip_entry(&mut archive, BAG_TERM_MATRIX)?;
        let mut bag_term_matrix = BTreeMap::new();
        for entry in csv::Reader::from_reader(matrix.as_slice()).deserialize() {
            let entry: MatrixEntry = entry?;
            bag_term_matrix.insert((entry.document_id, entry.token_id), entry.value);
        }
        Self::new(bag_term_matrix, token2id, document_index, pivot_keys)
    }
}

/// Splits `w1/w2` at the first `/` that leaves two known tokens.
fn split_pair(token: &str, source: &Token2Id) -> Result<(u32, u32)> {
    token
        .match_indices('/')
        .find_map(|(i, _)| Some((source.get(&token[..i])?, source.get(&token[i + 1..])?)))
        .ok_or_else(|| CoOccurrenceError::usage(format!("cannot resolve pair token {token:?}")))
}
