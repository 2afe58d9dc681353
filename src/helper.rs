//! Chainable query layer over a computed co-occurrence table.
//!
//! The helper keeps the full table (`co_occurrences`) and a working copy
//! (`data`). Filters narrow `data`; [`CoOccurrenceHelper::reset`] restores it.
//! Regrouping with [`CoOccurrenceHelper::groupby`] is allowed once per reset.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::warn;

use crate::bundle::Bundle;
use crate::corpus::VectorizedCorpus;
use crate::document_index::{N_RAW_TOKENS, PivotValue};
use crate::error::{CoOccurrenceError, Result};
use crate::significance::{KeynessMetric, PartitionWindowCounts, partitioned_significances};
use crate::table::{CoOccurrence, CoOccurrenceTable, ValueColumn};
use crate::vocabulary::Token2Id;

pub const TIME_PERIOD: &str = "time_period";

/// A token given either by id or by its string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRef {
    Id(u32),
    Token(String),
}

impl From<u32> for TokenRef {
    fn from(id: u32) -> Self {
        TokenRef::Id(id)
    }
}

impl From<&str> for TokenRef {
    fn from(token: &str) -> Self {
        TokenRef::Token(token.to_string())
    }
}

#[derive(Debug)]
pub struct CoOccurrenceHelper {
    corpus: VectorizedCorpus,
    source_token2id: Token2Id,
    window_counts: PartitionWindowCounts,
    corpus_pivot_keys: Vec<String>,
    co_occurrences: CoOccurrenceTable,
    data: CoOccurrenceTable,
    data_pivot_keys: Vec<String>,
    grouped: bool,
}

impl CoOccurrenceHelper {
    /// Builds the helper by expanding the vectorized corpus back into a table.
    pub fn new(
        corpus: VectorizedCorpus,
        source_token2id: Token2Id,
        window_counts: PartitionWindowCounts,
    ) -> Result<Self> {
        let co_occurrences = corpus.to_co_occurrences(&source_token2id)?;
        Self::with_co_occurrences(co_occurrences, corpus, source_token2id, window_counts)
    }

    /// Builds the helper over an existing table, keeping columns the
    /// vectorized corpus cannot carry (`hal_value`).
    pub fn with_co_occurrences(
        mut co_occurrences: CoOccurrenceTable,
        corpus: VectorizedCorpus,
        source_token2id: Token2Id,
        window_counts: PartitionWindowCounts,
    ) -> Result<Self> {
        let corpus_pivot_keys = corpus.pivot_keys().to_vec();
        if let Some(missing) = corpus_pivot_keys
            .iter()
            .find(|k| !co_occurrences.has_key_column(k))
        {
            return Err(CoOccurrenceError::usage(format!(
                "co-occurrence table lacks pivot column {missing:?}"
            )));
        }
        if co_occurrences.has_key_column("year") {
            co_occurrences.alias_key_column("year", TIME_PERIOD)?;
        }
        Ok(CoOccurrenceHelper {
            corpus,
            source_token2id,
            window_counts,
            data: co_occurrences.clone(),
            data_pivot_keys: corpus_pivot_keys.clone(),
            corpus_pivot_keys,
            co_occurrences,
            grouped: false,
        })
    }

    pub fn from_bundle(bundle: Bundle) -> Result<Self> {
        Self::with_co_occurrences(
            bundle.co_occurrences,
            bundle.corpus,
            bundle.vocabulary,
            bundle.window_counts,
        )
    }

    pub fn reset(&mut self) -> &mut Self {
        self.data = self.co_occurrences.clone();
        self.data_pivot_keys = self.corpus_pivot_keys.clone();
        self.grouped = false;
        self
    }

    /// Re-aggregates `data` by partition-index columns not already in the table.
    ///
    /// Values are summed per `(keys, token_id, w1_id, w2_id)` in first-seen
    /// order. With `normalize`, `value_n_t` is the value divided by the group's
    /// raw token total. `target_pivot_key` (default `time_period`) is added as
    /// an alias of the first key.
    pub fn groupby(
        &mut self,
        keys: &[String],
        normalize: bool,
        target_pivot_key: Option<&str>,
    ) -> Result<&mut Self> {
        if self.grouped {
            return Err(CoOccurrenceError::state(
                "Already grouped, please reset before calling again",
            ));
        }
        if keys.is_empty() {
            return Err(CoOccurrenceError::usage("pivot keys is not specified"));
        }
        let index = self.corpus.document_index();
        let keys: Vec<String> = keys
            .iter()
            .filter(|k| index.has_column(k) && !self.data.has_key_column(k))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Err(CoOccurrenceError::usage("No keys to group by!"));
        }

        let mut positions: HashMap<(Vec<PivotValue>, Option<u32>, u32, u32), usize> =
            HashMap::new();
        let mut rows: Vec<CoOccurrence> = Vec::new();
        for row in self.data.rows() {
            let document = row.document_id.and_then(|id| index.get(id)).ok_or_else(|| {
                CoOccurrenceError::usage("grouping requires a known document_id on every row")
            })?;
            let values = keys
                .iter()
                .map(|k| {
                    document.value(k).ok_or_else(|| {
                        CoOccurrenceError::DocumentIndex(format!(
                            "{} has no value for {k:?}",
                            document.filename
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let group = (values.clone(), row.token_id, row.w1_id, row.w2_id);
            match positions.get(&group) {
                Some(&i) => {
                    rows[i].value += row.value;
                    if let (Some(total), Some(hal)) = (rows[i].hal_value.as_mut(), row.hal_value) {
                        *total += hal;
                    }
                }
                None => {
                    positions.insert(group, rows.len());
                    rows.push(CoOccurrence {
                        keys: values,
                        token_id: row.token_id,
                        hal_value: row.hal_value,
                        ..CoOccurrence::new(row.w1_id, row.w2_id, row.value)
                    });
                }
            }
        }

        if normalize {
            let totals = index.group_sum(&keys, N_RAW_TOKENS)?;
            for row in &mut rows {
                row.value_n_t = totals
                    .get(&row.keys)
                    .filter(|total| **total > 0.0)
                    .map(|total| row.value as f64 / total);
            }
        }

        let mut data = CoOccurrenceTable::new(keys.clone(), rows)?;
        let target = target_pivot_key.unwrap_or(TIME_PERIOD);
        data.alias_key_column(&keys[0], target)?;

        self.data = data;
        self.data_pivot_keys = keys;
        self.grouped = true;
        Ok(self)
    }

    /// Sets `value_n_t` to the value divided by the per-group sum of
    /// `normalize_key` in the partition index, groups given by `pivot_keys`.
    pub fn normalize(&mut self, pivot_keys: &[String], normalize_key: &str) -> Result<&mut Self> {
        let index = self.corpus.document_index();
        let missing: Vec<&str> = pivot_keys
            .iter()
            .map(String::as_str)
            .chain([normalize_key])
            .filter(|c| !index.has_column(c))
            .collect();
        if !missing.is_empty() {
            return Err(CoOccurrenceError::usage(format!(
                "expected {} in the corpus document index",
                missing.join(",")
            )));
        }
        let totals = index.group_sum(pivot_keys, normalize_key)?;
        let mut normalized = Vec::with_capacity(self.data.len());
        for row in self.data.rows() {
            let group = pivot_keys
                .iter()
                .map(|k| {
                    self.data
                        .column_value(row, k)
                        .or_else(|| {
                            row.document_id
                                .and_then(|id| index.get(id))
                                .and_then(|d| d.value(k))
                        })
                        .ok_or_else(|| CoOccurrenceError::usage(format!("no value for {k:?}")))
                })
                .collect::<Result<Vec<_>>>()?;
            normalized.push(
                totals
                    .get(&group)
                    .filter(|total| **total > 0.0)
                    .map(|total| row.value as f64 / total),
            );
        }
        let mut values = normalized.into_iter();
        let rows = self
            .data
            .rows()
            .iter()
            .map(|row| CoOccurrence {
                value_n_t: values.next().flatten(),
                ..row.clone()
            })
            .collect();
        self.data = CoOccurrenceTable::new(self.data.key_columns().to_vec(), rows)?;
        Ok(self)
    }

    /// Adds `w1`, `w2` and `token`. No-op when already decoded.
    pub fn decode(&mut self) -> Result<&mut Self> {
        self.data.decode(&self.source_token2id)?;
        Ok(self)
    }

    /// Drops rows whose pair token is rarer than `threshold` corpus-wide.
    pub fn trunk_by_global_count(&mut self, threshold: u64) -> &mut Self {
        if self.data.is_empty() || threshold < 2 {
            return self;
        }
        let low = self.corpus.term_frequencies_below_threshold(threshold);
        self.data.retain(|row| row.token_id.is_none_or(|id| !low.contains(&id)));
        self
    }

    /// Keeps rows where either word is one of `tokens`. Empty keeps everything.
    pub fn match_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) -> &mut Self {
        if self.data.is_empty() || tokens.is_empty() {
            return self;
        }
        let ids = self.source_token2id.find(tokens);
        self.data
            .retain(|row| ids.contains(&row.w1_id) || ids.contains(&row.w2_id));
        self
    }

    /// Removes rows where either word is excluded. Unknown tokens are ignored.
    pub fn exclude(&mut self, excludes: &[TokenRef]) -> &mut Self {
        if self.data.is_empty() || excludes.is_empty() {
            return self;
        }
        let ids: HashSet<u32> = excludes
            .iter()
            .filter_map(|x| match x {
                TokenRef::Id(id) => Some(*id),
                TokenRef::Token(token) => self.source_token2id.get(token),
            })
            .collect();
        self.data
            .retain(|row| !ids.contains(&row.w1_id) && !ids.contains(&row.w2_id));
        self
    }

    /// Keeps the `n_top` highest rows by `column` within each group of
    /// `group_by`, ties resolved by row order. Row order is preserved.
    pub fn rank(
        &mut self,
        n_top: usize,
        column: ValueColumn,
        group_by: &[String],
    ) -> Result<&mut Self> {
        if self.data.is_empty() {
            return Ok(self);
        }
        let selected = self.top_per_group(n_top, column, group_by)?;
        let mut keep = vec![false; self.data.len()];
        for i in selected {
            keep[i] = true;
        }
        let mut flags = keep.into_iter();
        self.data.retain(|_| flags.next().unwrap_or(false));
        Ok(self)
    }

    /// Keeps the `n_top` highest rows by `column` per pivot group (data and
    /// corpus pivot keys). Output is ordered by group, then by descending value.
    pub fn largest(&mut self, n_top: usize, column: ValueColumn) -> Result<&mut Self> {
        if self.data.is_empty() {
            return Ok(self);
        }
        let group_by: Vec<String> = self
            .data_pivot_keys
            .iter()
            .chain(&self.corpus_pivot_keys)
            .filter(|k| self.data.is_known_column(k))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let selected = self.top_per_group(n_top, column, &group_by)?;
        self.data = self.data.select(&selected);
        Ok(self)
    }

    /// Indices of the top rows, grouped in first-seen group order, each group
    /// in descending order of `column`. Every row must have `column`.
    fn top_per_group(
        &self,
        n_top: usize,
        column: ValueColumn,
        group_by: &[String],
    ) -> Result<Vec<usize>> {
        if let Some(unknown) = group_by.iter().find(|c| !self.data.is_known_column(c)) {
            return Err(CoOccurrenceError::usage(format!("unknown group column {unknown:?}")));
        }
        let mut order: Vec<Vec<PivotValue>> = Vec::new();
        let mut groups: HashMap<Vec<PivotValue>, Vec<(usize, f64)>> = HashMap::new();
        for (i, row) in self.data.rows().iter().enumerate() {
            let value = row.get(column).ok_or_else(|| {
                CoOccurrenceError::usage(format!(
                    "cannot rank by {}: row ({}, {}) has no value",
                    column.name(),
                    row.w1_id,
                    row.w2_id
                ))
            })?;
            let key = self.data.group_key(row, group_by)?;
            let members = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            members.push((i, value));
        }
        let mut selected = Vec::new();
        for key in order {
            let mut members = groups.remove(&key).unwrap_or_default();
            members.sort_by(|a, b| b.1.total_cmp(&a.1));
            selected.extend(members.into_iter().take(n_top).map(|(i, _)| i));
        }
        Ok(selected)
    }

    /// Truncates `data` to the first `n` rows, warning when rows are dropped.
    pub fn head(&mut self, n: usize) -> &mut Self {
        if self.data.is_empty() || n == 0 {
            return self;
        }
        if self.data.len() > n {
            warn!("only {n} records out of {} records are displayed.", self.data.len());
        }
        self.data.truncate(n);
        self
    }

    /// Scores the full, unfiltered table and makes the result the working data.
    pub fn weigh_by_significance(
        &mut self,
        metric: KeynessMetric,
        pivot_key: Option<&str>,
        normalize: bool,
    ) -> Result<&mut Self> {
        self.data = partitioned_significances(
            &self.co_occurrences,
            pivot_key,
            metric,
            self.source_token2id.len(),
            normalize,
            &self.window_counts,
        )?;
        Ok(self)
    }

    /// Decoded working data.
    pub fn value(&mut self) -> Result<&CoOccurrenceTable> {
        self.decode()?;
        Ok(&self.data)
    }

    pub fn data(&self) -> &CoOccurrenceTable {
        &self.data
    }

    pub fn co_occurrences(&self) -> &CoOccurrenceTable {
        &self.co_occurrences
    }

    pub fn data_pivot_keys(&self) -> &[String] {
        &self.data_pivot_keys
    }

    pub fn corpus(&self) -> &VectorizedCorpus {
        &self.corpus
    }
}
