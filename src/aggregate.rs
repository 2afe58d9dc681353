//! Window aggregation into sparse term-term matrices.
//!
//! Each window contributes 1 to every unordered pair of distinct token ids it
//! holds (pad excluded). Cells are stored canonically as `(min, max)`; the
//! diagonal is never written.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::document_index::PivotValue;
use crate::error::{CoOccurrenceError, Result};
use crate::vocabulary::Token2Id;
use crate::windows::ContextOpts;

/// How a pair in a window contributes to the weighted (HAL) matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Flat counts only.
    #[default]
    Flat,
    /// Also accumulate `1 / distance` of the closest occurrence of each pair.
    Distance,
}

/// One non-zero cell of a term-term matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub w1_id: u32,
    pub w2_id: u32,
    pub value: u64,
    pub hal_value: Option<f64>,
}

/// Sparse, upper-triangular, integer-valued term-term matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermTermMatrix {
    counts: HashMap<(u32, u32), u64>,
    weights: Option<HashMap<(u32, u32), f64>>,
}

impl TermTermMatrix {
    pub fn new(weighting: Weighting) -> Self {
        TermTermMatrix {
            counts: HashMap::new(),
            weights: match weighting {
                Weighting::Flat => None,
                Weighting::Distance => Some(HashMap::new()),
            },
        }
    }

    fn key(i: u32, j: u32) -> Option<(u32, u32)> {
        match i.cmp(&j) {
            std::cmp::Ordering::Less => Some((i, j)),
            std::cmp::Ordering::Greater => Some((j, i)),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Adds 1 to cell `(min(i,j), max(i,j))`. Diagonal increments are ignored.
    pub fn increment(&mut self, i: u32, j: u32) {
        if let Some(key) = Self::key(i, j) {
            *self.counts.entry(key).or_insert(0) += 1;
        }
    }

    fn add_weight(&mut self, i: u32, j: u32, weight: f64) {
        if let (Some(weights), Some(key)) = (self.weights.as_mut(), Self::key(i, j)) {
            *weights.entry(key).or_insert(0.0) += weight;
        }
    }

    pub fn get(&self, i: u32, j: u32) -> u64 {
        Self::key(i, j)
            .and_then(|key| self.counts.get(&key).copied())
            .unwrap_or(0)
    }

    pub fn weight(&self, i: u32, j: u32) -> Option<f64> {
        let key = Self::key(i, j)?;
        self.weights.as_ref()?.get(&key).copied()
    }

    pub fn is_weighted(&self) -> bool {
        self.weights.is_some()
    }

    pub fn nnz(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn sum(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Non-zero cells sorted by `(w1_id, w2_id)`.
    pub fn cells(&self) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self
            .counts
            .iter()
            .map(|(&(w1_id, w2_id), &value)| Cell {
                w1_id,
                w2_id,
                value,
                hal_value: self
                    .weights
                    .as_ref()
                    .map(|w| w.get(&(w1_id, w2_id)).copied().unwrap_or(0.0)),
            })
            .collect();
        cells.sort_by_key(|c| (c.w1_id, c.w2_id));
        cells
    }
}

/// Number of windows each token id occurred in, plus the number of windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowCounts {
    pub n_windows: u64,
    pub counts: HashMap<u32, u64>,
}

impl WindowCounts {
    pub fn get(&self, id: u32) -> u64 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &WindowCounts) {
        self.n_windows += other.n_windows;
        for (&id, &count) in &other.counts {
            *self.counts.entry(id).or_insert(0) += count;
        }
    }
}

/// Per source document window statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStats {
    pub filename: String,
    pub n_windows: u64,
    /// `n_windows * window length`
    pub n_tokens: u64,
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub matrix: TermTermMatrix,
    pub window_counts: WindowCounts,
    pub document_stats: Vec<DocumentStats>,
}

/// Consumes windows for one partition and owns its matrix until finished.
pub struct WindowAggregator<'o> {
    context_opts: &'o ContextOpts,
    positions: Vec<usize>,
    matrix: TermTermMatrix,
    window_counts: WindowCounts,
    document_stats: Vec<DocumentStats>,
}

impl<'o> WindowAggregator<'o> {
    pub fn new(context_opts: &'o ContextOpts, weighting: Weighting) -> Self {
        WindowAggregator {
            context_opts,
            positions: context_opts.window_positions(),
            matrix: TermTermMatrix::new(weighting),
            window_counts: WindowCounts::default(),
            document_stats: Vec::new(),
        }
    }

    /// Slides windows over one document and adds them to the matrix.
    ///
    /// Unknown tokens are added to an open vocabulary and ignored by a closed one.
    pub fn aggregate_document<S: AsRef<str>>(
        &mut self,
        filename: &str,
        tokens: &[S],
        vocabulary: &mut Token2Id,
    ) -> Result<DocumentStats> {
        let context_opts = self.context_opts;
        let window_length = context_opts.emitted_window_size() as u64;
        let mut n_windows = 0u64;
        let windows = context_opts.windows(tokens.iter().map(AsRef::<str>::as_ref));
        for window in windows {
            let ids = window_ids(&window, context_opts.pad(), vocabulary)?;
            ingest_window(&ids, &self.positions, &mut self.matrix, &mut self.window_counts);
            n_windows += 1;
        }
        let stats = DocumentStats {
            filename: filename.to_string(),
            n_windows,
            n_tokens: n_windows * window_length,
        };
        debug!("{filename}: {n_windows} windows");
        self.document_stats.push(stats.clone());
        Ok(stats)
    }

    pub fn matrix(&self) -> &TermTermMatrix {
        &self.matrix
    }

    /// Emits the aggregate, failing with `ZeroCompute` if no pair was counted.
    pub fn finish(self) -> Result<Aggregate> {
        if self.matrix.is_empty() {
            return Err(CoOccurrenceError::ZeroCompute);
        }
        Ok(self.into_aggregate())
    }

    /// Emits the aggregate even if it is empty.
    pub fn into_aggregate(self) -> Aggregate {
        Aggregate {
            matrix: self.matrix,
            window_counts: self.window_counts,
            document_stats: self.document_stats,
        }
    }
}

/// Maps window tokens to `(id, slot)` pairs, skipping pad and unknown tokens.
fn window_ids(window: &[&str], pad: &str, vocabulary: &mut Token2Id) -> Result<Vec<(u32, usize)>> {
    let mut ids = Vec::with_capacity(window.len());
    for (slot, token) in window.iter().enumerate() {
        if *token == pad {
            continue;
        }
        let id = if vocabulary.is_closed() {
            vocabulary.get(token)
        } else {
            Some(vocabulary.add(token)?)
        };
        if let Some(id) = id {
            ids.push((id, slot));
        }
    }
    Ok(ids)
}

fn ingest_window(
    ids: &[(u32, usize)],
    positions: &[usize],
    matrix: &mut TermTermMatrix,
    window_counts: &mut WindowCounts,
) {
    window_counts.n_windows += 1;

    let mut distinct: Vec<u32> = ids.iter().map(|(id, _)| *id).collect();
    distinct.sort_unstable();
    distinct.dedup();

    for &id in &distinct {
        *window_counts.counts.entry(id).or_insert(0) += 1;
    }

    for (a, &i) in distinct.iter().enumerate() {
        for &j in &distinct[a + 1..] {
            matrix.increment(i, j);
        }
    }

    if matrix.is_weighted() {
        let mut closest: HashMap<(u32, u32), usize> = HashMap::new();
        for (a, &(i, slot_i)) in ids.iter().enumerate() {
            for &(j, slot_j) in &ids[a + 1..] {
                if i == j {
                    continue;
                }
                let distance = positions[slot_i].abs_diff(positions[slot_j]);
                let key = (i.min(j), i.max(j));
                closest
                    .entry(key)
                    .and_modify(|d| *d = (*d).min(distance))
                    .or_insert(distance);
            }
        }
        for ((i, j), distance) in closest {
            matrix.add_weight(i, j, 1.0 / distance as f64);
        }
    }
}

/// One aggregator per partition value, fed in document order.
pub struct PartitionedAggregator<'o> {
    context_opts: &'o ContextOpts,
    weighting: Weighting,
    partitions: BTreeMap<PivotValue, WindowAggregator<'o>>,
}

impl<'o> PartitionedAggregator<'o> {
    pub fn new(context_opts: &'o ContextOpts, weighting: Weighting) -> Self {
        PartitionedAggregator {
            context_opts,
            weighting,
            partitions: BTreeMap::new(),
        }
    }

    pub fn aggregate_document<S: AsRef<str>>(
        &mut self,
        partition: &PivotValue,
        filename: &str,
        tokens: &[S],
        vocabulary: &mut Token2Id,
    ) -> Result<DocumentStats> {
        let (context_opts, weighting) = (self.context_opts, self.weighting);
        self.partitions
            .entry(partition.clone())
            .or_insert_with(|| WindowAggregator::new(context_opts, weighting))
            .aggregate_document(filename, tokens, vocabulary)
    }

    /// Emits every partition in key order. Fails with `ZeroCompute` if all
    /// partitions are empty.
    pub fn finish(self) -> Result<Vec<(PivotValue, Aggregate)>> {
        let aggregates: Vec<(PivotValue, Aggregate)> = self
            .partitions
            .into_iter()
            .map(|(key, aggregator)| (key, aggregator.into_aggregate()))
            .collect();
        if aggregates.iter().all(|(_, a)| a.matrix.is_empty()) {
            return Err(CoOccurrenceError::ZeroCompute);
        }
        Ok(aggregates)
    }
}
