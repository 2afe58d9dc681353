//! End-to-end co-occurrence computation over a tokenized corpus.

use std::collections::{BTreeMap, HashSet};

use log::info;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, PartitionedAggregator, Weighting, WindowCounts};
use crate::corpus::VectorizedCorpus;
use crate::document_index::{DocumentIndex, PivotValue};
use crate::error::{CoOccurrenceError, Result};
use crate::reader::TokenizedDocument;
use crate::significance::PartitionWindowCounts;
use crate::table::{
    CoOccurrenceTable, N_WINDOW_TOKENS, N_WINDOWS, PartitionMatrix, TableBuilder, TotalsBasis,
    partition_document_index,
};
use crate::vocabulary::Token2Id;
use crate::windows::ContextOpts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOpts {
    pub context_opts: ContextOpts,
    pub weighting: Weighting,
    /// Tokens rarer than this are dropped from the vocabulary before counting.
    pub tf_threshold: u64,
    /// Rows with a smaller pair count are dropped per partition.
    pub min_count: u64,
    /// Pairs with a smaller corpus-wide count are dropped after concatenation.
    pub global_threshold: u64,
    pub totals: TotalsBasis,
}

impl ComputeOpts {
    pub fn new(context_opts: ContextOpts) -> Self {
        ComputeOpts {
            context_opts,
            weighting: Weighting::Flat,
            tf_threshold: 1,
            min_count: 1,
            global_threshold: 1,
            totals: TotalsBasis::DocumentIndex,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoOccurrenceComputeResult {
    pub co_occurrences: CoOccurrenceTable,
    pub vocabulary: Token2Id,
    /// Source index with `n_windows` and `n_window_tokens` added.
    pub document_index: DocumentIndex,
    /// Window counts per partition `document_id`.
    pub window_counts: PartitionWindowCounts,
    pub corpus_window_counts: WindowCounts,
    pub corpus: VectorizedCorpus,
}

/// Builds the shared vocabulary. The pad token never enters it; concept
/// tokens survive the frequency threshold.
pub fn build_vocabulary(documents: &[TokenizedDocument], opts: &ComputeOpts) -> Result<Token2Id> {
    let pad = opts.context_opts.pad();
    let mut vocabulary = Token2Id::new();
    for document in documents {
        vocabulary.ingest(document.tokens.iter().filter(|t| t.as_str() != pad))?;
    }
    let keeps: HashSet<String> = opts.context_opts.concept().iter().cloned().collect();
    let vocabulary = vocabulary.compress(opts.tf_threshold, &keeps);
    info!("vocabulary: {} tokens", vocabulary.len());
    Ok(vocabulary)
}

/// Runs the full computation: vocabulary, windows, per-partition aggregation,
/// table, vectorized corpus.
///
/// Fails with `ZeroCompute` when nothing survives the concept filter and the
/// thresholds.
pub fn compute(
    documents: &[TokenizedDocument],
    mut document_index: DocumentIndex,
    opts: &ComputeOpts,
) -> Result<CoOccurrenceComputeResult> {
    let context_opts = &opts.context_opts;
    let key = context_opts.single_partition_key()?;
    let mut vocabulary = build_vocabulary(documents, opts)?;

    let mut aggregator = PartitionedAggregator::new(context_opts, opts.weighting);
    let mut members: BTreeMap<PivotValue, Vec<u32>> = BTreeMap::new();
    for document in documents {
        let indexed = document_index.by_filename(&document.filename).ok_or_else(|| {
            CoOccurrenceError::DocumentIndex(format!("{} not in document index", document.filename))
        })?;
        let partition = match key {
            Some(key) => indexed.value(key).ok_or_else(|| {
                CoOccurrenceError::DocumentIndex(format!(
                    "{} has no value for partition key {key:?}",
                    document.filename
                ))
            })?,
            None => PivotValue::Int(0),
        };
        members.entry(partition.clone()).or_default().push(indexed.document_id);
        let stats = aggregator.aggregate_document(
            &partition,
            &document.filename,
            &document.tokens,
            &mut vocabulary,
        )?;
        document_index.update_statistics(
            &document.filename,
            &[(N_WINDOWS, stats.n_windows), (N_WINDOW_TOKENS, stats.n_tokens)],
        )?;
    }
    let aggregates: Vec<(PivotValue, Aggregate)> = aggregator.finish()?;
    info!("aggregated {} partition(s)", aggregates.len());

    let partitions: Vec<(Option<PivotValue>, Vec<u32>, &Aggregate)> = aggregates
        .iter()
        .map(|(value, aggregate)| {
            let ids = members.get(value).cloned().unwrap_or_default();
            (key.map(|_| value.clone()), ids, aggregate)
        })
        .collect();
    let partition_index = partition_document_index(key, &partitions, &document_index)?;

    let matrices: Vec<PartitionMatrix<'_>> = aggregates
        .iter()
        .enumerate()
        .map(|(i, (value, aggregate))| PartitionMatrix {
            key: key.map(|_| value.clone()),
            document_id: i as u32,
            matrix: &aggregate.matrix,
        })
        .collect();
    let mut co_occurrences = TableBuilder::new()
        .min_count(opts.min_count)
        .totals(opts.totals)
        .build(key, &matrices, &partition_index)?;
    co_occurrences.truncate_by_global_count(opts.global_threshold);
    if co_occurrences.is_empty() {
        return Err(CoOccurrenceError::ZeroCompute);
    }

    let pairs = co_occurrences.assign_pair_ids(&vocabulary)?;
    let corpus = VectorizedCorpus::from_co_occurrences(&co_occurrences, pairs, partition_index)?;

    let mut corpus_window_counts = WindowCounts::default();
    let mut window_counts = PartitionWindowCounts::new();
    for (i, (_, aggregate)) in aggregates.into_iter().enumerate() {
        corpus_window_counts.merge(&aggregate.window_counts);
        window_counts.insert(i as u32, aggregate.window_counts);
    }
    info!(
        "{} co-occurrence rows, {} distinct pairs",
        co_occurrences.len(),
        corpus.n_terms()
    );

    Ok(CoOccurrenceComputeResult {
        co_occurrences,
        vocabulary,
        document_index,
        window_counts,
        corpus_window_counts,
        corpus,
    })
}
