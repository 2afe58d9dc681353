//! Keyness metrics over a long-format co-occurrence table, computed per pivot group.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregate::WindowCounts;
use crate::document_index::PivotValue;
use crate::error::{CoOccurrenceError, Result};
use crate::table::{CoOccurrence, CoOccurrenceTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeynessMetric {
    #[serde(rename = "TF")]
    TF,
    #[serde(rename = "TF_normalized")]
    TFNormalized,
    #[serde(rename = "TF_IDF")]
    TFIDF,
    #[serde(rename = "PPMI")]
    PPMI,
    #[serde(rename = "LLR")]
    LLR,
    #[serde(rename = "LLR_Dunning")]
    LLRDunning,
    #[serde(rename = "DICE")]
    DICE,
    #[serde(rename = "HAL_cwr")]
    HALcwr,
}

impl KeynessMetric {
    pub const ALL: [KeynessMetric; 8] = [
        KeynessMetric::TF,
        KeynessMetric::TFNormalized,
        KeynessMetric::TFIDF,
        KeynessMetric::PPMI,
        KeynessMetric::LLR,
        KeynessMetric::LLRDunning,
        KeynessMetric::DICE,
        KeynessMetric::HALcwr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeynessMetric::TF => "TF",
            KeynessMetric::TFNormalized => "TF_normalized",
            KeynessMetric::TFIDF => "TF_IDF",
            KeynessMetric::PPMI => "PPMI",
            KeynessMetric::LLR => "LLR",
            KeynessMetric::LLRDunning => "LLR_Dunning",
            KeynessMetric::DICE => "DICE",
            KeynessMetric::HALcwr => "HAL_cwr",
        }
    }

    /// Whether the metric needs per-token window counts.
    pub fn needs_marginals(&self) -> bool {
        matches!(
            self,
            KeynessMetric::PPMI
                | KeynessMetric::LLR
                | KeynessMetric::LLRDunning
                | KeynessMetric::DICE
                | KeynessMetric::HALcwr
        )
    }
}

impl fmt::Display for KeynessMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeynessMetric {
    type Err = CoOccurrenceError;

    fn from_str(s: &str) -> Result<Self> {
        KeynessMetric::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoOccurrenceError::usage(format!("unknown keyness metric {s:?}")))
    }
}

/// Window counts per partition `document_id`.
pub type PartitionWindowCounts = BTreeMap<u32, WindowCounts>;

/// Returns a copy of `table` with `score` set for every row.
///
/// Rows are grouped by `pivot_key` (all rows form one group when `None`).
/// Marginals for a group are the summed window counts of the partitions its
/// rows come from. With `normalize`, scores are scaled so that the largest
/// absolute score of each group is 1. Row order is preserved.
pub fn partitioned_significances(
    table: &CoOccurrenceTable,
    pivot_key: Option<&str>,
    metric: KeynessMetric,
    vocabulary_size: usize,
    normalize: bool,
    window_counts: &PartitionWindowCounts,
) -> Result<CoOccurrenceTable> {
    if let Some(row) = table
        .rows()
        .iter()
        .find(|r| r.w1_id as usize >= vocabulary_size || r.w2_id as usize >= vocabulary_size)
    {
        return Err(CoOccurrenceError::usage(format!(
            "pair ({}, {}) outside vocabulary of size {vocabulary_size}",
            row.w1_id, row.w2_id
        )));
    }

    let mut groups: BTreeMap<Option<PivotValue>, Vec<usize>> = BTreeMap::new();
    for (i, row) in table.rows().iter().enumerate() {
        let key = match pivot_key {
            Some(column) => Some(table.column_value(row, column).ok_or_else(|| {
                CoOccurrenceError::usage(format!("pivot key {column:?} not in co-occurrence table"))
            })?),
            None => None,
        };
        groups.entry(key).or_default().push(i);
    }

    let document_frequency = match metric {
        KeynessMetric::TFIDF => pair_document_frequency(table.rows(), &groups),
        _ => HashMap::new(),
    };

    let mut scores = vec![0.0f64; table.len()];
    for members in groups.values() {
        let rows: Vec<&CoOccurrence> = members.iter().map(|&i| &table.rows()[i]).collect();
        let marginals = if metric.needs_marginals() {
            Some(group_marginals(&rows, window_counts)?)
        } else {
            None
        };
        let context = GroupContext {
            total: rows.iter().map(|r| r.value).sum::<u64>() as f64,
            n_groups: groups.len() as f64,
            marginals: marginals.as_ref(),
            document_frequency: &document_frequency,
        };
        let mut group_scores = Vec::with_capacity(rows.len());
        for row in &rows {
            let score = context.score(metric, row)?;
            group_scores.push(if score.is_finite() { score } else { 0.0 });
        }
        if normalize {
            let max = group_scores.iter().fold(0.0f64, |m, s| m.max(s.abs()));
            if max > 0.0 {
                group_scores.iter_mut().for_each(|s| *s /= max);
            }
        }
        for (&i, score) in members.iter().zip(group_scores) {
            scores[i] = score;
        }
    }

    let rows = table
        .rows()
        .iter()
        .zip(scores)
        .map(|(row, score)| CoOccurrence {
            score: Some(score),
            ..row.clone()
        })
        .collect();
    CoOccurrenceTable::new(table.key_columns().to_vec(), rows)
}

fn pair_document_frequency(
    rows: &[CoOccurrence],
    groups: &BTreeMap<Option<PivotValue>, Vec<usize>>,
) -> HashMap<(u32, u32), f64> {
    let mut df: HashMap<(u32, u32), f64> = HashMap::new();
    for members in groups.values() {
        let pairs: HashSet<(u32, u32)> = members
            .iter()
            .map(|&i| (rows[i].w1_id, rows[i].w2_id))
            .collect();
        for pair in pairs {
            *df.entry(pair).or_insert(0.0) += 1.0;
        }
    }
    df
}

fn group_marginals(
    rows: &[&CoOccurrence],
    window_counts: &PartitionWindowCounts,
) -> Result<WindowCounts> {
    let partitions: HashSet<u32> = rows
        .iter()
        .map(|r| {
            r.document_id.ok_or_else(|| {
                CoOccurrenceError::usage("marginal frequencies require document_id on every row")
            })
        })
        .collect::<Result<_>>()?;
    let mut marginals = WindowCounts::default();
    for document_id in partitions {
        let counts = window_counts.get(&document_id).ok_or_else(|| {
            CoOccurrenceError::usage(format!("no window counts for partition {document_id}"))
        })?;
        marginals.merge(counts);
    }
    Ok(marginals)
}

struct GroupContext<'a> {
    total: f64,
    n_groups: f64,
    marginals: Option<&'a WindowCounts>,
    document_frequency: &'a HashMap<(u32, u32), f64>,
}

impl GroupContext<'_> {
    fn marginals(&self, metric: KeynessMetric) -> Result<&WindowCounts> {
        self.marginals.ok_or_else(|| {
            CoOccurrenceError::usage(format!("{metric} requires marginal frequencies"))
        })
    }

    fn score(&self, metric: KeynessMetric, row: &CoOccurrence) -> Result<f64> {
        let value = row.value as f64;
        let tf = if self.total > 0.0 { value / self.total } else { 0.0 };
        let freqs = |m: &WindowCounts| (m.get(row.w1_id) as f64, m.get(row.w2_id) as f64);
        Ok(match metric {
            KeynessMetric::TF => value,
            KeynessMetric::TFNormalized => tf,
            KeynessMetric::TFIDF => {
                let df = self
                    .document_frequency
                    .get(&(row.w1_id, row.w2_id))
                    .copied()
                    .unwrap_or(0.0);
                tf * (((1.0 + self.n_groups) / (1.0 + df)).ln() + 1.0)
            }
            KeynessMetric::PPMI => {
                let (f1, f2) = freqs(self.marginals(metric)?);
                ppmi(value, f1, f2, self.total)
            }
            KeynessMetric::DICE => {
                let (f1, f2) = freqs(self.marginals(metric)?);
                if f1 + f2 > 0.0 { 2.0 * value / (f1 + f2) } else { 0.0 }
            }
            KeynessMetric::LLR | KeynessMetric::LLRDunning => {
                let marginals = self.marginals(metric)?;
                let (f1, f2) = freqs(marginals);
                let dunning = metric == KeynessMetric::LLRDunning;
                llr(value, f1, f2, marginals.n_windows as f64, dunning)
            }
            KeynessMetric::HALcwr => {
                let (f1, f2) = freqs(self.marginals(metric)?);
                let hal = row.hal_value.ok_or_else(|| {
                    CoOccurrenceError::usage(
                        "HAL_cwr requires distance-weighted counts (hal_value)",
                    )
                })?;
                let denominator = f1 + f2 - hal;
                if denominator > 0.0 { hal / denominator } else { 0.0 }
            }
        })
    }
}

fn ppmi(value: f64, f1: f64, f2: f64, n: f64) -> f64 {
    if f1 <= 0.0 || f2 <= 0.0 || value <= 0.0 {
        return 0.0;
    }
    ((value * n) / (f1 * f2)).log2().max(0.0)
}

/// G² over the 2×2 window table `[[k11, k12], [k21, k22]]`.
fn llr(k11: f64, f1: f64, f2: f64, n: f64, dunning: bool) -> f64 {
    let k12 = (f1 - k11).max(0.0);
    let k21 = (f2 - k11).max(0.0);
    let k22 = (n - f1 - f2 + k11).max(0.0);
    let n = k11 + k12 + k21 + k22;
    if n <= 0.0 {
        return 0.0;
    }
    let (r1, r2) = (k11 + k12, k21 + k22);
    let (c1, c2) = (k11 + k21, k12 + k22);
    let term = |k: f64, row: f64, col: f64| {
        if k > 0.0 {
            k * (k * n / (row * col)).ln()
        } else {
            0.0
        }
    };
    let g2 = 2.0 * (term(k11, r1, c1) + term(k12, r1, c2) + term(k21, r2, c1) + term(k22, r2, c2));
    let g2 = g2.max(0.0);
    if !dunning || r1 <= 0.0 || r2 <= 0.0 || c1 <= 0.0 || c2 <= 0.0 {
        return g2;
    }
    let q = 1.0 + (n / r1 + n / r2 - 1.0) * (n / c1 + n / c2 - 1.0) / (6.0 * n);
    g2 / q
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(year: i64, document_id: u32, w1: u32, w2: u32, value: u64) -> CoOccurrence {
        CoOccurrence {
            keys: vec![PivotValue::Int(year)],
            document_id: Some(document_id),
            ..CoOccurrence::new(w1, w2, value)
        }
    }

    fn table() -> CoOccurrenceTable {
        CoOccurrenceTable::new(
            vec!["year".into()],
            vec![row(1990, 0, 0, 1, 4), row(1990, 0, 0, 2, 1), row(1991, 1, 0, 1, 2)],
        )
        .unwrap()
    }

    fn window_counts() -> PartitionWindowCounts {
        let counts = |n_windows, pairs: &[(u32, u64)]| WindowCounts {
            n_windows,
            counts: pairs.iter().copied().collect(),
        };
        BTreeMap::from([
            (0, counts(10, &[(0, 5), (1, 4), (2, 2)])),
            (1, counts(4, &[(0, 2), (1, 2)])),
        ])
    }

    /// Scores `table()` by year over a vocabulary of three tokens.
    fn by_year(
        metric: KeynessMetric,
        normalize: bool,
        counts: &PartitionWindowCounts,
    ) -> Result<CoOccurrenceTable> {
        partitioned_significances(&table(), Some("year"), metric, 3, normalize, counts)
    }

    #[test]
    fn metric_names_parse() {
        for metric in KeynessMetric::ALL {
            assert_eq!(metric.name().parse::<KeynessMetric>().unwrap(), metric);
        }
        assert_eq!("ppmi".parse::<KeynessMetric>().unwrap(), KeynessMetric::PPMI);
        assert!("chi2".parse::<KeynessMetric>().is_err());
    }

    #[test]
    fn tf_normalized_divides_by_group_total() {
        let scored = by_year(KeynessMetric::TFNormalized, false, &BTreeMap::new()).unwrap();
        let scores: Vec<f64> = scored.rows().iter().filter_map(|r| r.score).collect();
        assert_eq!(scores, vec![0.8, 0.2, 1.0]);
    }

    #[test]
    fn tf_idf_discounts_pairs_found_in_every_group() {
        let scored = by_year(KeynessMetric::TFIDF, false, &BTreeMap::new()).unwrap();
        let rows = scored.rows();
        // (0,1) occurs in both years: idf = ln(3/3) + 1 = 1
        assert!((rows[0].score.unwrap() - 0.8).abs() < 1e-12);
        let idf = (3.0f64 / 2.0).ln() + 1.0;
        assert!((rows[1].score.unwrap() - 0.2 * idf).abs() < 1e-12);
    }

    #[test]
    fn ppmi_and_dice_use_window_marginals() {
        let counts = window_counts();
        let scored = by_year(KeynessMetric::PPMI, false, &counts).unwrap();
        // group 1990: N = 5, value 4, f(0)=5, f(1)=4 -> log2(20/20) = 0
        assert_eq!(scored.rows()[0].score, Some(0.0));
        // value 1, f(0)=5, f(2)=2 -> log2(5/10) < 0 -> 0
        assert_eq!(scored.rows()[1].score, Some(0.0));

        let scored = by_year(KeynessMetric::DICE, false, &counts).unwrap();
        assert_eq!(scored.rows()[0].score, Some(8.0 / 9.0));
        assert_eq!(scored.rows()[2].score, Some(1.0));
    }

    #[test]
    fn llr_is_non_negative_and_dunning_is_smaller() {
        let counts = window_counts();
        let plain = by_year(KeynessMetric::LLR, false, &counts).unwrap();
        let dunning = by_year(KeynessMetric::LLRDunning, false, &counts).unwrap();
        for (p, d) in plain.rows().iter().zip(dunning.rows()) {
            let (p, d) = (p.score.unwrap(), d.score.unwrap());
            assert!(p >= 0.0);
            assert!(d <= p);
        }
        assert!(plain.rows()[0].score.unwrap() > 0.0);
    }

    #[test]
    fn normalize_scales_group_maximum_to_one() {
        let scored = by_year(KeynessMetric::TF, true, &BTreeMap::new()).unwrap();
        let scores: Vec<f64> = scored.rows().iter().filter_map(|r| r.score).collect();
        assert_eq!(scores, vec![1.0, 0.25, 1.0]);
    }

    #[test]
    fn missing_marginals_or_hal_values_fail() {
        let table = table();
        let no_counts = BTreeMap::new();
        let err = partitioned_significances(&table, None, KeynessMetric::PPMI, 3, false, &no_counts)
            .unwrap_err();
        assert!(matches!(err, CoOccurrenceError::Usage(_)));
        let counts = window_counts();
        let err = partitioned_significances(&table, None, KeynessMetric::HALcwr, 3, false, &counts)
            .unwrap_err();
        assert!(err.to_string().contains("hal_value"));
        let err = partitioned_significances(&table, None, KeynessMetric::TF, 2, false, &no_counts)
            .unwrap_err();
        assert!(err.to_string().contains("vocabulary"));
    }

    #[test]
    fn scoring_is_deterministic() {
        let (table, counts) = (table(), window_counts());
        let a = partitioned_significances(&table, None, KeynessMetric::LLR, 3, true, &counts);
        let b = partitioned_significances(&table, None, KeynessMetric::LLR, 3, true, &counts);
        assert_eq!(a.unwrap(), b.unwrap());
    }
}
