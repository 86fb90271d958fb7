//! Precision/recall at fixed cutoffs, aggregated over a run
//!
//! Per-query values are retained and reduced once at the end, so the
//! summary does not depend on query order.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;

use super::evaluator::RankedResult;
use super::query::Query;

/// Sorted, deduplicated, non-zero cutoff values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cutoffs(Vec<usize>);

impl Cutoffs {
    pub fn new(mut values: Vec<usize>) -> Result<Self> {
        if values.is_empty() {
            bail!("at least one cutoff is required");
        }
        if values.contains(&0) {
            bail!("cutoffs must be greater than 0");
        }
        values.sort_unstable();
        values.dedup();
        Ok(Self(values))
    }

    pub fn values(&self) -> &[usize] {
        &self.0
    }

    pub fn max(&self) -> usize {
        // Non-empty by construction
        self.0.last().copied().unwrap_or(0)
    }
}

/// Per-query values for one cutoff
#[derive(Debug, Clone)]
struct CutoffStat {
    pub k: usize,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
}

/// Mean and population standard deviation at one cutoff
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CutoffSummary {
    pub k: usize,
    pub precision_mean: f64,
    pub precision_std: f64,
    pub recall_mean: f64,
    pub recall_std: f64,
    pub queries: usize,
}

/// Count distinct relevant ids within the first `k` results
fn relevant_in_top_k(query: &Query, ranked: &RankedResult, k: usize) -> usize {
    let mut counted: HashSet<&str> = HashSet::new();
    ranked
        .top(k)
        .iter()
        .filter(|id| query.is_relevant(id) && counted.insert(id.as_str()))
        .count()
}

/// Precision@k divides by k even when fewer than k results came back.
pub fn precision_at_k(query: &Query, ranked: &RankedResult, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    relevant_in_top_k(query, ranked, k) as f64 / k as f64
}

/// Recall@k; 0 for a query without ground truth
pub fn recall_at_k(query: &Query, ranked: &RankedResult, k: usize) -> f64 {
    if query.relevant.is_empty() {
        return 0.0;
    }
    relevant_in_top_k(query, ranked, k) as f64 / query.relevant.len() as f64
}

/// Population mean and standard deviation; `(0, 0)` for no values
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Accumulates per-query precision/recall at every cutoff
#[derive(Debug, Clone)]
pub struct PrecisionRecallAggregator {
    stats: Vec<CutoffStat>,
}

impl PrecisionRecallAggregator {
    pub fn new(cutoffs: &Cutoffs) -> Self {
        let stats = cutoffs
            .values()
            .iter()
            .map(|&k| CutoffStat {
                k,
                precision: Vec::new(),
                recall: Vec::new(),
            })
            .collect();
        Self { stats }
    }

    /// Score one query's ranked list at every cutoff
    ///
    /// A failed query arrives with an empty ranked list and scores 0.
    pub fn record(&mut self, query: &Query, ranked: &RankedResult) {
        for stat in &mut self.stats {
            stat.precision.push(precision_at_k(query, ranked, stat.k));
            stat.recall.push(recall_at_k(query, ranked, stat.k));
        }
    }

    pub fn recorded(&self) -> usize {
        self.stats.first().map(|s| s.precision.len()).unwrap_or(0)
    }

    /// Reduce to mean/std per cutoff, ascending by k
    pub fn summarize(&self) -> Vec<CutoffSummary> {
        self.stats
            .iter()
            .map(|stat| {
                let (precision_mean, precision_std) = mean_std(&stat.precision);
                let (recall_mean, recall_std) = mean_std(&stat.recall);
                CutoffSummary {
                    k: stat.k,
                    precision_mean,
                    precision_std,
                    recall_mean,
                    recall_std,
                    queries: stat.precision.len(),
                }
            })
            .collect()
    }
}
