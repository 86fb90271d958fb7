//! Per-query evaluation: embed → search → locate relevant hits

use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

use super::query::Query;
use crate::backends::SearchBackend;
use crate::embeddings::EmbeddingEngine;

/// Ranked document ids for one query, rank 1 first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankedResult {
    ids: Vec<String>,
}

impl RankedResult {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// First `k` ids, or all of them when fewer were returned
    pub fn top(&self, k: usize) -> &[String] {
        &self.ids[..k.min(self.ids.len())]
    }

    /// 1-based position of the first occurrence of `doc_id`
    pub fn position_of(&self, doc_id: &str) -> Option<usize> {
        self.ids.iter().position(|id| id == doc_id).map(|i| i + 1)
    }
}

/// A relevant document found in the ranked list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevantHit {
    pub doc_id: String,
    pub rank: usize,
}

/// Result record for one query
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query_id: String,
    pub query: String,
    /// Found relevant documents in ground-truth order
    pub relevant_positions: Vec<RelevantHit>,
    pub embed_ms: Option<f64>,
    pub search_ms: Option<f64>,
    /// Deepest rank among found relevant documents; `None` when none were found
    pub max_rank: Option<usize>,
    /// Number of candidates the backend returned
    pub returned: usize,
    /// Failure description when embedding or search failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    /// Zero-result outcome for a query whose embedding or search failed
    pub fn failed(query: &Query, error: &anyhow::Error) -> Self {
        Self {
            query_id: query.id.clone(),
            query: query.text.clone(),
            relevant_positions: Vec::new(),
            embed_ms: None,
            search_ms: None,
            max_rank: None,
            returned: 0,
            error: Some(format!("{:#}", error)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `id (rank)` pairs, comma separated
    pub fn positions_label(&self) -> String {
        self.relevant_positions
            .iter()
            .map(|hit| format!("{} ({})", hit.doc_id, hit.rank))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Locate each relevant id in the ranked list
///
/// Only the first occurrence of a duplicated id counts.
pub fn relevant_positions(query: &Query, ranked: &RankedResult) -> Vec<RelevantHit> {
    let mut first_seen: HashMap<&str, usize> = HashMap::with_capacity(ranked.len());
    for (index, id) in ranked.ids().iter().enumerate() {
        first_seen.entry(id.as_str()).or_insert(index + 1);
    }

    query
        .relevant
        .iter()
        .filter_map(|doc_id| {
            first_seen.get(doc_id.as_str()).map(|&rank| RelevantHit {
                doc_id: doc_id.clone(),
                rank,
            })
        })
        .collect()
}

/// Drives one query at a time through the embedder and the backend
pub struct QueryEvaluator<'a> {
    embedder: &'a mut dyn EmbeddingEngine,
    backend: &'a dyn SearchBackend,
    search_limit: usize,
}

impl<'a> QueryEvaluator<'a> {
    pub fn new(
        embedder: &'a mut dyn EmbeddingEngine,
        backend: &'a dyn SearchBackend,
        search_limit: usize,
    ) -> Self {
        Self {
            embedder,
            backend,
            search_limit,
        }
    }

    /// Evaluate one query. Never fails: errors become a zeroed outcome.
    pub fn evaluate(&mut self, query: &Query) -> (QueryOutcome, RankedResult) {
        let embed_start = Instant::now();
        let vector = match self.embedder.embed_query(&query.text) {
            Ok(vector) => vector,
            Err(e) => {
                let e = e.context(format!("embedding failed for query '{}'", query.id));
                tracing::warn!(query_id = %query.id, error = %format!("{:#}", e), "query failed");
                return (QueryOutcome::failed(query, &e), RankedResult::empty());
            }
        };
        let embed_ms = embed_start.elapsed().as_secs_f64() * 1000.0;

        let search_start = Instant::now();
        let hits = match self.backend.search(&vector, self.search_limit) {
            Ok(hits) => hits,
            Err(e) => {
                let e = e.context(format!(
                    "{} search failed for query '{}'",
                    self.backend.name(),
                    query.id
                ));
                tracing::warn!(query_id = %query.id, error = %format!("{:#}", e), "query failed");
                return (QueryOutcome::failed(query, &e), RankedResult::empty());
            }
        };
        let search_ms = search_start.elapsed().as_secs_f64() * 1000.0;

        let mut ids: Vec<String> = hits.into_iter().map(|hit| hit.id).collect();
        ids.truncate(self.search_limit);
        let ranked = RankedResult::new(ids);

        let positions = relevant_positions(query, &ranked);
        let max_rank = positions.iter().map(|hit| hit.rank).max();

        let outcome = QueryOutcome {
            query_id: query.id.clone(),
            query: query.text.clone(),
            relevant_positions: positions,
            embed_ms: Some(embed_ms),
            search_ms: Some(search_ms),
            max_rank,
            returned: ranked.len(),
            error: None,
        };

        (outcome, ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SearchHit;
    use anyhow::{bail, Result};

    struct FixedEmbedder {
        fail_on: Option<String>,
    }

    impl EmbeddingEngine for FixedEmbedder {
        fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
            if self.fail_on.as_deref() == Some(text) {
                bail!("tokenizer exploded");
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct ListBackend {
        ids: Vec<&'static str>,
        fail: bool,
    }

    impl SearchBackend for ListBackend {
        fn name(&self) -> &str {
            "list"
        }

        fn search(&self, _vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
            if self.fail {
                bail!("connection refused");
            }
            Ok(self
                .ids
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, id)| SearchHit {
                    id: id.to_string(),
                    score: 1.0 - i as f32 * 0.1,
                })
                .collect())
        }
    }

    fn evaluate(
        query: &Query,
        ids: Vec<&'static str>,
        limit: usize,
    ) -> (QueryOutcome, RankedResult) {
        let mut embedder = FixedEmbedder { fail_on: None };
        let backend = ListBackend { ids, fail: false };
        let mut evaluator = QueryEvaluator::new(&mut embedder, &backend, limit);
        evaluator.evaluate(query)
    }

    #[test]
    fn test_positions_and_max_rank() {
        let query = Query::new("q1", "what", &["A", "C"]);
        let (outcome, ranked) = evaluate(&query, vec!["B", "A", "D", "C", "E"], 10);

        assert_eq!(ranked.len(), 5);
        assert_eq!(outcome.positions_label(), "A (2), C (4)");
        assert_eq!(outcome.max_rank, Some(4));
        assert!(outcome.embed_ms.is_some());
        assert!(outcome.search_ms.is_some());
        assert!(!outcome.is_error());
    }

    #[test]
    fn test_absent_relevant_leaves_max_rank_unset() {
        let query = Query::new("q2", "what", &["A"]);
        let (outcome, _) = evaluate(&query, vec!["B", "C"], 10);

        assert!(outcome.relevant_positions.is_empty());
        assert_eq!(outcome.max_rank, None);
    }

    #[test]
    fn test_duplicate_ids_use_first_occurrence() {
        let query = Query::new("q3", "what", &["A"]);
        let (outcome, _) = evaluate(&query, vec!["B", "A", "C", "A"], 10);

        assert_eq!(
            outcome.relevant_positions,
            vec![RelevantHit {
                doc_id: "A".to_string(),
                rank: 2
            }]
        );
        assert_eq!(outcome.max_rank, Some(2));
    }

    #[test]
    fn test_result_is_truncated_to_search_limit() {
        let query = Query::new("q4", "what", &["E"]);
        let (outcome, ranked) = evaluate(&query, vec!["A", "B", "C", "D", "E"], 3);

        assert_eq!(ranked.len(), 3);
        assert_eq!(outcome.returned, 3);
        assert_eq!(outcome.max_rank, None);
    }

    #[test]
    fn test_search_failure_becomes_error_outcome() {
        let query = Query::new("q5", "what", &["A"]);
        let mut embedder = FixedEmbedder { fail_on: None };
        let backend = ListBackend {
            ids: vec!["A"],
            fail: true,
        };
        let mut evaluator = QueryEvaluator::new(&mut embedder, &backend, 10);
        let (outcome, ranked) = evaluator.evaluate(&query);

        assert!(outcome.is_error());
        assert!(outcome.error.as_deref().unwrap().contains("connection refused"));
        assert!(outcome.embed_ms.is_none());
        assert!(outcome.search_ms.is_none());
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_embedding_failure_becomes_error_outcome() {
        let query = Query::new("q6", "boom", &["A"]);
        let mut embedder = FixedEmbedder {
            fail_on: Some("boom".to_string()),
        };
        let backend = ListBackend {
            ids: vec!["A"],
            fail: false,
        };
        let mut evaluator = QueryEvaluator::new(&mut embedder, &backend, 10);
        let (outcome, ranked) = evaluator.evaluate(&query);

        assert!(outcome.error.as_deref().unwrap().contains("embedding failed"));
        assert_eq!(outcome.max_rank, None);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_ranked_top_never_exceeds_length() {
        let ranked = RankedResult::new(vec!["A".into(), "B".into()]);
        assert_eq!(ranked.top(1), &["A".to_string()]);
        assert_eq!(ranked.top(10).len(), 2);
        assert_eq!(ranked.position_of("B"), Some(2));
        assert_eq!(ranked.position_of("Z"), None);
    }
}
