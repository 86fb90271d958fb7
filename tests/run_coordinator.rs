//! Run lifecycle against in-memory fakes
//!
//! Run with: cargo test --test run_coordinator

use anyhow::{bail, Result};
use approx::assert_relative_eq;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vecbench::backends::{SearchBackend, SearchHit};
use vecbench::embeddings::EmbeddingEngine;
use vecbench::harness::{Cutoffs, Query, QuerySet, RunCoordinator, RunSettings, RunState};
use vecbench::metrics::{ResourceSnapshot, SamplerSettings, SnapshotSource};

/// Embeds a query as its position in a fixed list of texts
struct IndexEmbedder {
    texts: Vec<String>,
}

impl EmbeddingEngine for IndexEmbedder {
    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        match self.texts.iter().position(|t| t == text) {
            Some(index) => Ok(vec![index as f32]),
            None => bail!("unknown text '{}'", text),
        }
    }

    fn dimension(&self) -> usize {
        1
    }

    fn model_name(&self) -> &str {
        "index-embedder"
    }
}

/// Returns a scripted ranked list per query index; `None` fails the search
struct ScriptedBackend {
    responses: Vec<Option<Vec<&'static str>>>,
    delay: Duration,
    reachable: bool,
}

impl SearchBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        std::thread::sleep(self.delay);
        let index = vector[0] as usize;
        match self.responses.get(index).cloned().flatten() {
            Some(ids) => Ok(ids
                .into_iter()
                .take(limit)
                .map(|id| SearchHit {
                    id: id.to_string(),
                    score: 1.0,
                })
                .collect()),
            None => bail!("search timed out"),
        }
    }

    fn ping(&self) -> Result<()> {
        if !self.reachable {
            bail!("collection 'articles' does not exist");
        }
        Ok(())
    }
}

struct CountingSource {
    calls: Arc<AtomicUsize>,
}

impl SnapshotSource for CountingSource {
    fn describe(&self) -> String {
        "container fake".to_string()
    }

    fn snapshot(&mut self) -> Result<ResourceSnapshot> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(ResourceSnapshot {
            cpu_usage_total: 150 + n,
            cpu_usage_previous: 100,
            system_cpu_total: 2000,
            system_cpu_previous: 1000,
            core_count: 4,
            memory_usage_bytes: 256 * 1024 * 1024,
            disk_used_bytes: Some(1024 * 1024 * 1024),
        })
    }
}

fn query_set(queries: Vec<Query>) -> QuerySet {
    QuerySet {
        name: "fake".to_string(),
        queries,
    }
}

fn settings(cutoffs: Vec<usize>) -> RunSettings {
    RunSettings {
        cutoffs: Cutoffs::new(cutoffs).unwrap(),
        search_limit: 10,
        sampler: SamplerSettings {
            interval: Duration::from_millis(5),
            join_timeout: Duration::from_secs(1),
        },
    }
}

fn coordinator(
    set: &QuerySet,
    responses: Vec<Option<Vec<&'static str>>>,
    reachable: bool,
    calls: Option<Arc<AtomicUsize>>,
) -> RunCoordinator {
    let embedder = IndexEmbedder {
        texts: set.queries.iter().map(|q| q.text.clone()).collect(),
    };
    let backend = ScriptedBackend {
        responses,
        delay: Duration::from_millis(20),
        reachable,
    };
    let source = calls.map(|calls| Box::new(CountingSource { calls }) as Box<dyn SnapshotSource>);
    RunCoordinator::new(
        Box::new(embedder),
        Box::new(backend),
        source,
        settings(vec![2, 4]),
    )
}

fn assert_sampler_stopped(calls: &AtomicUsize) {
    let after_run = calls.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        calls.load(Ordering::SeqCst),
        after_run,
        "sampler kept polling after the run returned"
    );
}

#[test]
fn test_failed_search_still_yields_every_outcome() {
    let set = query_set(vec![
        Query::new("q1", "first", &["A", "C"]),
        Query::new("q2", "second", &["B"]),
        Query::new("q3", "third", &["D"]),
    ]);
    let calls = Arc::new(AtomicUsize::new(0));
    let mut coordinator = coordinator(
        &set,
        vec![
            Some(vec!["B", "A", "D", "C", "E"]),
            None,
            Some(vec!["D", "X"]),
        ],
        true,
        Some(Arc::clone(&calls)),
    );
    assert_eq!(coordinator.state(), RunState::Idle);

    let result = coordinator.run(&set).unwrap();

    assert_eq!(coordinator.state(), RunState::Done);
    assert_sampler_stopped(&calls);

    assert_eq!(result.outcomes.len(), 3);
    assert_eq!(result.failed, 1);
    let failed = &result.outcomes[1];
    assert_eq!(failed.query_id, "q2");
    assert!(failed.error.as_deref().unwrap().contains("search timed out"));
    assert!(failed.relevant_positions.is_empty());
    assert_eq!(failed.max_rank, None);

    assert_eq!(result.outcomes[0].positions_label(), "A (2), C (4)");
    assert_eq!(result.outcomes[2].max_rank, Some(1));

    // k=4: q1 p=0.5 r=1, q2 zeroed, q3 p=0.25 r=1
    let at_4 = result.summary_at(4).unwrap();
    assert_eq!(at_4.queries, 3);
    assert_relative_eq!(at_4.precision_mean, 0.25);
    assert_relative_eq!(at_4.recall_mean, 2.0 / 3.0);

    let metrics = &result.metrics;
    assert!(!metrics.is_empty());
    assert_eq!(metrics.cpu_percent.len(), metrics.len());
    assert_eq!(metrics.memory_mb.len(), metrics.len());
    assert_eq!(metrics.disk_gb.as_ref().map(Vec::len), Some(metrics.len()));
    assert_relative_eq!(metrics.memory_mb[0], 256.0);
    assert!(result.started_at <= result.finished_at);
}

#[test]
fn test_preflight_failure_drains_sampler_before_error() {
    let set = query_set(vec![Query::new("q1", "first", &["A"])]);
    let calls = Arc::new(AtomicUsize::new(0));
    let mut coordinator = coordinator(&set, vec![Some(vec!["A"])], false, Some(Arc::clone(&calls)));

    let err = coordinator.run(&set).unwrap_err();

    assert!(err.to_string().contains("does not exist"));
    assert_eq!(coordinator.state(), RunState::Done);
    assert_sampler_stopped(&calls);
}

#[test]
fn test_run_without_sampler_has_empty_series() {
    let set = query_set(vec![Query::new("q1", "first", &["A"])]);
    let mut coordinator = coordinator(&set, vec![Some(vec!["A", "B"])], true, None);

    let result = coordinator.run(&set).unwrap();

    assert!(result.metrics.is_empty());
    assert_eq!(result.failed, 0);
    assert_eq!(result.backend, "scripted");
    assert_eq!(result.model, "index-embedder");
    assert_relative_eq!(result.summary_at(2).unwrap().precision_mean, 0.5);
}

#[test]
fn test_coordinator_is_single_use() {
    let set = query_set(vec![Query::new("q1", "first", &["A"])]);
    let mut coordinator = coordinator(&set, vec![Some(vec!["A"])], true, None);

    coordinator.run(&set).unwrap();
    assert!(coordinator.run(&set).is_err());
}

#[test]
fn test_progress_callback_sees_queries_in_order() {
    let set = query_set(vec![
        Query::new("q1", "first", &["A"]),
        Query::new("q2", "second", &["B"]),
    ]);
    let mut coordinator = coordinator(
        &set,
        vec![Some(vec!["A"]), Some(vec!["B"])],
        true,
        None,
    );

    let mut seen = Vec::new();
    coordinator
        .run_with_progress(&set, |index, total, outcome| {
            seen.push((index, total, outcome.query_id.clone()));
        })
        .unwrap();

    assert_eq!(
        seen,
        vec![(1, 2, "q1".to_string()), (2, 2, "q2".to_string())]
    );
}

#[test]
fn test_loaded_query_set_with_list_literal_ground_truth() {
    let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
    writeln!(
        file,
        r#"{{"id": 7, "question": "Is BRCA1 a tumor suppressor?", "relevant_passage_ids": "[101, 102]"}}"#
    )
    .unwrap();
    writeln!(
        file,
        r#"{{"id": 8, "question": "What causes scurvy?", "relevant_passage_ids": [201]}}"#
    )
    .unwrap();

    let set = QuerySet::load(file.path()).unwrap();
    assert_eq!(set.len(), 2);

    let mut coordinator = coordinator(
        &set,
        vec![Some(vec!["999", "102", "101"]), Some(vec!["201"])],
        true,
        None,
    );
    let result = coordinator.run(&set).unwrap();

    assert_eq!(result.outcomes[0].query_id, "7");
    assert_eq!(result.outcomes[0].positions_label(), "101 (3), 102 (2)");
    assert_eq!(result.outcomes[0].max_rank, Some(3));
    assert_relative_eq!(result.summary_at(4).unwrap().recall_mean, 1.0);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["outcomes"].as_array().unwrap().len(), 2);
    assert!(json["run_id"].is_string());
}
