//! Run lifecycle: sampler and query loop side by side
//!
//! ```text
//! Idle ──run()──▶ Evaluating ──loop ends / fatal error──▶ Draining ──▶ Done
//!                 (sampler polling,                        (stop, bounded join,
//!                  queries one at a time)                   buffer reconcile)
//! ```
//!
//! Draining is entered unconditionally: a fatal error in the loop is only
//! returned after the sampler has been stopped.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::aggregator::{CutoffSummary, Cutoffs, PrecisionRecallAggregator};
use super::evaluator::{QueryEvaluator, QueryOutcome};
use super::query::QuerySet;
use crate::backends::SearchBackend;
use crate::embeddings::EmbeddingEngine;
use crate::metrics::{MetricSampler, MetricSeries, SamplerSettings, SnapshotSource};

/// Lifecycle position of a [`RunCoordinator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    /// Sampler running while queries are evaluated
    Evaluating,
    Draining,
    Done,
}

/// Settings for one run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub cutoffs: Cutoffs,
    pub search_limit: usize,
    pub sampler: SamplerSettings,
}

/// Everything one run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub query_set: String,
    pub backend: String,
    pub model: String,
    pub search_limit: usize,
    /// Start of the query loop
    pub started_at: DateTime<Utc>,
    /// End of the query loop, before draining
    pub finished_at: DateTime<Utc>,
    /// Wall clock for the whole run, including draining
    pub duration_secs: f64,
    pub cutoffs: Vec<CutoffSummary>,
    pub outcomes: Vec<QueryOutcome>,
    pub failed: usize,
    pub metrics: MetricSeries,
}

impl RunResult {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }

    pub fn summary_at(&self, k: usize) -> Option<&CutoffSummary> {
        self.cutoffs.iter().find(|s| s.k == k)
    }
}

/// Owns one benchmark run from start to finish
///
/// Single use: the snapshot source is handed to the sampler on `run`, and a
/// finished coordinator refuses to run again.
pub struct RunCoordinator {
    embedder: Box<dyn EmbeddingEngine>,
    backend: Box<dyn SearchBackend>,
    source: Option<Box<dyn SnapshotSource>>,
    settings: RunSettings,
    state: RunState,
}

impl RunCoordinator {
    pub fn new(
        embedder: Box<dyn EmbeddingEngine>,
        backend: Box<dyn SearchBackend>,
        source: Option<Box<dyn SnapshotSource>>,
        settings: RunSettings,
    ) -> Self {
        Self {
            embedder,
            backend,
            source,
            settings,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run(&mut self, query_set: &QuerySet) -> Result<RunResult> {
        self.run_with_progress(query_set, |_, _, _| {})
    }

    /// Run every query in order; `on_outcome(index, total, outcome)` fires after each
    pub fn run_with_progress<F>(&mut self, query_set: &QuerySet, mut on_outcome: F) -> Result<RunResult>
    where
        F: FnMut(usize, usize, &QueryOutcome),
    {
        if self.state != RunState::Idle {
            bail!("run coordinator already used (state {:?})", self.state);
        }
        if query_set.is_empty() {
            bail!("query set '{}' has no queries", query_set.name);
        }

        let run_id = Uuid::new_v4();
        let run_start = Instant::now();
        tracing::info!(
            run_id = %run_id,
            queries = query_set.len(),
            backend = self.backend.name(),
            model = self.embedder.model_name(),
            "starting run"
        );

        let sampler = match self.source.take() {
            Some(source) => Some(MetricSampler::start(source, self.settings.sampler)?),
            None => None,
        };

        self.state = RunState::Evaluating;
        let started_at = Utc::now();
        let evaluated = self.evaluate_all(query_set, &mut on_outcome);
        let finished_at = Utc::now();

        self.state = RunState::Draining;
        let metrics = sampler.map(MetricSampler::stop).unwrap_or_default();
        self.state = RunState::Done;

        let (outcomes, aggregator) = evaluated?;
        let failed = outcomes.iter().filter(|o| o.is_error()).count();
        let duration = run_start.elapsed();

        tracing::info!(
            run_id = %run_id,
            failed,
            samples = metrics.len(),
            duration_ms = duration.as_millis() as u64,
            "run finished"
        );

        Ok(RunResult {
            run_id,
            query_set: query_set.name.clone(),
            backend: self.backend.name().to_string(),
            model: self.embedder.model_name().to_string(),
            search_limit: self.settings.search_limit,
            started_at,
            finished_at,
            duration_secs: duration.as_secs_f64(),
            cutoffs: aggregator.summarize(),
            outcomes,
            failed,
            metrics,
        })
    }

    fn evaluate_all<F>(
        &mut self,
        query_set: &QuerySet,
        on_outcome: &mut F,
    ) -> Result<(Vec<QueryOutcome>, PrecisionRecallAggregator)>
    where
        F: FnMut(usize, usize, &QueryOutcome),
    {
        self.backend.ping()?;

        let total = query_set.len();
        let mut aggregator = PrecisionRecallAggregator::new(&self.settings.cutoffs);
        let mut outcomes = Vec::with_capacity(total);
        let mut evaluator = QueryEvaluator::new(
            self.embedder.as_mut(),
            self.backend.as_ref(),
            self.settings.search_limit,
        );

        for (index, query) in query_set.queries.iter().enumerate() {
            let (outcome, ranked) = evaluator.evaluate(query);
            aggregator.record(query, &ranked);

            tracing::debug!(
                query_id = %outcome.query_id,
                embed_ms = outcome.embed_ms,
                search_ms = outcome.search_ms,
                max_rank = outcome.max_rank,
                returned = outcome.returned,
                "query evaluated"
            );
            on_outcome(index + 1, total, &outcome);
            outcomes.push(outcome);
        }

        Ok((outcomes, aggregator))
    }
}

/// `N minutes N seconds N milliseconds`
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    format!(
        "{} minutes {} seconds {} milliseconds",
        total_ms / 60_000,
        (total_ms / 1000) % 60,
        total_ms % 1000
    )
}
