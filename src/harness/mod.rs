//! Retrieval-quality harness
//!
//! Public interface:
//! - `QuerySet` - queries with ground-truth relevant ids
//! - `QueryEvaluator` - embed, search, and locate relevant hits for one query
//! - `PrecisionRecallAggregator` - precision/recall at fixed cutoffs
//! - `RunCoordinator` - runs the query loop alongside the metric sampler

pub mod aggregator;
pub mod coordinator;
pub mod evaluator;
pub mod query;

pub use aggregator::{CutoffSummary, Cutoffs, PrecisionRecallAggregator};
pub use coordinator::{format_duration, RunCoordinator, RunResult, RunSettings, RunState};
pub use evaluator::{QueryEvaluator, QueryOutcome, RankedResult, RelevantHit};
pub use query::{Query, QuerySet};
