//! Run command - evaluate a query set against a backend while sampling resources

use anyhow::{Context, Result};
use std::path::PathBuf;

use vecbench::backends;
use vecbench::config::Config;
use vecbench::embeddings;
use vecbench::harness::{QuerySet, RunCoordinator, RunSettings};
use vecbench::metrics::{self, SamplerSettings};
use vecbench::report;

/// CLI overrides for a run; `None` keeps the configured value
#[derive(Debug, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub queries: Option<PathBuf>,
    pub search_limit: Option<usize>,
    pub query_limit: Option<usize>,
    pub cutoffs: Option<Vec<usize>>,
    pub container: Option<String>,
    pub interval_secs: Option<u64>,
    pub no_sampler: bool,
    pub output: Option<PathBuf>,
    pub json: bool,
}

impl RunOptions {
    fn apply(&self, config: &mut Config) {
        if let Some(queries) = &self.queries {
            config.run.queries = Some(queries.clone());
        }
        if let Some(limit) = self.search_limit {
            config.run.search_limit = limit;
        }
        if self.query_limit.is_some() {
            config.run.query_limit = self.query_limit;
        }
        if let Some(cutoffs) = &self.cutoffs {
            config.run.cutoffs = Some(cutoffs.clone());
        }
        if let Some(container) = &self.container {
            config.sampler.container = Some(container.clone());
        }
        if let Some(interval) = self.interval_secs {
            config.sampler.interval_secs = interval;
        }
        if self.no_sampler {
            config.sampler.container = None;
        }
    }
}

/// Execute a benchmark run
pub fn execute(options: RunOptions) -> Result<()> {
    let mut config = Config::load(options.config.as_deref())?;
    options.apply(&mut config);
    config.validate()?;

    let queries_path = config
        .run
        .queries
        .clone()
        .context("No query set given: pass --queries or set run.queries in vecbench.toml")?;
    let mut query_set = QuerySet::load(&queries_path)?;
    if let Some(limit) = config.run.query_limit {
        query_set.truncate(limit);
    }

    let cutoffs = config.run.cutoffs()?;
    if cutoffs.max() > config.run.search_limit {
        tracing::warn!(
            max_cutoff = cutoffs.max(),
            search_limit = config.run.search_limit,
            "cutoffs exceed the search limit; precision at those cutoffs is capped"
        );
    }

    let embedder = embeddings::create_embedder(&config.embedding)?;
    let backend = backends::connect(&config.backend)?;
    let source = metrics::source_from_config(&config.sampler)?;

    if !options.json {
        println!("🔬 Vector Search Benchmark");
        println!(
            "   Query set: {} ({} queries)",
            query_set.name,
            query_set.len()
        );
        println!(
            "   Backend:   {} ({})",
            config.backend.kind(),
            config.backend.url()
        );
        println!("   Model:     {}", config.embedding.model_name);
        println!("   Limit:     {} results per query", config.run.search_limit);
        match &config.sampler.container {
            Some(container) => println!(
                "   Sampling:  {} every {}s",
                container, config.sampler.interval_secs
            ),
            None => println!("   Sampling:  off"),
        }
        println!();
    }

    let settings = RunSettings {
        cutoffs,
        search_limit: config.run.search_limit,
        sampler: SamplerSettings::from(&config.sampler),
    };
    let mut coordinator = RunCoordinator::new(embedder, backend, source, settings);

    let result = if options.json {
        coordinator.run(&query_set)?
    } else {
        coordinator.run_with_progress(&query_set, report::print_outcome)?
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        report::print_summary(&result);
    }

    if let Some(path) = &options.output {
        report::write_json_pretty(path, &result)?;
        if !options.json {
            println!("   Saved: {}", path.display());
        }
    }

    Ok(())
}
