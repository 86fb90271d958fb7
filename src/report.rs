//! Console and JSON output for a finished run

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::harness::{format_duration, QueryOutcome, RunResult};
use crate::metrics::MetricSample;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// One progress line per evaluated query
pub fn print_outcome(index: usize, total: usize, outcome: &QueryOutcome) {
    let found = if outcome.relevant_positions.is_empty() {
        "none".dimmed().to_string()
    } else {
        outcome.positions_label()
    };

    match &outcome.error {
        Some(error) => println!(
            "   [{}/{}] {} {} {}",
            index,
            total,
            outcome.query_id,
            "FAILED".red().bold(),
            error
        ),
        None => println!(
            "   [{}/{}] {} embed {:.0}ms, search {:.0}ms, relevant: {}",
            index,
            total,
            outcome.query_id,
            outcome.embed_ms.unwrap_or_default(),
            outcome.search_ms.unwrap_or_default(),
            found
        ),
    }
}

/// Human-readable summary of a run
pub fn print_summary(result: &RunResult) {
    println!();
    println!("{}", RULE);
    println!("{} {}", "📊 Results:".bold(), result.query_set);
    println!("{}", RULE);
    println!();
    println!("   Run:      {}", result.run_id);
    println!("   Backend:  {}", result.backend);
    println!("   Model:    {}", result.model);
    println!(
        "   Queries:  {} ({} failed)",
        result.outcomes.len(),
        result.failed
    );
    println!("   Duration: {}", format_duration(result.duration()));
    println!();

    println!("   {}", "Precision / Recall:".bold());
    println!(
        "   {:>6}  {:>10}  {:>8}  {:>10}  {:>8}",
        "k", "precision", "± std", "recall", "± std"
    );
    for summary in &result.cutoffs {
        println!(
            "   {:>6}  {:>10.4}  {:>8.4}  {:>10.4}  {:>8.4}",
            summary.k,
            summary.precision_mean,
            summary.precision_std,
            summary.recall_mean,
            summary.recall_std
        );
    }

    let found: Vec<usize> = result.outcomes.iter().filter_map(|o| o.max_rank).collect();
    if !found.is_empty() {
        println!();
        println!(
            "   Deepest relevant rank: {} (mean {:.1} over {} queries)",
            found.iter().max().copied().unwrap_or(0),
            found.iter().sum::<usize>() as f64 / found.len() as f64,
            found.len()
        );
    }

    println!();
    let metrics = &result.metrics;
    if metrics.is_empty() {
        println!("   {}", "Resources: not sampled".dimmed());
    } else {
        println!("   {}", "Resources:".bold());
        println!("   ├─ samples:     {}", metrics.len());
        println!(
            "   ├─ CPU peak:    {:.1}%",
            metrics.peak_cpu_percent().unwrap_or_default()
        );
        println!(
            "   ├─ CPU mean:    {:.1}%",
            metrics.mean_cpu_percent().unwrap_or_default()
        );
        match metrics.disk_gb.as_ref().and_then(|d| d.last()) {
            Some(disk) => {
                println!(
                    "   ├─ memory peak: {:.1} MB",
                    metrics.peak_memory_mb().unwrap_or_default()
                );
                println!("   └─ disk used:   {:.2} GB", disk);
            }
            None => println!(
                "   └─ memory peak: {:.1} MB",
                metrics.peak_memory_mb().unwrap_or_default()
            ),
        }
    }
    println!();
}

/// Single sample from `vecbench snapshot`
pub fn print_sample(target: &str, sample: &MetricSample) {
    println!("{} {}", "📈 Snapshot:".bold(), target);
    println!("   ├─ time:   {}", sample.timestamp.to_rfc3339());
    println!("   ├─ CPU:    {:.2}%", sample.cpu_percent);
    match sample.disk_gb {
        Some(disk) => {
            println!("   ├─ memory: {:.1} MB", sample.memory_mb);
            println!("   └─ disk:   {:.2} GB", disk);
        }
        None => println!("   └─ memory: {:.1} MB", sample.memory_mb),
    }
}

/// Write any serializable result as pretty JSON
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
