//! Snapshot command - take one resource sample and print it

use anyhow::{bail, Result};
use chrono::Utc;
use std::path::PathBuf;

use vecbench::config::Config;
use vecbench::metrics::{self, MetricSample};
use vecbench::report;

pub struct SnapshotOptions {
    pub config: Option<PathBuf>,
    pub container: Option<String>,
    pub docker_host: Option<String>,
    pub disk_path: Option<PathBuf>,
    pub json: bool,
}

pub fn execute(options: SnapshotOptions) -> Result<()> {
    let mut config = Config::load(options.config.as_deref())?;
    if let Some(container) = options.container {
        config.sampler.container = Some(container);
    }
    if let Some(host) = options.docker_host {
        config.sampler.docker_host = Some(host);
    }
    if let Some(disk) = options.disk_path {
        config.sampler.disk_path = Some(disk);
    }

    let Some(mut source) = metrics::source_from_config(&config.sampler)? else {
        bail!("No container given: pass --container or set sampler.container in vecbench.toml");
    };

    let timestamp = Utc::now();
    let snapshot = source.snapshot()?;
    let sample = MetricSample::from_snapshot(timestamp, &snapshot);

    if options.json {
        println!("{}", serde_json::to_string_pretty(&sample)?);
    } else {
        report::print_sample(&source.describe(), &sample);
    }
    Ok(())
}
