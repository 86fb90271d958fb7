//! Resource sampling for the system under test
//!
//! A [`SnapshotSource`] reads raw counters; a [`MetricSampler`] polls one on a
//! background thread while queries run and returns the collected series.

pub mod disk;
pub mod docker;
pub mod sampler;
pub mod snapshot;

pub use docker::{DockerEndpoint, DockerStatsSource};
pub use sampler::{MetricBuffers, MetricSampler, MetricSeries, SamplerSettings};
pub use snapshot::{MetricSample, ResourceSnapshot, SnapshotSource};

use anyhow::Result;

use crate::config::SamplerConfig;

/// Build the configured snapshot source; `None` when no container is set
pub fn source_from_config(config: &SamplerConfig) -> Result<Option<Box<dyn SnapshotSource>>> {
    let Some(container) = &config.container else {
        return Ok(None);
    };
    let endpoint = DockerEndpoint::parse(&config.resolved_docker_host())?;
    let source = DockerStatsSource::new(
        endpoint,
        container.clone(),
        config.disk_path.clone(),
        config.request_timeout(),
    )?;
    Ok(Some(Box::new(source)))
}

impl From<&SamplerConfig> for SamplerSettings {
    fn from(config: &SamplerConfig) -> Self {
        Self {
            interval: config.interval(),
            join_timeout: config.join_timeout(),
        }
    }
}
