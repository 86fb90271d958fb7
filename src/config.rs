//! Benchmark configuration (vecbench.toml)
//!
//! Resolution order: explicit `--config`, `./vecbench.toml`, the user config
//! under the platform config dir, then built-in defaults. CLI flags override
//! individual fields after loading.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backends::BackendConfig;
use crate::harness::Cutoffs;
use crate::paths;

/// Environment variable honoured for the Docker endpoint
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";

/// Default Docker Engine endpoint
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub sampler: SamplerConfig,
    pub embedding: EmbeddingConfig,
    pub backend: BackendConfig,
}

/// `[run]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// Query set with ground truth (JSON, JSON array, or JSON Lines)
    pub queries: Option<PathBuf>,
    /// Candidates requested from the backend per query
    pub search_limit: usize,
    /// Explicit cutoff list; takes precedence over `cutoff_range`
    pub cutoffs: Option<Vec<usize>>,
    pub cutoff_range: CutoffRange,
    /// Evaluate only the first N queries
    pub query_limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            queries: None,
            search_limit: 1000,
            cutoffs: None,
            cutoff_range: CutoffRange::default(),
            query_limit: None,
        }
    }
}

/// Inclusive cutoff range, `start..=end` by `step`
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CutoffRange {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

impl Default for CutoffRange {
    fn default() -> Self {
        Self {
            start: 100,
            end: 1000,
            step: 100,
        }
    }
}

impl RunConfig {
    /// Cutoffs to evaluate, sorted and deduplicated
    pub fn cutoffs(&self) -> Result<Cutoffs> {
        let values = match &self.cutoffs {
            Some(explicit) => explicit.clone(),
            None => {
                let range = self.cutoff_range;
                if range.step == 0 {
                    bail!("cutoff_range.step must be greater than 0");
                }
                if range.start > range.end {
                    bail!(
                        "cutoff_range.start ({}) is greater than cutoff_range.end ({})",
                        range.start,
                        range.end
                    );
                }
                (range.start..=range.end).step_by(range.step).collect()
            }
        };
        Cutoffs::new(values)
    }
}

/// `[sampler]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Container to sample; sampling is disabled when unset
    pub container: Option<String>,
    /// Docker Engine endpoint (`unix://...`, `tcp://...`, `http://...`)
    pub docker_host: Option<String>,
    pub interval_secs: u64,
    pub join_timeout_secs: u64,
    /// Host path whose filesystem usage is recorded with each sample
    pub disk_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            container: None,
            docker_host: None,
            interval_secs: 10,
            join_timeout_secs: 1,
            disk_path: None,
            request_timeout_secs: 30,
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Configured host, then `DOCKER_HOST`, then the default socket
    pub fn resolved_docker_host(&self) -> String {
        self.docker_host
            .clone()
            .or_else(|| std::env::var(ENV_DOCKER_HOST).ok())
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string())
    }
}

/// `[embedding]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_name: String,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    /// Prefix for asymmetric models (e.g. "query: " for E5)
    pub query_prefix: Option<String>,
    /// L2-normalise pooled vectors; off to match raw mean-pooled corpora
    pub normalize: bool,
    /// Expected SHA-256 of the model file
    pub sha256: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let dir = paths::model_dir("Xenova/gte-small");
        Self {
            model_name: "gte-small".to_string(),
            model_path: paths::model_file(&dir),
            tokenizer_path: paths::tokenizer_file(&dir),
            dimension: 384,
            max_length: 512,
            query_prefix: None,
            normalize: false,
            sha256: None,
        }
    }
}

impl Config {
    /// Load configuration, falling back through the standard locations
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(&paths::expand(path));
        }

        let project = paths::project_config_path();
        if project.exists() {
            return Self::from_file(&project);
        }

        if let Some(user) = paths::user_config_path() {
            if user.exists() {
                return Self::from_file(&user);
            }
        }

        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.expand_paths();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        if let Some(queries) = &self.run.queries {
            self.run.queries = Some(paths::expand(queries));
        }
        if let Some(disk) = &self.sampler.disk_path {
            self.sampler.disk_path = Some(paths::expand(disk));
        }
        self.embedding.model_path = paths::expand(&self.embedding.model_path);
        self.embedding.tokenizer_path = paths::expand(&self.embedding.tokenizer_path);
    }

    /// Reject values the harness cannot run with
    pub fn validate(&self) -> Result<()> {
        self.run.cutoffs()?;
        if self.run.search_limit == 0 {
            bail!("run.search_limit must be greater than 0");
        }
        if self.run.query_limit == Some(0) {
            bail!("run.query_limit must be greater than 0 when set");
        }
        if self.sampler.interval_secs == 0 {
            bail!("sampler.interval_secs must be greater than 0");
        }
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be greater than 0");
        }
        if let Some(max) = self.backend.max_search_limit() {
            if self.run.search_limit > max {
                bail!(
                    "run.search_limit ({}) exceeds the {} maximum of {} results per query",
                    self.run.search_limit,
                    self.backend.kind(),
                    max
                );
            }
        }
        self.backend.validate()
    }
}
