//! Vector-search backends
//!
//! Each backend is a thin blocking HTTP client that answers one question:
//! "the `limit` nearest documents to this vector, best first". Index creation
//! and data loading happen elsewhere.

mod elasticsearch;
mod milvus;
mod weaviate;

pub use elasticsearch::{ElasticsearchBackend, ElasticsearchConfig};
pub use milvus::{MilvusBackend, MilvusConfig};
pub use weaviate::{WeaviateBackend, WeaviateConfig};

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// One candidate returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// A vector index that can be queried by nearest-neighbour search
pub trait SearchBackend {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// Up to `limit` hits, best match first
    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;

    /// Check that the target collection/index exists before a run
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// `[backend]` section, tagged by `kind`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Milvus(MilvusConfig),
    Elasticsearch(ElasticsearchConfig),
    Weaviate(WeaviateConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Milvus(MilvusConfig::default())
    }
}

impl BackendConfig {
    pub fn kind(&self) -> &str {
        match self {
            Self::Milvus(_) => "milvus",
            Self::Elasticsearch(_) => "elasticsearch",
            Self::Weaviate(_) => "weaviate",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Milvus(c) => &c.url,
            Self::Elasticsearch(c) => &c.url,
            Self::Weaviate(c) => &c.url,
        }
    }

    /// Largest `k` the backend accepts per query, when it has one
    pub fn max_search_limit(&self) -> Option<usize> {
        match self {
            Self::Elasticsearch(_) => Some(elasticsearch::MAX_NUM_CANDIDATES),
            Self::Milvus(_) | Self::Weaviate(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = base_url(self.url());
        reqwest::Url::parse(&url)
            .with_context(|| format!("invalid {} url '{}'", self.kind(), self.url()))?;

        match self {
            Self::Milvus(c) => {
                if c.collection.is_empty() || c.vector_field.is_empty() {
                    bail!("milvus collection and vector_field must be set");
                }
            }
            Self::Elasticsearch(c) => {
                if c.index.is_empty() || c.vector_field.is_empty() {
                    bail!("elasticsearch index and vector_field must be set");
                }
                if c.num_candidates == Some(0) {
                    bail!("elasticsearch num_candidates must be greater than 0");
                }
            }
            Self::Weaviate(c) => {
                if c.class.is_empty() || c.id_property.is_empty() {
                    bail!("weaviate class and id_property must be set");
                }
            }
        }
        Ok(())
    }
}

/// Build the configured backend client
pub fn connect(config: &BackendConfig) -> Result<Box<dyn SearchBackend>> {
    config.validate()?;
    Ok(match config {
        BackendConfig::Milvus(c) => Box::new(MilvusBackend::new(c.clone())?),
        BackendConfig::Elasticsearch(c) => Box::new(ElasticsearchBackend::new(c.clone())?),
        BackendConfig::Weaviate(c) => Box::new(WeaviateBackend::new(c.clone())?),
    })
}

/// Normalise `host:port` or a full URL to a base URL without trailing slash
pub(crate) fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to create HTTP client")
}

/// Document ids may come back as strings or integers; compare as strings
pub(crate) fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
