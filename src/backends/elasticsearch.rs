//! Elasticsearch approximate kNN search (`POST /{index}/_search` with `knn`)

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{base_url, http_client, id_to_string, SearchBackend, SearchHit};

/// Upper bound Elasticsearch accepts for `num_candidates`
pub(crate) const MAX_NUM_CANDIDATES: usize = 10_000;

/// `[backend]` fields for `kind = "elasticsearch"`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub index: String,
    pub vector_field: String,
    /// Candidates per shard; defaults to the search limit
    pub num_candidates: Option<usize>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "articles".to_string(),
            vector_field: "vector".to_string(),
            num_candidates: None,
            username: None,
            password: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

pub struct ElasticsearchBackend {
    config: ElasticsearchConfig,
    base_url: String,
    http: HttpClient,
}

impl ElasticsearchBackend {
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let http = http_client(config.timeout_secs)?;
        Ok(Self {
            base_url: base_url(&config.url),
            config,
            http,
        })
    }

    fn num_candidates(&self, limit: usize) -> usize {
        self.config
            .num_candidates
            .unwrap_or(limit)
            .max(limit)
            .min(MAX_NUM_CANDIDATES)
    }

    fn search_body(&self, vector: &[f32], limit: usize) -> Value {
        json!({
            "knn": {
                "field": self.config.vector_field,
                "query_vector": vector,
                "k": limit,
                "num_candidates": self.num_candidates(limit)
            },
            "size": limit,
            "_source": false
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", key))
        } else if let Some(user) = &self.config.username {
            request.basic_auth(user, self.config.password.as_deref())
        } else {
            request
        }
    }
}

fn parse_hits(payload: &Value) -> Result<Vec<SearchHit>> {
    let hits = payload
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .context("Elasticsearch response has no hits.hits array")?;

    hits.iter()
        .map(|hit| {
            let id = hit
                .get("_id")
                .and_then(id_to_string)
                .with_context(|| format!("Elasticsearch hit without _id: {}", hit))?;
            let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            Ok(SearchHit { id, score })
        })
        .collect()
}

impl SearchBackend for ElasticsearchBackend {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/{}/_search", self.base_url, self.config.index);
        let response = self
            .authorize(self.http.post(&url).json(&self.search_body(vector, limit)))
            .send()
            .with_context(|| format!("Failed to connect to Elasticsearch at {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("Elasticsearch search failed ({}): {}", status, body);
        }

        let payload: Value = response
            .json()
            .context("Failed to parse Elasticsearch search response")?;
        parse_hits(&payload)
    }

    fn ping(&self) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.config.index);
        let response = self
            .authorize(self.http.head(&url))
            .send()
            .with_context(|| format!("Failed to connect to Elasticsearch at {}", self.base_url))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => bail!(
                "Elasticsearch index '{}' does not exist at {}",
                self.config.index,
                self.base_url
            ),
            s => bail!("Elasticsearch index check failed ({})", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body() {
        let backend = ElasticsearchBackend::new(ElasticsearchConfig::default()).unwrap();
        let body = backend.search_body(&[0.25, 0.75], 1000);

        assert_eq!(body["knn"]["field"], "vector");
        assert_eq!(body["knn"]["k"], 1000);
        assert_eq!(body["knn"]["num_candidates"], 1000);
        assert_eq!(body["knn"]["query_vector"], json!([0.25, 0.75]));
        assert_eq!(body["size"], 1000);
        assert_eq!(body["_source"], false);
    }

    #[test]
    fn test_num_candidates_bounds() {
        let backend = ElasticsearchBackend::new(ElasticsearchConfig {
            num_candidates: Some(50),
            ..Default::default()
        })
        .unwrap();
        // Never fewer than k
        assert_eq!(backend.num_candidates(100), 100);

        let backend = ElasticsearchBackend::new(ElasticsearchConfig {
            num_candidates: Some(50_000),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(backend.num_candidates(100), MAX_NUM_CANDIDATES);
    }

    #[test]
    fn test_parse_hits() {
        let payload = json!({
            "took": 12,
            "hits": {
                "total": {"value": 2, "relation": "eq"},
                "hits": [
                    {"_index": "articles", "_id": "38021356", "_score": 0.93},
                    {"_index": "articles", "_id": "1234", "_score": 0.71}
                ]
            }
        });
        let hits = parse_hits(&payload).unwrap();
        assert_eq!(
            hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            vec!["38021356", "1234"]
        );
    }

    #[test]
    fn test_parse_error_payload() {
        let payload = json!({"error": {"type": "index_not_found_exception"}, "status": 404});
        assert!(parse_hits(&payload).is_err());
    }
}
