//! Weaviate GraphQL `nearVector` search

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{base_url, http_client, id_to_string, SearchBackend, SearchHit};

/// `[backend]` fields for `kind = "weaviate"`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WeaviateConfig {
    pub url: String,
    pub class: String,
    /// Property holding the document id (object UUIDs are not the corpus ids)
    pub id_property: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WeaviateConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            class: "Article".to_string(),
            id_property: "article_id".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

pub struct WeaviateBackend {
    config: WeaviateConfig,
    base_url: String,
    http: HttpClient,
}

impl WeaviateBackend {
    pub fn new(config: WeaviateConfig) -> Result<Self> {
        let http = http_client(config.timeout_secs)?;
        Ok(Self {
            base_url: base_url(&config.url),
            config,
            http,
        })
    }

    fn graphql_query(&self, vector: &[f32], limit: usize) -> String {
        let vector = vector
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{{ Get {{ {class}(nearVector: {{vector: [{vector}]}}, limit: {limit}) {{ {id} _additional {{ distance }} }} }} }}",
            class = self.config.class,
            vector = vector,
            limit = limit,
            id = self.config.id_property,
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn parse_hits(&self, payload: &Value) -> Result<Vec<SearchHit>> {
        // GraphQL reports failures with HTTP 200 and an `errors` list
        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect();
                bail!("Weaviate query failed: {}", messages.join("; "));
            }
        }

        let objects = match payload
            .get("data")
            .and_then(|d| d.get("Get"))
            .and_then(|g| g.get(&self.config.class))
        {
            Some(Value::Array(objects)) => objects,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(other) => bail!("unexpected Weaviate result: {}", other),
        };

        objects
            .iter()
            .map(|object| {
                let id = object
                    .get(&self.config.id_property)
                    .and_then(id_to_string)
                    .with_context(|| {
                        format!(
                            "Weaviate object without '{}': {}",
                            self.config.id_property, object
                        )
                    })?;
                let distance = object
                    .pointer("/_additional/distance")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                Ok(SearchHit {
                    id,
                    score: (1.0 - distance) as f32,
                })
            })
            .collect()
    }
}

impl SearchBackend for WeaviateBackend {
    fn name(&self) -> &str {
        "weaviate"
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/v1/graphql", self.base_url);
        let body = json!({ "query": self.graphql_query(vector, limit) });
        let response = self
            .authorize(self.http.post(&url).json(&body))
            .send()
            .with_context(|| format!("Failed to connect to Weaviate at {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("Weaviate search failed ({}): {}", status, body);
        }

        let payload: Value = response
            .json()
            .context("Failed to parse Weaviate GraphQL response")?;
        self.parse_hits(&payload)
    }

    fn ping(&self) -> Result<()> {
        let url = format!("{}/v1/schema/{}", self.base_url, self.config.class);
        let response = self
            .authorize(self.http.get(&url))
            .send()
            .with_context(|| format!("Failed to connect to Weaviate at {}", self.base_url))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => bail!(
                "Weaviate class '{}' does not exist at {}",
                self.config.class,
                self.base_url
            ),
            s => bail!("Weaviate schema check failed ({})", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> WeaviateBackend {
        WeaviateBackend::new(WeaviateConfig::default()).unwrap()
    }

    #[test]
    fn test_graphql_query() {
        let query = backend().graphql_query(&[0.5, -0.25], 1000);
        assert_eq!(
            query,
            "{ Get { Article(nearVector: {vector: [0.5,-0.25]}, limit: 1000) { article_id _additional { distance } } } }"
        );
    }

    #[test]
    fn test_parse_hits() {
        let payload = json!({
            "data": {"Get": {"Article": [
                {"article_id": "111", "_additional": {"distance": 0.1}},
                {"article_id": 222, "_additional": {"distance": 0.4}}
            ]}}
        });
        let hits = backend().parse_hits(&payload).unwrap();
        assert_eq!(hits[0].id, "111");
        assert_eq!(hits[1].id, "222");
        assert!((hits[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_graphql_errors_reported() {
        let payload = json!({
            "data": {"Get": {"Article": null}},
            "errors": [{"message": "Cannot query field \"Article\" on type \"GetObjectsObj\"."}]
        });
        let err = backend().parse_hits(&payload).unwrap_err();
        assert!(err.to_string().contains("Cannot query field"));
    }

    #[test]
    fn test_missing_id_property() {
        let payload = json!({"data": {"Get": {"Article": [{"_additional": {"distance": 0.1}}]}}});
        assert!(backend().parse_hits(&payload).is_err());
    }
}
