//! Milvus via the RESTful API v2 (`/v2/vectordb/...`)

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{base_url, http_client, id_to_string, SearchBackend, SearchHit};

/// `[backend]` fields for `kind = "milvus"`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MilvusConfig {
    pub url: String,
    pub database: Option<String>,
    pub collection: String,
    pub vector_field: String,
    /// Must match the metric the index was built with
    pub metric: String,
    pub nprobe: u32,
    /// `user:password` or an API key, sent as a bearer token
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:19530".to_string(),
            database: None,
            collection: "articles".to_string(),
            vector_field: "embedding".to_string(),
            metric: "IP".to_string(),
            nprobe: 16,
            token: None,
            timeout_secs: 30,
        }
    }
}

pub struct MilvusBackend {
    config: MilvusConfig,
    base_url: String,
    http: HttpClient,
}

impl MilvusBackend {
    pub fn new(config: MilvusConfig) -> Result<Self> {
        let http = http_client(config.timeout_secs)?;
        Ok(Self {
            base_url: base_url(&config.url),
            config,
            http,
        })
    }

    fn search_body(&self, vector: &[f32], limit: usize) -> Value {
        let mut body = json!({
            "collectionName": self.config.collection,
            "data": [vector],
            "annsField": self.config.vector_field,
            "limit": limit,
            "searchParams": {
                "metricType": self.config.metric,
                "params": { "nprobe": self.config.nprobe }
            }
        });
        if let Some(db) = &self.config.database {
            body["dbName"] = json!(db);
        }
        body
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .with_context(|| format!("Failed to connect to Milvus at {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("Milvus request {} failed ({}): {}", path, status, body);
        }

        let payload: Value = response
            .json()
            .with_context(|| format!("Failed to parse Milvus response from {}", path))?;
        check_code(&payload)?;
        Ok(payload)
    }
}

/// Milvus reports errors in-band with HTTP 200 and a non-zero `code`
fn check_code(payload: &Value) -> Result<()> {
    let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("Milvus error {}: {}", code, message);
    }
    Ok(())
}

fn parse_hits(payload: &Value) -> Result<Vec<SearchHit>> {
    let data = match payload.get("data") {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(other) => bail!("unexpected Milvus search data: {}", other),
    };

    data.iter()
        .map(|item| {
            let id = item
                .get("id")
                .and_then(id_to_string)
                .with_context(|| format!("Milvus hit without id: {}", item))?;
            let score = item.get("distance").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            Ok(SearchHit { id, score })
        })
        .collect()
}

impl SearchBackend for MilvusBackend {
    fn name(&self) -> &str {
        "milvus"
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let payload = self.post("/v2/vectordb/entities/search", &self.search_body(vector, limit))?;
        parse_hits(&payload)
    }

    fn ping(&self) -> Result<()> {
        let mut body = json!({ "collectionName": self.config.collection });
        if let Some(db) = &self.config.database {
            body["dbName"] = json!(db);
        }
        let payload = self.post("/v2/vectordb/collections/has", &body)?;
        let exists = payload
            .pointer("/data/has")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !exists {
            bail!(
                "Milvus collection '{}' does not exist at {}",
                self.config.collection,
                self.base_url
            );
        }
        Ok(())
    }
}
