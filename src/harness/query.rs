//! Benchmark queries and their ground truth
//!
//! Accepted layouts:
//! - query set object: `{ "name": "...", "queries": [ ... ] }`
//! - bare JSON array of query records
//! - JSON Lines (`.jsonl`), one record per line
//!
//! Record fields are forgiving so exported dataset rows load unchanged:
//! text from `query` / `question` / `text`, ground truth from
//! `relevant_docs` / `relevant_passage_ids`. Relevant ids may be strings,
//! numbers, or a string holding a list literal such as `"[123, 456]"`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// A single benchmark query with ground truth
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    /// Relevant document ids, deduplicated, first-seen order
    pub relevant: Vec<String>,
}

impl Query {
    pub fn new(id: impl Into<String>, text: impl Into<String>, relevant: &[&str]) -> Self {
        let mut seen = HashSet::new();
        let relevant = relevant
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|id| id.to_string())
            .collect();
        Self {
            id: id.into(),
            text: text.into(),
            relevant,
        }
    }

    pub fn is_relevant(&self, doc_id: &str) -> bool {
        self.relevant.iter().any(|r| r == doc_id)
    }
}

/// Query set for benchmarking
#[derive(Debug, Clone, Serialize)]
pub struct QuerySet {
    pub name: String,
    pub queries: Vec<Query>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuerySet {
    Named {
        #[serde(default)]
        name: Option<String>,
        queries: Vec<RawQuery>,
    },
    Bare(Vec<RawQuery>),
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    #[serde(default)]
    id: Option<Value>,
    #[serde(alias = "question", alias = "text")]
    query: String,
    #[serde(default, alias = "relevant_passage_ids", alias = "relevant")]
    relevant_docs: Option<Value>,
}

impl QuerySet {
    /// Load a query set from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query set: {}", path.display()))?;

        let is_jsonl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));

        let (name, raw) = if is_jsonl {
            (None, parse_jsonl(&content)?)
        } else {
            match serde_json::from_str::<RawQuerySet>(&content)
                .with_context(|| format!("Failed to parse query set: {}", path.display()))?
            {
                RawQuerySet::Named { name, queries } => (name, queries),
                RawQuerySet::Bare(queries) => (None, queries),
            }
        };

        let name = name.unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| "queries".to_string())
        });

        Self::from_raw(name, raw).with_context(|| format!("Malformed query set: {}", path.display()))
    }

    fn from_raw(name: String, raw: Vec<RawQuery>) -> Result<Self> {
        if raw.is_empty() {
            bail!("query set contains no queries");
        }

        let mut seen_ids = HashSet::new();
        let mut queries = Vec::with_capacity(raw.len());

        for (index, record) in raw.into_iter().enumerate() {
            let id = match record.id {
                Some(value) => scalar_to_id(&value)
                    .with_context(|| format!("record {}: invalid id", index + 1))?,
                None => (index + 1).to_string(),
            };
            if !seen_ids.insert(id.clone()) {
                bail!("duplicate query id '{}'", id);
            }

            let relevant = match record.relevant_docs {
                Some(value) => parse_relevant_ids(&value)
                    .with_context(|| format!("query '{}': invalid relevant ids", id))?,
                None => Vec::new(),
            };
            let refs: Vec<&str> = relevant.iter().map(String::as_str).collect();

            queries.push(Query::new(id, record.query, &refs));
        }

        Ok(Self { name, queries })
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Keep only the first `limit` queries
    pub fn truncate(&mut self, limit: usize) {
        self.queries.truncate(limit);
    }
}

fn parse_jsonl(content: &str) -> Result<Vec<RawQuery>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: invalid record", number + 1))
        })
        .collect()
}

/// Normalise a ground-truth id list to strings
///
/// Ids are compared as strings, so `123` and `"123"` are the same document.
pub fn parse_relevant_ids(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(scalar_to_id).collect(),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.starts_with('[') {
                // List literal; single quotes are accepted for exported python reprs
                let json = trimmed.replace('\'', "\"");
                let parsed: Value = serde_json::from_str(&json)
                    .with_context(|| format!("invalid list literal: {}", trimmed))?;
                parse_relevant_ids(&parsed)
            } else if trimmed.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![trimmed.to_string()])
            }
        }
        other => Ok(vec![scalar_to_id(other)?]),
    }
}

fn scalar_to_id(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => bail!("expected string or number id, got {}", other),
    }
}
