//! Model files on disk
//!
//! `vecbench model fetch` pulls an ONNX export and its tokenizer from a
//! HuggingFace repository into `models/<name>/`; the embedder can pin the
//! model file by SHA-256.

mod download;

pub use download::{download_and_verify, download_file, sha256_file};

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::paths;

/// Default repository: gte-small with a ready ONNX export
pub const DEFAULT_REPO: &str = "Xenova/gte-small";

/// Default git revision on the hub
pub const DEFAULT_REVISION: &str = "main";

/// Files fetched for an embedding model: (path in repo, local file name)
pub const MODEL_FILES: [(&str, &str); 2] = [
    ("onnx/model.onnx", "model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
];

/// `resolve` URL for one file of a hub repository
pub fn hub_url(repo: &str, revision: &str, file: &str) -> String {
    format!(
        "https://huggingface.co/{}/resolve/{}/{}",
        repo.trim_matches('/'),
        revision,
        file
    )
}

/// Local directory for a repository, under `dest` or the default models dir
pub fn target_dir(repo: &str, dest: Option<&Path>) -> PathBuf {
    match dest {
        Some(dir) => paths::expand(dir),
        None => paths::model_dir(repo),
    }
}

/// Check a file against a pinned SHA-256
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual != expected.trim().to_lowercase() {
        bail!(
            "Checksum mismatch for {}\n  Expected: {}\n  Got: {}",
            path.display(),
            expected,
            actual
        );
    }
    Ok(())
}
