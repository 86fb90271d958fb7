//! Filesystem layout for vecbench.
//!
//! Defines WHERE things live. No I/O, no validation.
//!
//! ```text
//! project/
//! ├── vecbench.toml            # Project config (preferred)
//! └── models/<name>/           # Fetched embedding models
//!     ├── model.onnx
//!     └── tokenizer.json
//!
//! <config_dir>/vecbench/
//! └── config.toml              # User config (fallback)
//! ```

use std::path::{Path, PathBuf};

/// Project config file name, looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "vecbench.toml";

/// Project config: `./vecbench.toml`
pub fn project_config_path() -> PathBuf {
    PathBuf::from(PROJECT_CONFIG_FILE)
}

/// User config: `<config_dir>/vecbench/config.toml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vecbench").join("config.toml"))
}

/// Directory holding fetched models: `./models/`
pub fn models_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Directory for one model, named after the last path segment of its repo.
///
/// `Xenova/gte-small` → `models/gte-small`
pub fn model_dir(repo: &str) -> PathBuf {
    let name = repo.rsplit('/').next().unwrap_or(repo);
    models_dir().join(name)
}

pub fn model_file(dir: &Path) -> PathBuf {
    dir.join("model.onnx")
}

pub fn tokenizer_file(dir: &Path) -> PathBuf {
    dir.join("tokenizer.json")
}

/// Expand `~` in a user-supplied path.
pub fn expand(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
        None => path.to_path_buf(),
    }
}
