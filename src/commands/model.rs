//! Model command - fetch and verify the embedding model files

use anyhow::{bail, Result};
use std::path::PathBuf;

use vecbench::config::Config;
use vecbench::models::{self, MODEL_FILES};

/// Model CLI subcommands
#[derive(Debug, Clone, clap::Subcommand)]
pub enum ModelCommands {
    /// Download the ONNX export and tokenizer from HuggingFace
    Fetch {
        /// Hub repository
        #[arg(long, default_value = models::DEFAULT_REPO)]
        repo: String,

        /// Branch, tag or commit
        #[arg(long, default_value = models::DEFAULT_REVISION)]
        revision: String,

        /// Target directory (default: models/<repo name>)
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Hash the configured model file and compare it with the pinned sha256
    Verify,
}

/// Execute model command
pub fn execute(command: ModelCommands, config: Option<PathBuf>) -> Result<()> {
    match command {
        ModelCommands::Fetch {
            repo,
            revision,
            dest,
        } => fetch(&repo, &revision, dest),
        ModelCommands::Verify => verify(config),
    }
}

fn fetch(repo: &str, revision: &str, dest: Option<PathBuf>) -> Result<()> {
    let dir = models::target_dir(repo, dest.as_deref());
    println!("📦 Fetching {}@{} into {}", repo, revision, dir.display());

    let mut hashes = Vec::with_capacity(MODEL_FILES.len());
    for (remote, local) in MODEL_FILES {
        let url = models::hub_url(repo, revision, remote);
        let hash = models::download_and_verify(&url, &dir.join(local), None)?;
        hashes.push((local, hash));
    }

    println!();
    for (local, hash) in &hashes {
        println!("   {:<16} {}", local, hash);
    }
    if let Some((_, model_hash)) = hashes.iter().find(|(local, _)| *local == "model.onnx") {
        println!();
        println!("   Pin it in vecbench.toml:");
        println!("   [embedding]");
        println!("   sha256 = \"{}\"", model_hash);
    }
    Ok(())
}

fn verify(config: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config.as_deref())?;
    let path = &config.embedding.model_path;
    if !path.exists() {
        bail!(
            "Model file not found at {} (run: vecbench model fetch)",
            path.display()
        );
    }

    match &config.embedding.sha256 {
        Some(expected) => {
            models::verify_sha256(path, expected)?;
            println!("✓ {} matches pinned sha256", path.display());
        }
        None => {
            let hash = models::sha256_file(path)?;
            println!("{}  {}", hash, path.display());
            println!("   (no embedding.sha256 pinned)");
        }
    }
    Ok(())
}
