//! Download infrastructure for models.
//!
//! - reqwest for HTTP
//! - sha2 for verification

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

/// Compute the lowercase hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect())
}

/// Download a file from URL to destination path.
///
/// Writes to `<dest>.part` and renames on success.
pub fn download_file(url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()?;

    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to GET {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("HTTP {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    let partial = dest.with_extension("part");
    let mut file = File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut downloaded: u64 = 0;

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = response.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;

        if let Some(total) = total_size {
            print!(
                "\r  {}/{} MB",
                downloaded / (1024 * 1024),
                total / (1024 * 1024)
            );
        } else {
            print!("\r  {} MB", downloaded / (1024 * 1024));
        }
        std::io::stdout().flush().ok();
    }
    println!();

    file.flush()?;
    drop(file);
    fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move download into {}", dest.display()))?;

    Ok(downloaded)
}

/// Download and verify a file. Returns computed SHA256.
pub fn download_and_verify(
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> Result<String> {
    println!("  {}", url);
    download_file(url, dest)?;

    print!("  Verifying...");
    std::io::stdout().flush().ok();

    let hash = sha256_file(dest)?;

    if let Some(expected) = expected_sha256 {
        if hash != expected.to_lowercase() {
            fs::remove_file(dest).ok();
            anyhow::bail!(
                "Checksum mismatch!\n  Expected: {}\n  Got: {}",
                expected,
                hash
            );
        }
        println!(" ✓");
    } else {
        println!(" {}", &hash[..12]);
    }

    Ok(hash)
}
