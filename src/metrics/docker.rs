//! Docker Engine stats as a snapshot source
//!
//! `GET /containers/{name}/stats?stream=false` returns the current and the
//! previous CPU counters in one document, so a single request yields a
//! CPU delta.
//!
//! Transport:
//! - `unix:///path/to/docker.sock` - HTTP/1.0 over a Unix domain socket,
//!   response parsed with httparse (one request per connection, no chunking)
//! - `tcp://host:port` or `http(s)://...` - reqwest blocking client

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use super::disk;
use super::snapshot::{ResourceSnapshot, SnapshotSource};

/// Maximum response header section size (32 KiB)
const MAX_HEADER_SIZE: usize = 32 * 1024;

/// Maximum response body size (4 MiB)
const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Where the Docker Engine API listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Unix(PathBuf),
    Http(String),
}

impl DockerEndpoint {
    /// Parse a `DOCKER_HOST`-style address
    pub fn parse(host: &str) -> Result<Self> {
        let host = host.trim();
        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                bail!("empty unix socket path in docker host '{}'", host);
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = host.strip_prefix("tcp://") {
            return Ok(Self::Http(format!("http://{}", addr.trim_end_matches('/'))));
        }
        if host.starts_with("http://") || host.starts_with("https://") {
            return Ok(Self::Http(host.trim_end_matches('/').to_string()));
        }
        if host.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(host)));
        }
        bail!(
            "unsupported docker host '{}' (expected unix://, tcp://, http:// or https://)",
            host
        )
    }
}

/// Subset of the Docker stats document the sampler needs
#[derive(Debug, Deserialize)]
pub struct DockerStats {
    pub cpu_stats: CpuStats,
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    /// Absent on cgroup v2 hosts
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
}

impl DockerStats {
    /// Cores: per-CPU list length, then `online_cpus`, then 1
    pub fn core_count(&self) -> u32 {
        self.cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(|per_cpu| per_cpu.len() as u32)
            .filter(|&n| n > 0)
            .or(self.cpu_stats.online_cpus.filter(|&n| n > 0))
            .unwrap_or(1)
    }

    pub fn to_snapshot(&self, disk_used_bytes: Option<u64>) -> Result<ResourceSnapshot> {
        let memory_usage_bytes = self
            .memory_stats
            .usage
            .ok_or_else(|| anyhow!("stats document has no memory usage (container stopped?)"))?;

        Ok(ResourceSnapshot {
            cpu_usage_total: self.cpu_stats.cpu_usage.total_usage,
            cpu_usage_previous: self.precpu_stats.cpu_usage.total_usage,
            system_cpu_total: self.cpu_stats.system_cpu_usage.unwrap_or(0),
            system_cpu_previous: self.precpu_stats.system_cpu_usage.unwrap_or(0),
            core_count: self.core_count(),
            memory_usage_bytes,
            disk_used_bytes,
        })
    }
}

/// Snapshot source reading one container's stats
pub struct DockerStatsSource {
    endpoint: DockerEndpoint,
    container: String,
    disk_path: Option<PathBuf>,
    timeout: Duration,
    http: Option<reqwest::blocking::Client>,
}

impl DockerStatsSource {
    pub fn new(
        endpoint: DockerEndpoint,
        container: impl Into<String>,
        disk_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = match endpoint {
            DockerEndpoint::Http(_) => Some(
                reqwest::blocking::Client::builder()
                    .timeout(timeout)
                    .build()
                    .context("Failed to create HTTP client for Docker")?,
            ),
            DockerEndpoint::Unix(_) => None,
        };

        Ok(Self {
            endpoint,
            container: container.into(),
            disk_path,
            timeout,
            http,
        })
    }

    fn stats_path(&self) -> String {
        format!("/containers/{}/stats?stream=false", self.container)
    }

    /// Fetch and decode the raw stats document
    pub fn fetch_stats(&self) -> Result<DockerStats> {
        let body = match &self.endpoint {
            DockerEndpoint::Unix(socket) => {
                let (status, body) = unix_get(socket, &self.stats_path(), self.timeout)?;
                check_status(status, &body, &self.container)?;
                body
            }
            DockerEndpoint::Http(base) => {
                let http = self
                    .http
                    .as_ref()
                    .ok_or_else(|| anyhow!("HTTP client not initialised"))?;
                let url = format!("{}{}", base, self.stats_path());
                let response = http
                    .get(&url)
                    .send()
                    .with_context(|| format!("Failed to connect to Docker at {}", base))?;
                let status = response.status().as_u16();
                let body = response
                    .bytes()
                    .context("Failed to read Docker stats response")?
                    .to_vec();
                check_status(status, &body, &self.container)?;
                body
            }
        };

        serde_json::from_slice(&body)
            .with_context(|| format!("Failed to parse stats for container {}", self.container))
    }
}

impl SnapshotSource for DockerStatsSource {
    fn describe(&self) -> String {
        format!("container {}", self.container)
    }

    fn snapshot(&mut self) -> Result<ResourceSnapshot> {
        let stats = self.fetch_stats()?;
        let disk_used = match &self.disk_path {
            Some(path) => Some(disk::used_bytes(path)?),
            None => None,
        };
        stats.to_snapshot(disk_used)
    }
}

fn check_status(status: u16, body: &[u8], container: &str) -> Result<()> {
    match status {
        200 => Ok(()),
        404 => bail!("container '{}' not found", container),
        _ => bail!(
            "Docker stats for '{}' failed ({}): {}",
            container,
            status,
            String::from_utf8_lossy(body).trim()
        ),
    }
}

/// One GET over a Unix socket
#[cfg(unix)]
fn unix_get(socket: &std::path::Path, path: &str, timeout: Duration) -> Result<(u16, Vec<u8>)> {
    use std::os::unix::net::UnixStream;

    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("Failed to connect to Docker socket {}", socket.display()))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    // HTTP/1.0: the daemon answers with an unchunked body and closes the connection
    let request = format!("GET {} HTTP/1.0\r\nHost: docker\r\nAccept: application/json\r\n\r\n", path);
    stream
        .write_all(request.as_bytes())
        .context("Failed to write Docker request")?;

    read_response(&mut stream)
}

#[cfg(not(unix))]
fn unix_get(socket: &std::path::Path, _path: &str, _timeout: Duration) -> Result<(u16, Vec<u8>)> {
    bail!(
        "unix socket {} is not supported on this platform; set DOCKER_HOST to a tcp:// address",
        socket.display()
    )
}

/// Read a complete HTTP response (status, body) from a stream that closes after it
pub fn read_response(stream: &mut impl Read) -> Result<(u16, Vec<u8>)> {
    let mut raw = Vec::with_capacity(8192);
    stream
        .take((MAX_HEADER_SIZE + MAX_BODY_SIZE + 1) as u64)
        .read_to_end(&mut raw)
        .context("Failed to read Docker response")?;
    if raw.len() > MAX_HEADER_SIZE + MAX_BODY_SIZE {
        bail!("Docker response too large");
    }

    let mut parsed_headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut parsed_headers);

    let header_len = match response.parse(&raw) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => bail!("Incomplete HTTP response from Docker"),
        Err(e) => bail!("HTTP parse error: {}", e),
    };
    if header_len > MAX_HEADER_SIZE {
        bail!("Docker response headers too large");
    }

    let status = response
        .code
        .ok_or_else(|| anyhow!("HTTP response without status code"))?;

    let mut content_length: Option<usize> = None;
    for h in response.headers.iter() {
        if h.name.eq_ignore_ascii_case("Transfer-Encoding")
            && String::from_utf8_lossy(h.value).to_lowercase().contains("chunked")
        {
            bail!("Chunked transfer encoding not supported");
        }
        if h.name.eq_ignore_ascii_case("Content-Length") {
            content_length = String::from_utf8_lossy(h.value).trim().parse().ok();
        }
    }

    let mut body = raw.split_off(header_len);
    if let Some(len) = content_length {
        if body.len() < len {
            bail!(
                "Docker response truncated ({} of {} body bytes)",
                body.len(),
                len
            );
        }
        body.truncate(len);
    }

    Ok((status, body))
}
