//! Raw resource counters and the values derived from them

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of resource snapshots for one process or container
///
/// Runs on the sampler thread, so implementations must be `Send`.
pub trait SnapshotSource: Send {
    /// Human-readable target, e.g. `container milvus-standalone`
    fn describe(&self) -> String;

    /// Read one snapshot of raw counters
    fn snapshot(&mut self) -> Result<ResourceSnapshot>;
}

/// Raw counters as reported by the runtime; no percentages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub cpu_usage_total: u64,
    pub cpu_usage_previous: u64,
    pub system_cpu_total: u64,
    pub system_cpu_previous: u64,
    pub core_count: u32,
    pub memory_usage_bytes: u64,
    pub disk_used_bytes: Option<u64>,
}

impl ResourceSnapshot {
    /// `(cpu_delta / system_delta) * cores * 100`; 0 when the system counter did not advance
    pub fn cpu_percent(&self) -> f64 {
        let system_delta = self.system_cpu_total.saturating_sub(self.system_cpu_previous);
        if system_delta == 0 {
            return 0.0;
        }
        let cpu_delta = self.cpu_usage_total.saturating_sub(self.cpu_usage_previous);
        (cpu_delta as f64 / system_delta as f64) * self.core_count as f64 * 100.0
    }

    pub fn memory_mb(&self) -> f64 {
        self.memory_usage_bytes as f64 / BYTES_PER_MB
    }

    pub fn disk_gb(&self) -> Option<f64> {
        self.disk_used_bytes.map(|bytes| bytes as f64 / BYTES_PER_GB)
    }
}

/// One timestamped sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub disk_gb: Option<f64>,
}

impl MetricSample {
    pub fn from_snapshot(timestamp: DateTime<Utc>, snapshot: &ResourceSnapshot) -> Self {
        Self {
            timestamp,
            cpu_percent: snapshot.cpu_percent(),
            memory_mb: snapshot.memory_mb(),
            disk_gb: snapshot.disk_gb(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cpu_percent_zero_system_delta() {
        let snapshot = ResourceSnapshot {
            cpu_usage_total: 500,
            cpu_usage_previous: 100,
            system_cpu_total: 1000,
            system_cpu_previous: 1000,
            core_count: 8,
            ..Default::default()
        };
        assert_eq!(snapshot.cpu_percent(), 0.0);
    }

    #[test]
    fn test_cpu_percent_scales_by_cores() {
        let snapshot = ResourceSnapshot {
            cpu_usage_total: 250,
            cpu_usage_previous: 150,
            system_cpu_total: 2000,
            system_cpu_previous: 1000,
            core_count: 4,
            ..Default::default()
        };
        // 100 / 1000 * 4 * 100
        assert_relative_eq!(snapshot.cpu_percent(), 40.0);
    }

    #[test]
    fn test_counter_reset_does_not_underflow() {
        let snapshot = ResourceSnapshot {
            cpu_usage_total: 10,
            cpu_usage_previous: 500,
            system_cpu_total: 100,
            system_cpu_previous: 900,
            core_count: 2,
            ..Default::default()
        };
        assert_eq!(snapshot.cpu_percent(), 0.0);
    }

    #[test]
    fn test_unit_conversions() {
        let snapshot = ResourceSnapshot {
            memory_usage_bytes: 512 * 1024 * 1024,
            disk_used_bytes: Some(3 * 1024 * 1024 * 1024),
            ..Default::default()
        };
        assert_relative_eq!(snapshot.memory_mb(), 512.0);
        assert_relative_eq!(snapshot.disk_gb().unwrap(), 3.0);

        let sample = MetricSample::from_snapshot(Utc::now(), &snapshot);
        assert_relative_eq!(sample.memory_mb, 512.0);
        assert_eq!(sample.cpu_percent, 0.0);
    }
}
