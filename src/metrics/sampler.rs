//! Background resource sampler
//!
//! One sampler per run. The sampler thread appends to buffers owned by the
//! `MetricSampler` handle; the handle stops the thread, waits a bounded time
//! for it, closes the buffers and reconciles them into a `MetricSeries`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::snapshot::{MetricSample, SnapshotSource};

/// Parallel sample buffers sharing one index space
#[derive(Debug, Default)]
pub struct MetricBuffers {
    timestamps: Vec<DateTime<Utc>>,
    cpu_percent: Vec<f64>,
    memory_mb: Vec<f64>,
    disk_gb: Vec<f64>,
    /// Whether rows carry disk usage; fixed by the first accepted sample
    disk: Option<bool>,
    closed: bool,
}

/// Result of offering one sample to the buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Push {
    Appended,
    /// Disk presence differs from earlier rows; nothing appended
    Mismatched,
    Closed,
}

impl MetricBuffers {
    /// Build buffers from existing columns (lengths may differ)
    pub fn from_parts(
        timestamps: Vec<DateTime<Utc>>,
        cpu_percent: Vec<f64>,
        memory_mb: Vec<f64>,
        disk_gb: Vec<f64>,
    ) -> Self {
        let disk = if disk_gb.is_empty() && timestamps.is_empty() {
            None
        } else {
            Some(!disk_gb.is_empty())
        };
        Self {
            timestamps,
            cpu_percent,
            memory_mb,
            disk_gb,
            disk,
            closed: false,
        }
    }

    /// Append all values of a sample, or nothing
    ///
    /// A sample whose disk presence differs from the first accepted one is
    /// rejected whole, so every column keeps one index space.
    fn push(&mut self, sample: MetricSample) -> Push {
        if self.closed {
            return Push::Closed;
        }
        let has_disk = sample.disk_gb.is_some();
        if *self.disk.get_or_insert(has_disk) != has_disk {
            return Push::Mismatched;
        }
        self.timestamps.push(sample.timestamp);
        self.cpu_percent.push(sample.cpu_percent);
        self.memory_mb.push(sample.memory_mb);
        if let Some(disk) = sample.disk_gb {
            self.disk_gb.push(disk);
        }
        Push::Appended
    }

    fn tracks_disk(&self) -> bool {
        self.disk == Some(true)
    }

    /// Shortest column length
    pub fn len(&self) -> usize {
        let mut len = self
            .timestamps
            .len()
            .min(self.cpu_percent.len())
            .min(self.memory_mb.len());
        if self.tracks_disk() {
            len = len.min(self.disk_gb.len());
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_consistent(&self) -> bool {
        let len = self.timestamps.len();
        self.cpu_percent.len() == len
            && self.memory_mb.len() == len
            && (!self.tracks_disk() || self.disk_gb.len() == len)
    }

    /// Truncate every column to the shortest one
    pub fn reconcile(mut self) -> MetricSeries {
        if !self.is_consistent() {
            let kept = self.len();
            tracing::warn!(
                timestamps = self.timestamps.len(),
                cpu = self.cpu_percent.len(),
                memory = self.memory_mb.len(),
                disk = self.disk_gb.len(),
                kept,
                "metric buffer lengths differ, truncating"
            );
            self.timestamps.truncate(kept);
            self.cpu_percent.truncate(kept);
            self.memory_mb.truncate(kept);
            if self.tracks_disk() {
                self.disk_gb.truncate(kept);
            }
        }

        let disk_gb = if self.tracks_disk() {
            Some(self.disk_gb)
        } else {
            None
        };

        MetricSeries {
            timestamps: self.timestamps,
            cpu_percent: self.cpu_percent,
            memory_mb: self.memory_mb,
            disk_gb,
        }
    }
}

/// Reconciled metric time series; all columns have equal length
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub cpu_percent: Vec<f64>,
    pub memory_mb: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<Vec<f64>>,
}

impl MetricSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn peak_cpu_percent(&self) -> Option<f64> {
        self.cpu_percent.iter().copied().reduce(f64::max)
    }

    pub fn peak_memory_mb(&self) -> Option<f64> {
        self.memory_mb.iter().copied().reduce(f64::max)
    }

    pub fn mean_cpu_percent(&self) -> Option<f64> {
        if self.cpu_percent.is_empty() {
            return None;
        }
        Some(self.cpu_percent.iter().sum::<f64>() / self.cpu_percent.len() as f64)
    }
}

/// Stop flag with a wakeable wait, set once
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.changed.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep up to `timeout`; returns true if stopped
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.changed.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Sampler timing
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub join_timeout: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Handle to a running sampler thread
pub struct MetricSampler {
    buffers: Arc<Mutex<MetricBuffers>>,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
    finished: mpsc::Receiver<()>,
    join_timeout: Duration,
    target: String,
}

impl MetricSampler {
    /// Spawn the sampling thread; the first snapshot is taken immediately
    pub fn start(mut source: Box<dyn SnapshotSource>, settings: SamplerSettings) -> Result<Self> {
        let buffers = Arc::new(Mutex::new(MetricBuffers::default()));
        let signal = Arc::new(StopSignal::default());
        let (finished_tx, finished) = mpsc::channel();
        let target = source.describe();

        let thread_buffers = Arc::clone(&buffers);
        let thread_signal = Arc::clone(&signal);
        let thread_target = target.clone();
        let interval = settings.interval;

        let handle = std::thread::Builder::new()
            .name("metric-sampler".to_string())
            .spawn(move || {
                loop {
                    if thread_signal.is_stopped() {
                        break;
                    }

                    let timestamp = Utc::now();
                    match source.snapshot() {
                        Ok(snapshot) => {
                            let sample = MetricSample::from_snapshot(timestamp, &snapshot);
                            match thread_buffers.lock().push(sample) {
                                Push::Appended => {}
                                Push::Mismatched => tracing::warn!(
                                    source = %thread_target,
                                    has_disk = sample.disk_gb.is_some(),
                                    "disk usage presence changed, dropping metric sample"
                                ),
                                Push::Closed => break,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                source = %thread_target,
                                error = %format!("{:#}", e),
                                "skipping metric sample"
                            );
                        }
                    }

                    if thread_signal.wait(interval) {
                        break;
                    }
                }
                let _ = finished_tx.send(());
            })
            .context("Failed to spawn metric sampler thread")?;

        tracing::info!(
            source = %target,
            interval_secs = settings.interval.as_secs_f64(),
            "metric sampler started"
        );

        Ok(Self {
            buffers,
            signal,
            handle: Some(handle),
            finished,
            join_timeout: settings.join_timeout,
            target,
        })
    }

    /// Stop sampling, wait up to the join timeout, and return the reconciled series
    ///
    /// Nothing is appended after this returns; a thread that misses the
    /// timeout is detached and its late sample is dropped.
    pub fn stop(mut self) -> MetricSeries {
        self.signal.stop();

        match self.finished.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        tracing::error!(source = %self.target, "metric sampler thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    source = %self.target,
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "metric sampler did not finish in time, detaching"
                );
                self.handle.take();
            }
        }

        let buffers = {
            let mut guard = self.buffers.lock();
            let taken = std::mem::take(&mut *guard);
            guard.closed = true;
            taken
        };

        let series = buffers.reconcile();
        tracing::info!(source = %self.target, samples = series.len(), "metric sampler stopped");
        series
    }
}

impl Drop for MetricSampler {
    fn drop(&mut self) {
        // Covers early returns and panics; after stop() this is a no-op
        self.signal.stop();
        self.buffers.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::snapshot::ResourceSnapshot;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        fail_every_other: bool,
        delay: Duration,
    }

    impl CountingSource {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                calls,
                fail_every_other: false,
                delay: Duration::ZERO,
            }
        }
    }

    impl SnapshotSource for CountingSource {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        fn snapshot(&mut self) -> Result<ResourceSnapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.fail_every_other && n % 2 == 1 {
                bail!("stats endpoint unavailable");
            }
            Ok(ResourceSnapshot {
                cpu_usage_total: 200 + n as u64,
                cpu_usage_previous: 100,
                system_cpu_total: 2000,
                system_cpu_previous: 1000,
                core_count: 2,
                memory_usage_bytes: 1024 * 1024 * (n as u64 + 1),
                disk_used_bytes: None,
            })
        }
    }

    fn fast_settings() -> SamplerSettings {
        SamplerSettings {
            interval: Duration::from_millis(5),
            join_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_reconcile_truncates_to_shortest() {
        let now = Utc::now();
        let timestamps: Vec<_> = (0..7).map(|i| now + chrono::Duration::seconds(i)).collect();
        let cpu: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let memory: Vec<f64> = (0..5).map(|i| 100.0 + i as f64).collect();

        let buffers = MetricBuffers::from_parts(timestamps.clone(), cpu.clone(), memory.clone(), vec![]);
        assert!(!buffers.is_consistent());
        assert_eq!(buffers.len(), 5);

        let series = buffers.reconcile();
        assert_eq!(series.timestamps, timestamps[..5].to_vec());
        assert_eq!(series.cpu_percent, cpu[..5].to_vec());
        assert_eq!(series.memory_mb, memory);
        assert!(series.disk_gb.is_none());
    }

    #[test]
    fn test_reconcile_includes_disk_column() {
        let now = Utc::now();
        let buffers = MetricBuffers::from_parts(
            vec![now; 4],
            vec![1.0; 4],
            vec![2.0; 4],
            vec![3.0; 3],
        );
        let series = buffers.reconcile();
        assert_eq!(series.len(), 3);
        assert_eq!(series.cpu_percent.len(), 3);
        assert_eq!(series.disk_gb.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_closed_buffers_reject_samples() {
        let mut buffers = MetricBuffers::default();
        let sample = MetricSample {
            timestamp: Utc::now(),
            cpu_percent: 1.0,
            memory_mb: 2.0,
            disk_gb: None,
        };
        assert_eq!(buffers.push(sample), Push::Appended);
        buffers.closed = true;
        assert_eq!(buffers.push(sample), Push::Closed);
        assert_eq!(buffers.len(), 1);
    }

    #[test]
    fn test_sample_without_disk_is_rejected_whole() {
        let now = Utc::now();
        let sample = |secs: i64, disk: Option<f64>| MetricSample {
            timestamp: now + chrono::Duration::seconds(secs),
            cpu_percent: secs as f64,
            memory_mb: 100.0,
            disk_gb: disk,
        };

        let mut buffers = MetricBuffers::default();
        assert_eq!(buffers.push(sample(1, Some(10.0))), Push::Appended);
        assert_eq!(buffers.push(sample(2, None)), Push::Mismatched);
        assert_eq!(buffers.push(sample(3, Some(30.0))), Push::Appended);
        assert!(buffers.is_consistent());

        let series = buffers.reconcile();
        assert_eq!(series.len(), 2);
        assert_eq!(series.cpu_percent, vec![1.0, 3.0]);
        assert_eq!(series.disk_gb, Some(vec![10.0, 30.0]));
        assert_eq!(series.timestamps[1], now + chrono::Duration::seconds(3));
    }

    #[test]
    fn test_first_sample_without_disk_fixes_layout() {
        let sample = |disk: Option<f64>| MetricSample {
            timestamp: Utc::now(),
            cpu_percent: 1.0,
            memory_mb: 2.0,
            disk_gb: disk,
        };

        let mut buffers = MetricBuffers::default();
        assert_eq!(buffers.push(sample(None)), Push::Appended);
        assert_eq!(buffers.push(sample(Some(5.0))), Push::Mismatched);
        assert_eq!(buffers.push(sample(None)), Push::Appended);

        let series = buffers.reconcile();
        assert_eq!(series.len(), 2);
        assert!(series.disk_gb.is_none());
    }

    #[test]
    fn test_sampler_collects_until_stopped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sampler =
            MetricSampler::start(Box::new(CountingSource::new(Arc::clone(&calls))), fast_settings())
                .unwrap();

        std::thread::sleep(Duration::from_millis(60));
        let series = sampler.stop();

        assert!(!series.is_empty());
        assert_eq!(series.cpu_percent.len(), series.len());
        assert_eq!(series.memory_mb.len(), series.len());
        assert!(series.timestamps.windows(2).all(|w| w[0] <= w[1]));

        let after_stop = calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_failed_snapshots_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            fail_every_other: true,
            ..CountingSource::new(Arc::clone(&calls))
        };
        let sampler = MetricSampler::start(Box::new(source), fast_settings()).unwrap();

        std::thread::sleep(Duration::from_millis(60));
        let series = sampler.stop();

        let total = calls.load(Ordering::SeqCst);
        assert!(total >= 2);
        assert_eq!(series.len(), (total + 1) / 2);
        assert_eq!(series.cpu_percent.len(), series.len());
    }

    #[test]
    fn test_stop_interrupts_long_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let settings = SamplerSettings {
            interval: Duration::from_secs(60),
            join_timeout: Duration::from_secs(5),
        };
        let sampler =
            MetricSampler::start(Box::new(CountingSource::new(Arc::clone(&calls))), settings)
                .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        let series = sampler.stop();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_slow_snapshot_is_detached_after_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            delay: Duration::from_millis(400),
            ..CountingSource::new(Arc::clone(&calls))
        };
        let settings = SamplerSettings {
            interval: Duration::from_millis(5),
            join_timeout: Duration::from_millis(50),
        };
        let sampler = MetricSampler::start(Box::new(source), settings).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        let series = sampler.stop();

        assert!(started.elapsed() < Duration::from_millis(350));
        assert!(series.is_empty());
    }

    #[test]
    fn test_series_peaks() {
        let series = MetricSeries {
            timestamps: vec![Utc::now(); 3],
            cpu_percent: vec![10.0, 55.5, 20.0],
            memory_mb: vec![300.0, 200.0, 400.0],
            disk_gb: None,
        };
        assert_eq!(series.peak_cpu_percent(), Some(55.5));
        assert_eq!(series.peak_memory_mb(), Some(400.0));
        assert_eq!(MetricSeries::default().peak_cpu_percent(), None);
    }
}
