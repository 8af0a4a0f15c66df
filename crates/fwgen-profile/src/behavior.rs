//! Optional donor behavior profiling.
//!
//! Samples config-space read latency over a bounded window. Output is purely
//! advisory: it tunes counter widths and timing defaults in the generated
//! design, and every derived value has an explicit default, so a build
//! without profiling is still fully specified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use fwgen_pci::{Bdf, SysfsReader};

use crate::error::ProfileError;

/// Upper bounds (ns) of the fixed latency buckets; the last bucket is open.
pub const LATENCY_BUCKET_BOUNDS_NS: [u64; 8] = [250, 500, 1_000, 2_000, 4_000, 8_000, 16_000, u64::MAX];

/// Pause between samples; cancellation is observed at these boundaries.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyHistogram {
    pub counts: [u64; 8],
    pub samples: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub total_ns: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            counts: [0; 8],
            samples: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            total_ns: 0,
        }
    }
}

impl LatencyHistogram {
    pub fn record(&mut self, ns: u64) {
        let bucket = LATENCY_BUCKET_BOUNDS_NS
            .iter()
            .position(|&bound| ns <= bound)
            .unwrap_or(LATENCY_BUCKET_BOUNDS_NS.len() - 1);
        self.counts[bucket] += 1;
        self.samples += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.total_ns = self.total_ns.saturating_add(ns);
    }

    pub fn mean_ns(&self) -> u64 {
        if self.samples == 0 {
            0
        } else {
            self.total_ns / self.samples
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAccess {
    pub offset: u16,
    pub read_count: u64,
    pub write_count: u64,
    pub latency: LatencyHistogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub register_accesses: Vec<RegisterAccess>,
    pub interrupt_rate_hz: Option<f64>,
    pub dma_burst_sizes: Option<Vec<u64>>,
    /// Wall-clock time actually spent sampling; shorter than requested when
    /// the run was cancelled.
    pub sample_duration_s: f32,
}

impl BehaviorProfile {
    /// All-zero profile used when no device is available for sampling.
    pub fn stub() -> Self {
        Self {
            register_accesses: Vec::new(),
            interrupt_rate_hz: None,
            dma_burst_sizes: None,
            sample_duration_s: 0.0,
        }
    }

    /// Width of the generated access counters: enough headroom for the
    /// observed rate over a ~100 s session, never below 16 bits.
    pub fn suggested_counter_width(&self) -> u32 {
        let total: u64 = self
            .register_accesses
            .iter()
            .map(|r| r.read_count + r.write_count)
            .sum();
        if total == 0 || self.sample_duration_s <= 0.0 {
            return 32;
        }
        let per_second = (total as f64 / f64::from(self.sample_duration_s)).max(1.0);
        let headroom = (per_second * 100.0).log2().ceil() as u32;
        headroom.clamp(16, 64)
    }

    /// Coarse latency class used to pick completion-timer defaults.
    pub fn timing_class(&self) -> &'static str {
        let mean = self
            .register_accesses
            .iter()
            .map(|r| r.latency.mean_ns())
            .max()
            .unwrap_or(0);
        match mean {
            0 => "default",
            ns if ns <= 1_000 => "fast",
            ns if ns <= 8_000 => "typical",
            _ => "slow",
        }
    }
}

/// Cooperative cancellation shared between the CLI and the sampling loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Samples config-space reads of one donor function.
pub struct BehaviorProfiler<'a> {
    reader: &'a SysfsReader,
    bdf: Bdf,
}

impl<'a> BehaviorProfiler<'a> {
    pub fn new(reader: &'a SysfsReader, bdf: Bdf) -> Self {
        Self { reader, bdf }
    }

    /// Samples for up to `duration_s` seconds. Cancellation aborts at the
    /// next sample boundary and returns the partial results collected so far.
    pub fn run(&self, duration_s: f32, cancel: &CancelToken) -> Result<BehaviorProfile, ProfileError> {
        if duration_s <= 0.0 {
            return Ok(BehaviorProfile::stub());
        }

        let deadline = Duration::from_secs_f32(duration_s);
        let started = Instant::now();
        let mut header_access = RegisterAccess {
            offset: 0x00,
            read_count: 0,
            write_count: 0,
            latency: LatencyHistogram::default(),
        };

        while started.elapsed() < deadline && !cancel.is_cancelled() {
            let read_started = Instant::now();
            self.reader.read_config(self.bdf)?;
            let elapsed_ns = read_started.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
            header_access.read_count += 1;
            header_access.latency.record(elapsed_ns);
            std::thread::sleep(SAMPLE_INTERVAL);
        }

        let sampled = started.elapsed().as_secs_f32().min(duration_s);
        tracing::debug!(
            bdf = %self.bdf,
            samples = header_access.read_count,
            cancelled = cancel.is_cancelled(),
            "behavior profiling finished"
        );
        Ok(BehaviorProfile {
            register_accesses: vec![header_access],
            interrupt_rate_hz: None,
            dma_burst_sizes: None,
            sample_duration_s: sampled,
        })
    }
}
