use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::probe::results::ProbeResult;

/// Run totals for one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeStats {
    pub total_probes: usize,
    pub success_probes: usize,
    pub failed_probes: usize,
    #[serde(with = "duration_ms")]
    pub avg_duration: Duration,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    /// Successful probes per protocol.
    pub protocol_counts: BTreeMap<String, usize>,
}

impl ProbeStats {
    pub fn record(&mut self, result: &ProbeResult) {
        self.total_probes += 1;
        if result.success {
            self.success_probes += 1;
            *self.protocol_counts.entry(result.protocol.clone()).or_insert(0) += 1;
        } else {
            self.failed_probes += 1;
        }

        self.total_duration += result.duration;
        let avg_nanos = self.total_duration.as_nanos() / self.total_probes as u128;
        self.avg_duration = Duration::from_nanos(u64::try_from(avg_nanos).unwrap_or(u64::MAX));
    }

    /// Percentage of probes that got a response, 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_probes == 0 {
            return 0.0;
        }
        self.success_probes as f64 / self.total_probes as f64 * 100.0
    }
}

/// Mutex-guarded accumulator shared by every probing task of an engine.
#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: Mutex<ProbeStats>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: &ProbeResult) {
        let mut stats = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        stats.record(result);
    }

    pub fn snapshot(&self) -> ProbeStats {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Live and peak count of exchanges holding a concurrency slot.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a> {
    gauge: &'a InFlightGauge,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
