//! Transfer rate over a sliding time window, and the live view of it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::ledger::TaskId;

/// Rate estimate from checkpoint samples inside a fixed time window.
#[derive(Debug)]
pub struct SpeedMeter {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(100)),
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, bytes_done: u64) {
        self.record_at(Instant::now(), bytes_done);
    }

    pub fn record_at(&mut self, at: Instant, bytes_done: u64) {
        self.samples.push_back((at, bytes_done));
        // Keep one sample at or before the window start as the baseline.
        while self.samples.len() > 2 {
            let second = self.samples[1].0;
            if at.saturating_duration_since(second) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second; 0 until two samples span a non-zero interval.
    pub fn bytes_per_sec(&self) -> f64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let dt = t1.saturating_duration_since(t0).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        b1.saturating_sub(b0) as f64 / dt
    }

    /// Seconds remaining; None while the total is unknown or the rate is zero.
    pub fn eta_secs(&self, bytes_done: u64, total: Option<u64>) -> Option<f64> {
        let remaining = total?.saturating_sub(bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }
}

/// Most recent rate of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveRate {
    pub speed: f64,
    pub eta_secs: Option<f64>,
}

/// Shared map of running task -> latest rate, read by `list`.
#[derive(Clone, Default)]
pub struct LiveStats {
    inner: Arc<RwLock<HashMap<TaskId, LiveRate>>>,
}

impl LiveStats {
    pub fn set(&self, id: TaskId, rate: LiveRate) {
        self.inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, rate);
    }

    pub fn remove(&self, id: TaskId) {
        self.inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
    }

    pub fn get(&self, id: TaskId) -> Option<LiveRate> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .copied()
    }
}
