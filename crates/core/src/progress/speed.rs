//! Transfer speed estimation for backends that only report byte counters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Windowed bytes-per-second estimator.
///
/// Fed the cumulative byte count at each progress tick; reports the average
/// rate over the most recent window. Byte counters are cumulative within one
/// attempt, so a smaller value than the last sample means a fresh attempt
/// started and the window is reset.
#[derive(Debug)]
pub struct SpeedTracker {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the cumulative byte count and return the current estimate.
    pub fn record(&mut self, total_bytes: u64) -> Option<u64> {
        self.record_at(Instant::now(), total_bytes)
    }

    fn record_at(&mut self, now: Instant, total_bytes: u64) -> Option<u64> {
        if let Some(&(_, last)) = self.samples.back() {
            if total_bytes < last {
                self.samples.clear();
            }
        }

        self.samples.push_back((now, total_bytes));

        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > self.window && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        self.estimate()
    }

    /// Average bytes/sec over the samples in the window, when computable.
    pub fn estimate(&self) -> Option<u64> {
        let (first_t, first_b) = *self.samples.front()?;
        let (last_t, last_b) = *self.samples.back()?;

        let elapsed = last_t.duration_since(first_t).as_secs_f64();
        if elapsed <= 0.0 || last_b <= first_b {
            return None;
        }

        Some(((last_b - first_b) as f64 / elapsed) as u64)
    }

    /// Seconds remaining at the current rate, when total size is known.
    pub fn eta_secs(&self, downloaded: u64, total: u64) -> Option<u64> {
        let speed = self.estimate()?;
        if speed == 0 || total < downloaded {
            return None;
        }
        Some((total - downloaded) / speed)
    }
}
