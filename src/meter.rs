//! Received-bytes rate over a rolling window.
//!
//! Samples are kept newest-first in a bounded deque. The rate scan stops at
//! the first sample outside the window, since samples are time-ordered by
//! construction.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default number of samples kept.
pub const DEFAULT_METER_CAPACITY: usize = 500;

/// Default rate window.
pub const DEFAULT_METER_WINDOW: Duration = Duration::from_secs(1);

/// Tracks received byte counts and reports a recent bytes/second rate.
///
/// Safe to share between the I/O task and any reader.
#[derive(Debug)]
pub struct ThroughputMeter {
    samples: Mutex<VecDeque<(Instant, usize)>>,
    capacity: usize,
    window: Duration,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_METER_CAPACITY, DEFAULT_METER_WINDOW)
    }

    pub fn with_window(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            window,
        }
    }

    /// Record `bytes` received now.
    pub fn received(&self, bytes: usize) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_front((Instant::now(), bytes));
        samples.truncate(self.capacity);
    }

    /// Bytes per second over the window ending now.
    pub fn bytes_per_second(&self) -> u64 {
        let now = Instant::now();
        let in_window: u64 = {
            let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
            samples
                .iter()
                .take_while(|(at, _)| now.saturating_duration_since(*at) < self.window)
                .map(|(_, n)| *n as u64)
                .sum()
        };

        let window_ms = self.window.as_millis().max(1) as u64;
        in_window * 1000 / window_ms
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window() {
        let meter = ThroughputMeter::new();

        meter.received(300);
        tokio::time::advance(Duration::from_millis(500)).await;
        meter.received(300);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(meter.bytes_per_second(), 600);

        // First batch is now 1.4s old, second 0.9s.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(meter.bytes_per_second(), 300);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(meter.bytes_per_second(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_drops_oldest() {
        let meter = ThroughputMeter::with_window(500, Duration::from_secs(1));
        for _ in 0..600 {
            meter.received(1);
        }
        assert_eq!(meter.len(), 500);
        assert_eq!(meter.bytes_per_second(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_window_scales_rate() {
        let meter = ThroughputMeter::with_window(500, Duration::from_millis(500));
        meter.received(100);
        assert_eq!(meter.bytes_per_second(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_writers() {
        let meter = Arc::new(ThroughputMeter::new());

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let meter = meter.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    meter.received(10);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(meter.len(), 200);
        assert_eq!(meter.bytes_per_second(), 2000);
    }
}
