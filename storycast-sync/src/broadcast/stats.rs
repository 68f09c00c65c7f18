//! Broadcast counters, lock-free on the hot path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastStats {
    pub cycles: u64,
    pub messages_sent: u64,
    pub acks: u64,
    pub timeouts: u64,
    pub latency_warnings: u64,
    /// Acks that arrived for a superseded cycle or an already retired target
    pub stale_acks: u64,
    pub last_latency: Option<Duration>,
    /// Mean over the samples still inside the sampling window
    pub mean_latency: Option<Duration>,
}

const NO_LATENCY: u64 = u64::MAX;

/// Atomic broadcast stats, written by the broadcaster task and read by
/// its handle via `snapshot()`.
pub(crate) struct AtomicBroadcastStats {
    pub cycles: AtomicU64,
    pub messages_sent: AtomicU64,
    pub acks: AtomicU64,
    pub timeouts: AtomicU64,
    pub latency_warnings: AtomicU64,
    pub stale_acks: AtomicU64,
    last_latency_us: AtomicU64,
    mean_latency_us: AtomicU64,
}

fn to_us(latency: Option<Duration>) -> u64 {
    latency.map_or(NO_LATENCY, |d| d.as_micros().min(u128::from(NO_LATENCY - 1)) as u64)
}

fn from_us(us: u64) -> Option<Duration> {
    (us != NO_LATENCY).then(|| Duration::from_micros(us))
}

impl AtomicBroadcastStats {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            latency_warnings: AtomicU64::new(0),
            stale_acks: AtomicU64::new(0),
            last_latency_us: AtomicU64::new(NO_LATENCY),
            mean_latency_us: AtomicU64::new(NO_LATENCY),
        }
    }

    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn publish_latency(&self, window: &LatencyWindow) {
        self.last_latency_us.store(to_us(window.last()), Ordering::Relaxed);
        self.mean_latency_us.store(to_us(window.mean()), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            latency_warnings: self.latency_warnings.load(Ordering::Relaxed),
            stale_acks: self.stale_acks.load(Ordering::Relaxed),
            last_latency: from_us(self.last_latency_us.load(Ordering::Relaxed)),
            mean_latency: from_us(self.mean_latency_us.load(Ordering::Relaxed)),
        }
    }
}

/// Recent round-trip latencies; samples older than the window are dropped
/// by the periodic sampling pass.
pub(crate) struct LatencyWindow {
    samples: VecDeque<(Instant, Duration)>,
    window: Duration,
    last: Option<Duration>,
}

impl LatencyWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            last: None,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.samples.push_back((Instant::now(), latency));
        self.last = Some(latency);
    }

    /// Drop stale samples, returning how many were dropped.
    pub fn discard_stale(&mut self) -> usize {
        let now = Instant::now();
        let before = self.samples.len();
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) <= self.window {
                break;
            }
            self.samples.pop_front();
        }
        before - self.samples.len()
    }

    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().map(|(_, d)| *d).sum();
        Some(total / self.samples.len() as u32)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_starts_empty() {
        let stats = AtomicBroadcastStats::new();
        assert_eq!(stats.snapshot(), BroadcastStats::default());
    }

    #[test]
    fn test_counters_and_latency() {
        let stats = AtomicBroadcastStats::new();
        AtomicBroadcastStats::bump(&stats.messages_sent, 3);
        AtomicBroadcastStats::bump(&stats.acks, 1);

        let mut window = LatencyWindow::new(Duration::from_secs(5));
        window.record(Duration::from_millis(60));
        window.record(Duration::from_millis(90));
        stats.publish_latency(&window);

        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 3);
        assert_eq!(snap.acks, 1);
        assert_eq!(snap.last_latency, Some(Duration::from_millis(90)));
        assert_eq!(snap.mean_latency, Some(Duration::from_millis(75)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_discards_stale_samples() {
        let mut window = LatencyWindow::new(Duration::from_secs(5));
        window.record(Duration::from_millis(40));
        tokio::time::advance(Duration::from_secs(3)).await;
        window.record(Duration::from_millis(80));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(window.discard_stale(), 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.mean(), Some(Duration::from_millis(80)));
        // The last sample is kept even once the window empties.
        tokio::time::advance(Duration::from_secs(10)).await;
        window.discard_stale();
        assert_eq!(window.mean(), None);
        assert_eq!(window.last(), Some(Duration::from_millis(80)));
    }
}
