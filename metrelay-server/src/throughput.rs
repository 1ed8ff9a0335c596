//! Turns the cumulative count of delivered samples into a rate.
//!
//! The pipeline [publishes](ThroughputMonitor::publish) the cumulative count after every request.
//! Publishing never blocks and overwrites any value the monitor has not seen yet. Counts lower
//! than the latest one are stale and ignored, so concurrent publishers cannot move it back. Once
//! [started](ThroughputMonitor::start), a background task wakes up every interval, waits for the
//! next published count if there is none, and stores `delta / interval` in a single slot. Readers
//! [take](ThroughputMonitor::try_rate) the rate without blocking and simply miss ticks they did
//! not poll in time.
//!
//! The first count observed is the baseline and does not produce a rate.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// A single-value cell. Publishing overwrites, reading empties.
#[derive(Debug, Default)]
struct RateSlot(Mutex<Option<f64>>);

impl RateSlot {
    fn publish(&self, rate: f64) {
        *self.0.lock() = Some(rate);
    }

    fn take(&self) -> Option<f64> {
        self.0.lock().take()
    }
}

/// Samples a cumulative counter periodically and publishes its rate.
#[derive(Debug)]
pub struct ThroughputMonitor {
    interval: Duration,
    counts: watch::Sender<u64>,
    rates: Arc<RateSlot>,
    running: Mutex<bool>,
}

impl ThroughputMonitor {
    /// Creates a stopped monitor ticking every `interval`.
    pub fn new(interval: Duration) -> Self {
        let (counts, _) = watch::channel(0);
        Self {
            interval,
            counts,
            rates: Arc::default(),
            running: Mutex::new(false),
        }
    }

    /// Publishes the latest cumulative count, replacing any count not yet sampled.
    ///
    /// A count below the current one is ignored.
    pub fn publish(&self, cumulative: u64) {
        self.counts.send_if_modified(|current| {
            if cumulative < *current {
                return false;
            }
            *current = cumulative;
            true
        });
    }

    /// Returns the latest rate per second if one was published since the last call.
    pub fn try_rate(&self) -> Option<f64> {
        self.rates.take()
    }

    /// Spawns the sampling task on the current runtime.
    ///
    /// Returns `false` without spawning if the monitor is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if *running {
            return false;
        }
        *running = true;

        let counts = self.counts.subscribe();
        let rates = self.rates.clone();
        tokio::spawn(sample(self.interval, counts, rates));

        metrelay_log::debug!(interval = ?self.interval, "started throughput monitor");
        true
    }
}

async fn sample(interval: Duration, mut counts: watch::Receiver<u64>, rates: Arc<RateSlot>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let seconds = interval.as_secs_f64();
    let mut previous = None;

    loop {
        ticker.tick().await;

        // Waits for the next count, the monitor tracks one value at a time.
        if counts.changed().await.is_err() {
            break;
        }

        let current = *counts.borrow_and_update();
        if let Some(previous) = previous.replace(current) {
            let delta = current.saturating_sub(previous);
            rates.publish(delta as f64 / seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_overwrites() {
        let slot = RateSlot::default();
        assert_eq!(slot.take(), None);

        slot.publish(1.0);
        slot.publish(2.0);
        assert_eq!(slot.take(), Some(2.0));
        assert_eq!(slot.take(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rates_from_cumulative_counts() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(1));
        assert!(monitor.start());

        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut rates = Vec::new();
        for count in [100, 140, 140, 200] {
            monitor.publish(count);
            tokio::time::sleep(Duration::from_secs(1)).await;
            rates.extend(monitor.try_rate());
        }

        assert_eq!(rates, [40.0, 0.0, 60.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_once() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(1));
        assert!(monitor.start());
        assert!(!monitor.start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_published_count() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(1));
        monitor.start();

        monitor.publish(10);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Nothing published for several ticks, so no rate either.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.try_rate(), None);

        monitor.publish(30);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.try_rate(), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_count_ignored() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(1));
        monitor.start();

        tokio::time::sleep(Duration::from_millis(500)).await;
        monitor.publish(10);
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Two requests finishing out of order.
        monitor.publish(30);
        monitor.publish(20);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(monitor.try_rate(), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_rate_is_replaced() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(2));
        monitor.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        for count in [0, 10, 30] {
            monitor.publish(count);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        assert_eq!(monitor.try_rate(), Some(10.0));
        assert_eq!(monitor.try_rate(), None);
    }
}
