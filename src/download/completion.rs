/// Cross-stream completion tracking for one download session
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

use crate::models::Quantity;

/// Single-shot flag that can be awaited
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Set the latch; returns false if it was already set
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    BothComplete,
    TimedOut,
}

/// One latch per data stream
///
/// Built fresh for every session and never reused, so a latch left set by
/// an earlier partial run cannot short-circuit the next wait.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    temperature: Latch,
    humidity: Latch,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latch(&self, quantity: Quantity) -> &Latch {
        match quantity {
            Quantity::Temperature => &self.temperature,
            Quantity::Humidity => &self.humidity,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.temperature.is_set() && self.humidity.is_set()
    }

    /// Wait until both streams have seen their sentinel, or `limit` elapses
    pub async fn wait_for_both(&self, limit: Duration) -> WaitOutcome {
        if self.is_complete() {
            return WaitOutcome::BothComplete;
        }
        let both = async {
            self.temperature.wait().await;
            self.humidity.wait().await;
        };
        match timeout(limit, both).await {
            Ok(()) => WaitOutcome::BothComplete,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn latch_sets_once() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        assert!(latch.set());
        assert!(!latch.set());
        assert!(latch.is_set());
    }

    #[test]
    fn latches_are_independent() {
        let tracker = CompletionTracker::new();
        tracker.latch(Quantity::Humidity).set();
        assert!(tracker.latch(Quantity::Humidity).is_set());
        assert!(!tracker.latch(Quantity::Temperature).is_set());
        assert!(!tracker.is_complete());
    }

    #[tokio::test]
    async fn resolves_when_both_signal() {
        let tracker = Arc::new(CompletionTracker::new());
        let signaller = tracker.clone();
        tokio::spawn(async move {
            signaller.latch(Quantity::Humidity).set();
            tokio::task::yield_now().await;
            signaller.latch(Quantity::Temperature).set();
        });

        assert_eq!(
            tracker.wait_for_both(Duration::from_secs(5)).await,
            WaitOutcome::BothComplete
        );
    }

    #[tokio::test]
    async fn times_out_with_one_stream_missing() {
        let tracker = CompletionTracker::new();
        tracker.latch(Quantity::Temperature).set();
        assert_eq!(
            tracker.wait_for_both(Duration::from_millis(20)).await,
            WaitOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn set_before_wait_is_observed() {
        let tracker = CompletionTracker::new();
        tracker.latch(Quantity::Temperature).set();
        tracker.latch(Quantity::Humidity).set();
        assert_eq!(
            tracker.wait_for_both(Duration::from_millis(1)).await,
            WaitOutcome::BothComplete
        );
    }

    #[test]
    fn fresh_tracker_starts_unset() {
        let previous = CompletionTracker::new();
        previous.latch(Quantity::Temperature).set();
        previous.latch(Quantity::Humidity).set();

        let next = CompletionTracker::new();
        assert!(!next.is_complete());
    }
}
