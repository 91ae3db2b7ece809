/// Per-quantity sample buffers fed by notification callbacks
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bluetooth::decoder::decode;
use crate::bluetooth::NotifyCallback;
use crate::download::completion::CompletionTracker;
use crate::models::{LogRecord, Quantity};

/// Values for one quantity, newest sample first
///
/// Each stream has its own lock; the two callbacks never contend.
#[derive(Debug, Clone, Default)]
pub struct SampleStream {
    values: Arc<Mutex<Vec<f32>>>,
}

impl SampleStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<f32>> {
        // A panicking callback can't leave a Vec half-pushed
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn extend(&self, values: &[f32]) {
        self.lock().extend_from_slice(values);
    }

    /// Take everything collected so far, leaving the stream empty
    pub fn take(&self) -> Vec<f32> {
        std::mem::take(&mut *self.lock())
    }
}

/// Notification handler for one data characteristic
pub struct StreamCollector {
    quantity: Quantity,
    stream: SampleStream,
    tracker: Arc<CompletionTracker>,
}

impl StreamCollector {
    pub fn new(quantity: Quantity, stream: SampleStream, tracker: Arc<CompletionTracker>) -> Self {
        Self {
            quantity,
            stream,
            tracker,
        }
    }

    pub fn on_notify(&self, raw: &[u8]) {
        let record = match decode(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping {} notification: {}", self.quantity, e);
                return;
            }
        };

        let sequence = record.sequence_number();
        match record {
            LogRecord::Data { values, .. } => {
                let collected = self.stream.len();
                if sequence as usize != collected {
                    warn!(
                        "{} chunk sequence {} does not follow {} collected values",
                        self.quantity, sequence, collected
                    );
                }
                debug!(
                    "{} chunk {}: {} values",
                    self.quantity,
                    sequence,
                    values.len()
                );
                self.stream.extend(&values);
            }
            LogRecord::End { .. } => {
                debug!("{} stream complete at sequence {}", self.quantity, sequence);
                self.tracker.latch(self.quantity).set();
            }
        }
    }

    pub fn into_callback(self) -> NotifyCallback {
        Box::new(move |raw| self.on_notify(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(sequence: u32, values: &[f32]) -> Vec<u8> {
        let mut raw = sequence.to_le_bytes().to_vec();
        for v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        raw
    }

    #[test]
    fn data_chunks_append_in_arrival_order() {
        let stream = SampleStream::new();
        let tracker = Arc::new(CompletionTracker::new());
        let collector = StreamCollector::new(Quantity::Temperature, stream.clone(), tracker);

        collector.on_notify(&payload(0, &[21.0, 20.5]));
        collector.on_notify(&payload(2, &[20.0]));

        assert!(!stream.is_empty());
        assert_eq!(stream.take(), vec![21.0, 20.5, 20.0]);
        assert_eq!(stream.len(), 0);
        assert!(stream.is_empty());
    }

    #[test]
    fn sentinel_sets_only_own_latch() {
        let tracker = Arc::new(CompletionTracker::new());
        let humidity = StreamCollector::new(Quantity::Humidity, SampleStream::new(), tracker.clone());

        humidity.on_notify(&payload(3, &[]));

        assert!(tracker.latch(Quantity::Humidity).is_set());
        assert!(!tracker.latch(Quantity::Temperature).is_set());
    }

    #[test]
    fn malformed_payload_is_dropped_and_stream_continues() {
        let stream = SampleStream::new();
        let tracker = Arc::new(CompletionTracker::new());
        let collector = StreamCollector::new(Quantity::Humidity, stream.clone(), tracker.clone());

        collector.on_notify(&payload(0, &[55.0]));
        collector.on_notify(&[1, 2]);
        collector.on_notify(&payload(1, &[54.0]));

        assert_eq!(stream.take(), vec![55.0, 54.0]);
        assert!(!tracker.is_complete());
    }

    #[test]
    fn callback_feeds_collector() {
        let stream = SampleStream::new();
        let tracker = Arc::new(CompletionTracker::new());
        let callback =
            StreamCollector::new(Quantity::Temperature, stream.clone(), tracker.clone()).into_callback();

        callback(payload(0, &[19.5]));
        callback(payload(1, &[]));

        assert_eq!(stream.len(), 1);
        assert!(tracker.latch(Quantity::Temperature).is_set());
    }
}
