/// Absolute timestamps for downloaded samples
use log::warn;

use crate::models::{ClockOffset, GadgetReading};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// Paired readings, oldest first
    pub readings: Vec<GadgetReading>,
    /// Stream lengths (temperature, humidity) when they disagreed
    pub mismatch: Option<(usize, usize)>,
}

impl Reconstruction {
    pub fn newest_ms(&self) -> Option<i64> {
        self.readings.last().map(|r| r.timestamp_ms)
    }
}

/// Pair both streams and anchor each sample to wall-clock time
///
/// Both streams arrive newest sample first. Sample `i` is placed at
/// `host_now - drift - i * interval`, where drift is the host/device clock
/// difference measured at offset capture. Streams of unequal length are
/// truncated to the shorter one and a warning is logged.
pub fn reconstruct(
    temperatures: &[f32],
    humidities: &[f32],
    interval_ms: u32,
    offset: &ClockOffset,
) -> Reconstruction {
    let n = temperatures.len().min(humidities.len());

    let mismatch = if temperatures.len() != humidities.len() {
        warn!(
            "Stream length mismatch: {} temperature vs {} humidity values, keeping {}",
            temperatures.len(),
            humidities.len(),
            n
        );
        Some((temperatures.len(), humidities.len()))
    } else {
        None
    };

    let anchor_ms = offset.host_now_ms - offset.drift_ms();
    let interval_ms = i64::from(interval_ms);

    let mut readings: Vec<GadgetReading> = temperatures[..n]
        .iter()
        .zip(&humidities[..n])
        .enumerate()
        .map(|(i, (&temperature, &humidity))| GadgetReading {
            timestamp_ms: anchor_ms - i as i64 * interval_ms,
            temperature,
            humidity,
        })
        .collect();

    readings.reverse();

    Reconstruction { readings, mismatch }
}
