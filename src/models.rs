use std::fmt;
use time::OffsetDateTime;

use crate::utils::ms_to_datetime;

/// One decoded notification from a data characteristic
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Data { sequence: u32, values: Vec<f32> },
    /// Zero-value chunk; the only end-of-stream signal the gadget sends
    End { sequence: u32 },
}

impl LogRecord {
    pub fn sequence_number(&self) -> u32 {
        match self {
            LogRecord::Data { sequence, .. } | LogRecord::End { sequence } => *sequence,
        }
    }
}

/// The two quantities the gadget logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Humidity,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Temperature => write!(f, "temperature"),
            Quantity::Humidity => write!(f, "humidity"),
        }
    }
}

/// Host and device clocks sampled right after the time sync write
#[derive(Debug, Clone, Copy)]
pub struct ClockOffset {
    pub host_now_ms: i64,
    pub host_now: OffsetDateTime,
    pub device_newest_ms: u64,
}

impl ClockOffset {
    /// Host minus device, in milliseconds
    pub fn drift_ms(&self) -> i64 {
        self.host_now_ms - self.device_newest_ms as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadWindow {
    pub start_ms: i64,
    pub overlap_ms: i64,
}

/// A reconstructed sample ready for the sink
#[derive(Debug, Clone, PartialEq)]
pub struct GadgetReading {
    pub timestamp_ms: i64,
    pub temperature: f32,
    pub humidity: f32,
}

impl GadgetReading {
    pub fn time(&self) -> OffsetDateTime {
        ms_to_datetime(self.timestamp_ms)
    }
}
