pub mod connection;
pub mod file;
pub mod operations;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::GadgetReading;

pub use file::FileSink;
pub use operations::PostgresSink;

/// Append-only destination for downloaded readings
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append `readings` (oldest first) for the gadget at `gadget`
    async fn append(&self, gadget: &str, readings: &[GadgetReading]) -> Result<(), SinkError>;
}
