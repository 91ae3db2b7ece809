/// Append-only text log of gadget readings
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::database::RecordSink;
use crate::error::SinkError;
use crate::models::GadgetReading;
use crate::utils::format_rfc3339;

/// One `timestamp,temperature,humidity` line per reading
pub fn format_line(reading: &GadgetReading) -> String {
    format!(
        "{},{:.2},{:.2}\n",
        format_rfc3339(&reading.time()),
        reading.temperature,
        reading.humidity
    )
}

#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RecordSink for FileSink {
    async fn append(&self, _gadget: &str, readings: &[GadgetReading]) -> Result<(), SinkError> {
        let batch: String = readings.iter().map(format_line).collect();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(batch.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
