/// Database operations for storing downloaded gadget readings
use async_trait::async_trait;

use crate::database::connection::execute_with_retry;
use crate::database::RecordSink;
use crate::error::SinkError;
use crate::models::GadgetReading;

/// Store a batch of reconstructed readings in the gadget_data table
///
/// All rows go over one connection; the retry helper reconnects and
/// resends the whole batch if any insert fails.
///
/// # Arguments
/// * `gadget_mac` - MAC address of the gadget
/// * `readings` - Readings to store, oldest first
/// * `database_url` - PostgreSQL connection string
/// * `max_retries` - Connection attempts before giving up
///
/// # Returns
/// Number of rows inserted
pub async fn store_gadget_readings(
    gadget_mac: &str,
    readings: &[GadgetReading],
    database_url: &str,
    max_retries: usize,
) -> Result<u64, String> {
    // Clone data for move into async closure
    let gadget_mac = gadget_mac.to_string();
    let readings = readings.to_vec();

    execute_with_retry(database_url, max_retries, move |client| {
        let gadget_mac = gadget_mac.clone();
        let readings = readings.clone();
        async move {
            let statement = client
                .prepare(
                    "INSERT INTO gadget_data(gadget_mac, time, temperature, humidity)
                     VALUES ($1, $2, $3, $4)",
                )
                .await?;

            let mut inserted = 0;
            for reading in &readings {
                inserted += client
                    .execute(
                        &statement,
                        &[
                            &gadget_mac,
                            &reading.time(),
                            &reading.temperature,
                            &reading.humidity,
                        ],
                    )
                    .await?;
            }
            Ok(inserted)
        }
    })
    .await
}

/// Sink writing readings to PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresSink {
    database_url: String,
    max_retries: usize,
}

impl PostgresSink {
    pub fn new(database_url: &str, max_retries: usize) -> Self {
        Self {
            database_url: database_url.to_string(),
            max_retries,
        }
    }
}

#[async_trait]
impl RecordSink for PostgresSink {
    async fn append(&self, gadget: &str, readings: &[GadgetReading]) -> Result<(), SinkError> {
        store_gadget_readings(gadget, readings, &self.database_url, self.max_retries)
            .await
            .map(|_| ())
            .map_err(SinkError::Database)
    }
}
