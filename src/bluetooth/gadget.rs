/// Sensirion Smart Gadget logger service: characteristic UUIDs and value codecs
use bluer::Uuid;

use crate::error::TransportError;

// All gadget characteristics share the vendor base xxxxxxxx-b38d-4985-720e-0f993a68ee41
pub const SYNC_TIME_MS: Uuid = Uuid::from_u128(0x0000f235_b38d_4985_720e_0f993a68ee41);
pub const OLDEST_TIMESTAMP_MS: Uuid = Uuid::from_u128(0x0000f236_b38d_4985_720e_0f993a68ee41);
pub const NEWEST_TIMESTAMP_MS: Uuid = Uuid::from_u128(0x0000f237_b38d_4985_720e_0f993a68ee41);
pub const START_LOGGER_DOWNLOAD: Uuid = Uuid::from_u128(0x0000f238_b38d_4985_720e_0f993a68ee41);
pub const LOGGER_INTERVAL_MS: Uuid = Uuid::from_u128(0x0000f239_b38d_4985_720e_0f993a68ee41);
pub const HUMIDITY_DATA: Uuid = Uuid::from_u128(0x00001235_b38d_4985_720e_0f993a68ee41);
pub const TEMPERATURE_DATA: Uuid = Uuid::from_u128(0x00002235_b38d_4985_720e_0f993a68ee41);

pub const DOWNLOAD_START: u8 = 1;
pub const DOWNLOAD_STOP: u8 = 0;

pub fn encode_u64_ms(ms: u64) -> [u8; 8] {
    ms.to_le_bytes()
}

pub fn parse_u32_le(uuid: Uuid, raw: &[u8]) -> Result<u32, TransportError> {
    let bytes: [u8; 4] = raw.try_into().map_err(|_| TransportError::UnexpectedLength {
        uuid,
        len: raw.len(),
        expected: 4,
    })?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn parse_u64_le(uuid: Uuid, raw: &[u8]) -> Result<u64, TransportError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| TransportError::UnexpectedLength {
        uuid,
        len: raw.len(),
        expected: 8,
    })?;
    Ok(u64::from_le_bytes(bytes))
}

/// Logging interval in milliseconds; zero would collapse every timestamp onto one instant
pub fn parse_logging_interval(raw: &[u8]) -> Result<u32, TransportError> {
    let interval = parse_u32_le(LOGGER_INTERVAL_MS, raw)?;
    if interval == 0 {
        return Err(TransportError::UnexpectedValue {
            uuid: LOGGER_INTERVAL_MS,
            value: 0,
        });
    }
    Ok(interval)
}
