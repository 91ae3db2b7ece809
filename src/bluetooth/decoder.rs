/// Decoding of Smart Gadget logger notifications
use crate::error::DecodeError;
use crate::models::LogRecord;

const SEQUENCE_LEN: usize = 4;
const VALUE_LEN: usize = 4;

/// Decode one logger notification into a [`LogRecord`]
///
/// Payload layout:
/// - Bytes 0-3: Sequence number (unsigned 32-bit, little-endian)
/// - Bytes 4..: Sample values, tightly packed little-endian f32
///
/// A payload with no values after the sequence number is the end-of-stream
/// sentinel and decodes to [`LogRecord::End`].
///
/// # Errors
/// [`DecodeError::MalformedPayload`] if the payload is shorter than the
/// sequence number or the value section is not a whole number of floats.
pub fn decode(raw: &[u8]) -> Result<LogRecord, DecodeError> {
    if raw.len() < SEQUENCE_LEN || (raw.len() - SEQUENCE_LEN) % VALUE_LEN != 0 {
        return Err(DecodeError::MalformedPayload(raw.len()));
    }

    let sequence = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let values: Vec<f32> = raw[SEQUENCE_LEN..]
        .chunks_exact(VALUE_LEN)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if values.is_empty() {
        Ok(LogRecord::End { sequence })
    } else {
        Ok(LogRecord::Data { sequence, values })
    }
}
