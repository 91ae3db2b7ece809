/// Utility functions for time conversion and formatting
use time::format_description::well_known::Rfc3339;
use time::{format_description, OffsetDateTime};

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Format a timestamp as RFC 3339 for log file lines
pub fn format_rfc3339(dt: &OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}

/// Milliseconds since the Unix epoch
pub fn datetime_to_ms(dt: &OffsetDateTime) -> i64 {
    (dt.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Inverse of [`datetime_to_ms`], clamping values outside the representable range
pub fn ms_to_datetime(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Time until the next wall-clock trigger
///
/// Triggers fire at `offset_secs` past every multiple of `period_secs`
/// since the epoch, so a period of 60 and offset of 10 fires at second 10
/// of every minute. A trigger falling exactly on `now` is skipped in favour
/// of the next one.
pub fn next_trigger_delay(now: &OffsetDateTime, period_secs: u64, offset_secs: u64) -> time::Duration {
    let period_ms = (period_secs * 1000) as i64;
    let offset_ms = (offset_secs * 1000) as i64;
    let now_ms = datetime_to_ms(now);

    let since_boundary = (now_ms - offset_ms).rem_euclid(period_ms);
    time::Duration::milliseconds(period_ms - since_boundary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_round_trip_keeps_precision() {
        let ms = 1_700_000_000_123;
        assert_eq!(datetime_to_ms(&ms_to_datetime(ms)), ms);
    }

    #[test]
    fn trigger_waits_for_offset_within_minute() {
        // 00:00:05 -> next trigger at 00:00:10
        let now = ms_to_datetime(1_700_000_000_000 - 1_700_000_000_000 % 60_000 + 5_000);
        assert_eq!(next_trigger_delay(&now, 60, 10), time::Duration::seconds(5));
    }

    #[test]
    fn trigger_rolls_over_to_next_period() {
        let base = 1_700_000_000_000 - 1_700_000_000_000 % 60_000;
        let now = ms_to_datetime(base + 10_000);
        assert_eq!(next_trigger_delay(&now, 60, 10), time::Duration::seconds(60));

        let now = ms_to_datetime(base + 30_500);
        assert_eq!(
            next_trigger_delay(&now, 60, 10),
            time::Duration::milliseconds(39_500)
        );
    }

    #[test]
    fn rfc3339_is_utc() {
        let dt = ms_to_datetime(0);
        assert_eq!(format_rfc3339(&dt), "1970-01-01T00:00:00Z");
    }
}
