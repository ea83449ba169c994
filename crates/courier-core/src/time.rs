use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

/// Milliseconds since the Unix epoch for the given instant.
pub fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn now_millis() -> i64 {
    to_millis(OffsetDateTime::now_utc())
}

/// Convert epoch milliseconds back into a UTC timestamp.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// UTC day bucket (`YYYY-MM-DD`) used to partition time-indexed keys.
pub fn day_bucket(at: OffsetDateTime) -> String {
    let date = at.to_offset(time::UtcOffset::UTC).date();
    format_date(date)
}

/// Epoch milliseconds of 00:00 UTC on the day containing `at`.
pub fn day_start_millis(at: OffsetDateTime) -> i64 {
    let date = at.to_offset(time::UtcOffset::UTC).date();
    to_millis(date.with_time(Time::MIDNIGHT).assume_utc())
}

fn format_date(date: Date) -> String {
    // The format description only contains numeric components, formatting cannot fail.
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| format!("{}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_day_bucket() {
        let at = datetime!(2024-03-07 23:59:59 UTC);
        assert_eq!(day_bucket(at), "2024-03-07");

        let shifted = datetime!(2024-03-08 01:00:00 +02:00);
        assert_eq!(day_bucket(shifted), "2024-03-07");
    }

    #[test]
    fn test_millis_roundtrip() {
        let at = datetime!(2024-03-07 12:00:00.123 UTC);
        let ms = to_millis(at);
        assert_eq!(from_millis(ms), at);
    }

    #[test]
    fn test_day_start() {
        let at = datetime!(2024-03-07 12:34:56 UTC);
        assert_eq!(day_start_millis(at), to_millis(datetime!(2024-03-07 00:00:00 UTC)));
    }
}
