use chrono::DateTime;
use chrono::Datelike;
use chrono::TimeZone;
use chrono::Utc;

/// Midnight UTC on the first day of the month after `now`
pub(crate) fn first_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Parse a unix timestamp in seconds
pub(crate) fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}
