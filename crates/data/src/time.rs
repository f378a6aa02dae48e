use blockhead_core::DataError;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Interprets a naive datetime as wall-clock time in the local timezone.
///
/// A time skipped by a DST change is an error; an ambiguous one resolves to
/// the earlier instant.
pub fn to_local(naive: NaiveDateTime) -> Result<DateTime<Local>, DataError> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| DataError::ParseError(format!("{} does not exist in the local timezone", naive)))
}

/// Converts a local wall-clock datetime to UTC.
pub fn to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>, DataError> {
    Ok(to_local(naive)?.with_timezone(&Utc))
}

/// Parses a user-supplied datetime.
///
/// Strings with an offset (RFC 3339) are exact; naive datetimes and bare
/// dates are taken as local time, matching how dates are typed on the
/// command line.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DataError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return to_utc(naive);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return to_utc(date.and_time(NaiveTime::MIN));
    }

    Err(DataError::ParseError(format!("Unable to parse datetime: '{}'", s)))
}

/// Truncates to 00:00:00 UTC on the same day.
pub fn midnight(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_to_utc_is_same_instant_as_local() {
        let now = naive("2018-01-03 14:15:00");
        let local = to_local(now).unwrap();
        let utc = to_utc(now).unwrap();

        assert_eq!(local.naive_local(), now);
        assert_eq!(local.with_timezone(&Utc), utc);
        assert_eq!(utc.timezone(), Utc);
    }

    #[test]
    fn test_parse_datetime_with_offset() {
        let ts = parse_datetime("2018-01-03T14:15:00-05:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2018, 1, 3, 19, 15, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_is_local() {
        let ts = parse_datetime("2018-01-03 14:15:00").unwrap();
        assert_eq!(ts, to_utc(naive("2018-01-03 14:15:00")).unwrap());
        let day = parse_datetime("2018-01-03").unwrap();
        assert_eq!(day, to_utc(naive("2018-01-03 00:00:00")).unwrap());
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_midnight() {
        let ts = Utc.with_ymd_and_hms(2018, 1, 3, 23, 59, 59).unwrap();
        assert_eq!(midnight(ts), Utc.with_ymd_and_hms(2018, 1, 3, 0, 0, 0).unwrap());
    }
}
