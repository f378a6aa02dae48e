use blockhead_core::{Bar, DataError};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

/// Load OHLCV bars from a CSV file.
///
/// Expected columns (case-insensitive, any order):
/// `close_time` (or `timestamp`, `date`, `datetime`), `open`, `high`, `low`, `close`,
/// and optionally `open_time` and `volume`. Without an `open_time` column the
/// open time is `close_time - granularity`.
///
/// Timestamps without an offset are UTC.
pub fn load_bars_from_csv(path: &Path, instrument: &str, granularity: u32) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::ParseError(format!("Failed to open CSV {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let col_map = resolve_bar_columns(&headers)?;
    let width = Duration::seconds(i64::from(granularity));

    let mut bars = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;

        let timestamp = parse_timestamp(field(&record, col_map.close_time)?)?;
        let open_time = match col_map.open_time {
            Some(idx) => parse_timestamp(field(&record, idx)?)?,
            None => timestamp - width,
        };
        let volume = match col_map.volume {
            Some(idx) => parse_decimal(field(&record, idx)?, "volume")?,
            None => Decimal::ZERO,
        };

        bars.push(Bar {
            instrument: instrument.to_string(),
            open_time,
            timestamp,
            open: parse_decimal(field(&record, col_map.open)?, "open")?,
            high: parse_decimal(field(&record, col_map.high)?, "high")?,
            low: parse_decimal(field(&record, col_map.low)?, "low")?,
            close: parse_decimal(field(&record, col_map.close)?, "close")?,
            volume,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct BarColumnMap {
    open_time: Option<usize>,
    close_time: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

fn resolve_bar_columns(headers: &csv::StringRecord) -> Result<BarColumnMap, DataError> {
    let close_time = find_column(headers, &["close_time", "timestamp", "date", "datetime", "time"])
        .ok_or_else(|| DataError::ParseError("No close_time column found".into()))?;
    let open = find_column(headers, &["open", "o"])
        .ok_or_else(|| DataError::ParseError("No open column found".into()))?;
    let high = find_column(headers, &["high", "h"])
        .ok_or_else(|| DataError::ParseError("No high column found".into()))?;
    let low = find_column(headers, &["low", "l"])
        .ok_or_else(|| DataError::ParseError("No low column found".into()))?;
    let close = find_column(headers, &["close", "c"])
        .ok_or_else(|| DataError::ParseError("No close column found".into()))?;

    Ok(BarColumnMap {
        open_time: find_column(headers, &["open_time"]),
        close_time,
        open,
        high,
        low,
        close,
        volume: find_column(headers, &["volume", "vol", "v"]),
    })
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    // earlier names win, so `close_time` beats a generic `time`
    names
        .iter()
        .find_map(|name| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name)))
}

fn field(record: &csv::StringRecord, idx: usize) -> Result<&str, DataError> {
    record
        .get(idx)
        .ok_or_else(|| DataError::ParseError(format!("Short CSV record: {:?}", record)))
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, DataError> {
    Decimal::from_str(s.trim())
        .or_else(|_| Decimal::from_scientific(s.trim()))
        .map_err(|e| DataError::ParseError(format!("Failed to parse {} '{}': {}", field, s, e)))
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DataError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // space-separated with an offset: `2018-01-03 00:01:00+00:00`
    for fmt in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for fmt in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }

    // Unix timestamp (seconds)
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(DataError::ParseError(format!("Unable to parse timestamp: '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_load_space_separated_timestamps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "open_time,low,high,open,close,volume,close_time").unwrap();
        writeln!(file, "2018-01-03 00:01:00+00:00,10.5,11,10.6,10.9,3.2,2018-01-03 00:02:00+00:00").unwrap();
        writeln!(file, "2018-01-03 00:00:00+00:00,10,10.7,10.1,10.6,1.5,2018-01-03 00:01:00+00:00").unwrap();

        let bars = load_bars_from_csv(file.path(), "ETH-USD", 60).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, Utc.with_ymd_and_hms(2018, 1, 3, 0, 1, 0).unwrap());
        assert_eq!(bars[0].open_time, Utc.with_ymd_and_hms(2018, 1, 3, 0, 0, 0).unwrap());
        assert_eq!(bars[1].close, dec!(10.9));
        assert_eq!(bars[1].low, dec!(10.5));
    }

    #[test]
    fn test_missing_open_time_uses_granularity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,open,high,low,close").unwrap();
        writeln!(file, "2018-01-03T00:05:00Z,1,2,1,2").unwrap();

        let bars = load_bars_from_csv(file.path(), "ETH-USD", 300).unwrap();
        assert_eq!(bars[0].open_time, Utc.with_ymd_and_hms(2018, 1, 3, 0, 0, 0).unwrap());
        assert_eq!(bars[0].volume, Decimal::ZERO);
    }

    #[test]
    fn test_missing_column_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "close_time,open,high,close").unwrap();
        assert!(matches!(
            load_bars_from_csv(file.path(), "ETH-USD", 60),
            Err(DataError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2018, 1, 3, 0, 1, 0).unwrap();
        assert_eq!(parse_timestamp("2018-01-03T00:01:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2018-01-03 00:01:00").unwrap(), expected);
        assert_eq!(parse_timestamp("1514937660").unwrap(), expected);
        assert!(parse_timestamp("soon").is_err());
    }
}
