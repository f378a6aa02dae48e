use blockhead_core::{Bar, DataError};
use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::csv_loader::load_bars_from_csv;

const HEADER: [&str; 7] = ["open_time", "low", "high", "open", "close", "volume", "close_time"];

/// On-disk bar cache with one CSV file per UTC day:
/// `<root>/<pair>/<granularity>/<YYYY-MM-DD>`.
///
/// A bar belongs to the day of its close time.
#[derive(Debug, Clone)]
pub struct BarStore {
    root: PathBuf,
}

impl BarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, pair: &str, granularity: u32) -> PathBuf {
        self.root.join(pair).join(granularity.to_string())
    }

    pub fn day_file(&self, pair: &str, granularity: u32, day: NaiveDate) -> PathBuf {
        self.dir(pair, granularity).join(day.format("%Y-%m-%d").to_string())
    }

    /// Writes bars grouped by day and returns the files written. An existing
    /// day file is moved aside to `<day>.bak` first.
    pub fn write_bars(&self, pair: &str, granularity: u32, bars: &[Bar]) -> Result<Vec<PathBuf>, DataError> {
        let dir = self.dir(pair, granularity);
        std::fs::create_dir_all(&dir)?;

        let mut days: BTreeMap<NaiveDate, Vec<&Bar>> = BTreeMap::new();
        for bar in bars {
            days.entry(bar.timestamp.date_naive()).or_default().push(bar);
        }

        let mut written = Vec::with_capacity(days.len());
        for (day, day_bars) in days {
            let path = self.day_file(pair, granularity, day);
            if path.is_file() {
                let backup = path.with_extension("bak");
                debug!(from = %path.display(), to = %backup.display(), "Backing up day file");
                std::fs::rename(&path, &backup)?;
            }
            write_day(&path, &day_bars)?;
            debug!(rows = day_bars.len(), path = %path.display(), "Wrote bars");
            written.push(path);
        }
        Ok(written)
    }

    /// Bars with a close time in `[start, end]`, read from every day file in
    /// range that exists. Missing days are skipped.
    pub fn load_bars(
        &self,
        pair: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: u32,
    ) -> Result<Vec<Bar>, DataError> {
        let mut bars = Vec::new();
        let mut day = start.date_naive();
        let last = end.date_naive();

        while day <= last {
            let path = self.day_file(pair, granularity, day);
            if path.is_file() {
                debug!(%day, "Loading cached bars");
                bars.extend(load_bars_from_csv(&path, pair, granularity)?);
            } else {
                debug!(%day, path = %path.display(), "No cached bars");
            }
            day = match day.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }

        bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
        crate::candles::sort_dedup(&mut bars);
        Ok(bars)
    }
}

fn write_day(path: &Path, bars: &[&Bar]) -> Result<(), DataError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| DataError::ParseError(format!("Failed to create {}: {}", path.display(), e)))?;

    let csv_err = |e: csv::Error| DataError::ParseError(format!("Failed to write {}: {}", path.display(), e));
    writer.write_record(HEADER).map_err(csv_err)?;
    for bar in bars {
        writer
            .write_record([
                bar.open_time.to_rfc3339_opts(SecondsFormat::Secs, true),
                bar.low.to_string(),
                bar.high.to_string(),
                bar.open.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
                bar.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            ])
            .map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn bars_from(start: DateTime<Utc>, count: i64) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let open_time = start + Duration::hours(i);
                Bar {
                    instrument: "ETH-USD".to_string(),
                    open_time,
                    timestamp: open_time + Duration::hours(1),
                    open: Decimal::from(i),
                    high: Decimal::from(i + 1),
                    low: Decimal::from(i),
                    close: Decimal::from(i + 1),
                    volume: Decimal::new(15, 1),
                }
            })
            .collect()
    }

    #[test]
    fn test_write_groups_by_close_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        let start = Utc.with_ymd_and_hms(2018, 1, 3, 20, 0, 0).unwrap();

        // closes at 21:00 .. 02:00 the next day
        let written = store.write_bars("ETH-USD", 3600, &bars_from(start, 6)).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].ends_with("ETH-USD/3600/2018-01-03"));
        assert!(written[1].ends_with("ETH-USD/3600/2018-01-04"));
    }

    #[test]
    fn test_round_trip_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        let start = Utc.with_ymd_and_hms(2018, 1, 3, 20, 0, 0).unwrap();
        let bars = bars_from(start, 6);
        store.write_bars("ETH-USD", 3600, &bars).unwrap();

        let loaded = store
            .load_bars("ETH-USD", start, start + Duration::days(2), 3600)
            .unwrap();
        assert_eq!(loaded, bars);

        let window = store
            .load_bars("ETH-USD", bars[1].timestamp, bars[3].timestamp, 3600)
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0], bars[1]);
    }

    #[test]
    fn test_existing_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        let start = Utc.with_ymd_and_hms(2018, 1, 3, 0, 0, 0).unwrap();
        store.write_bars("ETH-USD", 3600, &bars_from(start, 2)).unwrap();
        store.write_bars("ETH-USD", 3600, &bars_from(start, 3)).unwrap();

        let day = NaiveDate::from_ymd_opt(2018, 1, 3).unwrap();
        let backup = store.day_file("ETH-USD", 3600, day).with_extension("bak");
        assert!(backup.is_file());
        let loaded = store.load_bars("ETH-USD", start, start + Duration::hours(5), 3600).unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn test_missing_days_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        let loaded = store.load_bars("BTC-USD", start, start + Duration::days(3), 60).unwrap();
        assert!(loaded.is_empty());
    }
}
