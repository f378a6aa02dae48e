use blockhead_core::{Bar, Candle};
use chrono::Duration;

/// Converts exchange candles to bars stamped with their close time
/// (`open_time + granularity`). Output is ascending with one bar per open time.
pub fn candles_to_bars(pair: &str, candles: Vec<Candle>, granularity: u32) -> Vec<Bar> {
    let width = Duration::seconds(i64::from(granularity));
    let mut bars: Vec<Bar> = candles
        .into_iter()
        .map(|c| Bar {
            instrument: pair.to_string(),
            open_time: c.open_time,
            timestamp: c.open_time + width,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        })
        .collect();
    sort_dedup(&mut bars);
    bars
}

/// Sorts bars by open time and keeps the first bar seen for each open time.
pub fn sort_dedup(bars: &mut Vec<Bar>) {
    bars.sort_by_key(|b| b.open_time);
    bars.dedup_by_key(|b| b.open_time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(minute: u32, close: rust_decimal::Decimal) -> Candle {
        Candle {
            open_time: Utc.with_ymd_and_hms(2018, 1, 3, 0, minute, 0).unwrap(),
            low: close,
            high: close,
            open: close,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_close_time_and_order() {
        let bars = candles_to_bars(
            "ETH-USD",
            vec![candle(2, dec!(3)), candle(0, dec!(1)), candle(1, dec!(2)), candle(1, dec!(2))],
            60,
        );
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].close, dec!(1));
        assert_eq!(bars[0].timestamp, Utc.with_ymd_and_hms(2018, 1, 3, 0, 1, 0).unwrap());
        assert_eq!(bars[2].open_time, Utc.with_ymd_and_hms(2018, 1, 3, 0, 2, 0).unwrap());
        assert!(bars.iter().all(|b| b.instrument == "ETH-USD"));
    }
}
