use blockhead_core::{Bar, Exchange, ExchangeError};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use crate::candles::{candles_to_bars, sort_dedup};

/// Attempts made for one batch before a timeout is given up on.
pub const MAX_ATTEMPTS: u32 = 5;
/// Bars requested per call; the exchange refuses more than 300.
pub const DEFAULT_BATCH: usize = 300;
/// Pause between consecutive candle requests.
pub const DEFAULT_PACING: std::time::Duration = std::time::Duration::from_millis(500);

/// Time covered by `bars` bars of `granularity` seconds. `None` when it
/// does not fit in a [`Duration`].
pub fn bar_span(granularity: u32, bars: usize) -> Option<Duration> {
    let bars = i64::try_from(bars).ok()?;
    Duration::try_seconds(i64::from(granularity).checked_mul(bars)?)
}

/// Fetches one window of bars, retrying timeouts.
pub async fn fetch_bar_batch(
    exchange: &dyn Exchange,
    pair: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: u32,
) -> Result<Vec<Bar>, ExchangeError> {
    let mut attempts = 0;
    loop {
        match exchange.candles(pair, start, end, granularity).await {
            Ok(candles) => return Ok(candles_to_bars(pair, candles, granularity)),
            Err(e) if e.is_timeout() => {
                attempts += 1;
                warn!(attempt = attempts, pair, "Timeout fetching bars");
                if attempts >= MAX_ATTEMPTS {
                    error!(pair, %start, %end, "Giving up after {} timeouts", attempts);
                    return Err(e);
                }
            }
            Err(e) => {
                warn!(error = %e, pair, "Error fetching bars, are you fetching too many at once?");
                return Err(e);
            }
        }
    }
}

/// Fetches every bar between `start` and `end`.
///
/// Works backwards from `end` in windows of `batch` bars. A rate limit
/// backs off for `2^failures` seconds and retries the window, and the
/// pacing between later requests grows to the last back-off. Any other
/// error ends the walk with whatever was already fetched. Returns `None`
/// when nothing was fetched at all.
pub async fn fetch_bars(
    exchange: &dyn Exchange,
    pair: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: u32,
    batch: usize,
    pacing: std::time::Duration,
) -> Option<Vec<Bar>> {
    let Some(window) = bar_span(granularity, batch.max(1)) else {
        error!(granularity, batch, "Batch window is too large");
        return None;
    };
    let mut pacing = pacing;
    let mut failures: u32 = 0;
    let mut cursor = end;
    let mut all_bars: Vec<Bar> = Vec::new();

    while cursor > start {
        let from = cursor.checked_sub_signed(window).unwrap_or(start);
        let bars = match fetch_bar_batch(exchange, pair, from, cursor, granularity).await {
            Ok(bars) => bars,
            Err(e) if e.is_rate_limit() => {
                failures += 1;
                let backoff = std::time::Duration::from_secs(2u64.saturating_pow(failures));
                error!(error = %e, "Rate limited, sleeping {:?}", backoff);
                pacing = pacing.max(backoff);
                tokio::time::sleep(backoff).await;
                continue;
            }
            Err(e) => {
                error!(error = %e, fetched = all_bars.len(), "Stopping fetch, keeping bars fetched so far");
                break;
            }
        };

        let Some(earliest) = bars.first().map(|b| b.open_time) else {
            debug!(pair, %from, %cursor, "No bars returned, history exhausted");
            break;
        };
        debug!(count = bars.len(), %from, %cursor, "Fetched bars");
        all_bars.extend(bars);

        if earliest >= cursor {
            break;
        }
        cursor = earliest;
        tokio::time::sleep(pacing).await;
    }

    sort_dedup(&mut all_bars);
    all_bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
    if all_bars.is_empty() {
        None
    } else {
        Some(all_bars)
    }
}

/// The latest `qty` bars up to `end` (now when not given).
pub async fn recent_bars(
    exchange: &dyn Exchange,
    pair: &str,
    qty: usize,
    granularity: u32,
    end: Option<DateTime<Utc>>,
) -> Vec<Bar> {
    let end = end.unwrap_or_else(Utc::now);
    let Some(start) = bar_span(granularity, qty).and_then(|span| end.checked_sub_signed(span)) else {
        error!(qty, granularity, "Too many bars requested");
        return Vec::new();
    };
    let batch = qty.clamp(1, DEFAULT_BATCH);

    let mut bars = fetch_bars(exchange, pair, start, end, granularity, batch, DEFAULT_PACING)
        .await
        .unwrap_or_default();
    if bars.len() > qty {
        bars.drain(..bars.len() - qty);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockhead_brokers_common::StaticMarket;
    use blockhead_core::Candle;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 3, 0, 0, 0).unwrap()
    }

    fn market(minutes: i64) -> StaticMarket {
        let candles = (0..minutes)
            .map(|m| Candle {
                open_time: base() + Duration::minutes(m),
                low: Decimal::from(m),
                high: Decimal::from(m),
                open: Decimal::from(m),
                close: Decimal::from(m),
                volume: Decimal::ONE,
            })
            .collect();
        StaticMarket::new().with_candles("ETH-USD", candles)
    }

    #[tokio::test(start_paused = true)]
    async fn test_walks_back_in_batches() {
        let market = market(120);
        let end = base() + Duration::minutes(120);

        let bars = fetch_bars(&market, "ETH-USD", base(), end, 60, 50, DEFAULT_PACING)
            .await
            .unwrap();

        // every bar whose close lies within the range, once, ascending
        assert_eq!(bars.len(), 120);
        assert_eq!(bars[0].timestamp, base() + Duration::minutes(1));
        assert_eq!(bars.last().unwrap().timestamp, end);
        assert!(bars.windows(2).all(|w| w[0].open_time < w[1].open_time));
        assert!(market.candle_requests() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let market = market(10);
        market
            .fail_next_candles(ExchangeError::RateLimited("slow down".to_string()))
            .await;

        let bars = fetch_bars(&market, "ETH-USD", base(), base() + Duration::minutes(10), 60, 300, DEFAULT_PACING)
            .await
            .unwrap();
        assert_eq!(bars.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_retried_until_limit() {
        let market = market(10);
        for _ in 0..MAX_ATTEMPTS {
            market.fail_next_candles(ExchangeError::Timeout).await;
        }
        let result = fetch_bar_batch(&market, "ETH-USD", base(), base() + Duration::minutes(10), 60).await;
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(market.candle_requests(), MAX_ATTEMPTS as usize);

        // four timeouts then data
        let market = self::market(10);
        for _ in 0..MAX_ATTEMPTS - 1 {
            market.fail_next_candles(ExchangeError::Timeout).await;
        }
        let bars = fetch_bar_batch(&market, "ETH-USD", base(), base() + Duration::minutes(10), 60)
            .await
            .unwrap();
        assert_eq!(bars.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_keeps_fetched_bars() {
        let market = market(120);
        market
            .fail_candles_at(
                3,
                ExchangeError::Http {
                    status: 400,
                    message: "bad".to_string(),
                },
            )
            .await;
        let end = base() + Duration::minutes(120);

        // two pages of 50 minutes walking back from the end, then the error
        let bars = fetch_bars(&market, "ETH-USD", base(), end, 60, 50, DEFAULT_PACING)
            .await
            .unwrap();
        assert_eq!(market.candle_requests(), 3);
        assert_eq!(bars.len(), 100);
        assert_eq!(bars[0].open_time, base() + Duration::minutes(20));
        assert_eq!(bars.last().unwrap().timestamp, end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_on_first_page_fetches_nothing() {
        let market = market(10);
        market.fail_next_candles(ExchangeError::NotFound("ETH-USD".to_string())).await;
        let result = fetch_bars(&market, "ETH-USD", base(), base() + Duration::minutes(10), 60, 300, DEFAULT_PACING).await;
        assert!(result.is_none());
        assert_eq!(market.candle_requests(), 1);
    }

    #[tokio::test]
    async fn test_oversized_windows_are_refused() {
        assert_eq!(bar_span(60, 300), Some(Duration::hours(5)));
        assert!(bar_span(u32::MAX, usize::MAX).is_none());
        assert!(bar_span(86_400, 1 << 50).is_none());

        let market = market(10);
        let end = base() + Duration::minutes(10);
        assert!(fetch_bars(&market, "ETH-USD", base(), end, 60, usize::MAX, DEFAULT_PACING)
            .await
            .is_none());
        assert!(recent_bars(&market, "ETH-USD", usize::MAX, 60, Some(end)).await.is_empty());
        assert_eq!(market.candle_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_bars_returns_latest() {
        let market = market(100);
        let end = base() + Duration::minutes(100);
        let bars = recent_bars(&market, "ETH-USD", 30, 60, Some(end)).await;
        assert_eq!(bars.len(), 30);
        assert_eq!(bars.last().unwrap().timestamp, end);
        assert_eq!(bars[0].close, Decimal::from(70));
    }
}
