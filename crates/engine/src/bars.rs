use blockhead_core::Bar;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// Accumulates trades into one OHLCV bar at a time.
#[derive(Debug, Clone, Default)]
pub struct BarBuilder {
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
    volume: Decimal,
    prev_close: Option<Decimal>,
}

impl BarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the close carried into an empty interval, e.g. from historical bars.
    pub fn with_prev_close(prev_close: Decimal) -> Self {
        Self {
            prev_close: Some(prev_close),
            ..Self::default()
        }
    }

    pub fn handle_close(&mut self, price: Decimal, size: Decimal) {
        self.open.get_or_insert(price);
        self.high = Some(self.high.map_or(price, |h| h.max(price)));
        self.low = Some(self.low.map_or(price, |l| l.min(price)));
        self.close = Some(price);
        self.volume += size;
    }

    /// True when no trade has been seen since the last bar closed.
    pub fn is_empty(&self) -> bool {
        self.close.is_none()
    }

    /// Last traded price, falling back to the previous bar's close.
    pub fn last_price(&self) -> Option<Decimal> {
        self.close.or(self.prev_close)
    }

    /// Closes the current bar at `close_time` and starts a new one.
    ///
    /// An interval with no trades gives a flat bar at the previous close with
    /// zero volume; if there has never been a trade there is no bar.
    pub fn close_bar(&mut self, instrument: &str, close_time: DateTime<Utc>, interval: Duration) -> Option<Bar> {
        let close = self.close.or(self.prev_close)?;
        let bar = Bar {
            instrument: instrument.to_string(),
            open_time: close_time - interval,
            timestamp: close_time,
            open: self.open.unwrap_or(close),
            high: self.high.unwrap_or(close),
            low: self.low.unwrap_or(close),
            close,
            volume: self.volume,
        };
        *self = Self::with_prev_close(close);
        Some(bar)
    }
}
