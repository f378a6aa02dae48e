pub mod ema;
pub mod macd;

use rust_decimal::Decimal;

/// Streaming (incremental) indicator: feed one value at a time.
pub trait Indicator: Send + Sync {
    /// Process the next value and return the indicator output (if ready).
    fn next(&mut self, value: Decimal) -> Option<Decimal>;

    /// Reset the indicator to its initial state.
    fn reset(&mut self);

    /// The minimum number of data points needed before the indicator produces output.
    fn period(&self) -> usize;

    /// Whether the indicator has enough data to produce output.
    fn is_ready(&self) -> bool;

    /// Feed a history of values, returning the last output.
    fn warm_up<I>(&mut self, values: I) -> Option<Decimal>
    where
        I: IntoIterator<Item = Decimal>,
        Self: Sized,
    {
        let mut last = None;
        for value in values {
            last = self.next(value);
        }
        last
    }
}
