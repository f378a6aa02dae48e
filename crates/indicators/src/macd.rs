use crate::ema::Ema;
use crate::Indicator;
use rust_decimal::Decimal;

/// MACD (Moving Average Convergence Divergence).
///
/// The MACD line is `fast_ema - slow_ema`; the signal line is an EMA of the
/// MACD line. Positive MACD means the fast average is above the slow one.
#[derive(Debug, Clone)]
pub struct Macd {
    fast_ema: Ema,
    slow_ema: Ema,
    signal_ema: Ema,
    macd_line: Option<Decimal>,
    signal_line: Option<Decimal>,
}

/// One MACD reading. `signal` and `histogram` stay empty until the
/// signal EMA has seeded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdOutput {
    pub fast: Decimal,
    pub slow: Decimal,
    pub macd: Decimal,
    pub signal: Option<Decimal>,
    pub histogram: Option<Decimal>,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        assert!(fast_period < slow_period, "Fast period must be less than slow period");
        Self {
            fast_ema: Ema::new(fast_period),
            slow_ema: Ema::new(slow_period),
            signal_ema: Ema::new(signal_period),
            macd_line: None,
            signal_line: None,
        }
    }

    /// Periods scaled for bars shorter than the classic daily bar:
    /// `(12 * lookback, 26 * lookback, 9)`.
    pub fn with_lookback(lookback: usize) -> Self {
        let lookback = lookback.max(1);
        Self::new(12 * lookback, 26 * lookback, 9)
    }

    pub fn output(&self) -> Option<MacdOutput> {
        let (fast, slow, macd) = (self.fast_ema.value()?, self.slow_ema.value()?, self.macd_line?);
        Some(MacdOutput {
            fast,
            slow,
            macd,
            signal: self.signal_line,
            histogram: self.signal_line.map(|s| macd - s),
        })
    }

    /// Process the next close and return the reading once both averages are seeded.
    pub fn next_output(&mut self, value: Decimal) -> Option<MacdOutput> {
        let fast = self.fast_ema.next(value);
        let slow = self.slow_ema.next(value);

        if let (Some(f), Some(s)) = (fast, slow) {
            let macd = f - s;
            self.macd_line = Some(macd);
            self.signal_line = self.signal_ema.next(macd);
        }

        self.output()
    }
}

impl Indicator for Macd {
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        self.next_output(value).map(|o| o.macd)
    }

    fn reset(&mut self) {
        self.fast_ema.reset();
        self.slow_ema.reset();
        self.signal_ema.reset();
        self.macd_line = None;
        self.signal_line = None;
    }

    fn period(&self) -> usize {
        self.slow_ema.period()
    }

    fn is_ready(&self) -> bool {
        self.macd_line.is_some()
    }
}
