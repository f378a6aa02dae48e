use crate::Indicator;
use rust_decimal::Decimal;

/// Exponentially weighted mean of bar closes with `alpha = 2 / (span + 1)`.
///
/// A value seen `age` bars ago carries weight `(1 - alpha)^age` and the mean
/// is divided by the total weight, so the first readings are not pulled
/// towards the first close. This matches an adjusted EWM over the whole
/// history. Readings are withheld until `span` closes have been seen.
#[derive(Debug, Clone)]
pub struct Ema {
    span: usize,
    decay: Decimal,
    weighted_sum: Decimal,
    total_weight: Decimal,
    count: usize,
}

impl Ema {
    pub fn new(span: usize) -> Self {
        let span = span.max(1);
        let alpha = Decimal::TWO / Decimal::from(span + 1);
        Self {
            span,
            decay: Decimal::ONE - alpha,
            weighted_sum: Decimal::ZERO,
            total_weight: Decimal::ZERO,
            count: 0,
        }
    }

    /// Mean over everything seen so far, warmed up or not.
    pub fn mean(&self) -> Option<Decimal> {
        if self.total_weight.is_zero() {
            return None;
        }
        Some(self.weighted_sum / self.total_weight)
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.count < self.span {
            return None;
        }
        self.mean()
    }

    /// Closes still needed before readings are reported.
    pub fn remaining_warm_up(&self) -> usize {
        self.span.saturating_sub(self.count)
    }
}

impl Indicator for Ema {
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        // older weights shrink by one step of decay
        self.weighted_sum = value + self.decay * self.weighted_sum;
        self.total_weight = Decimal::ONE + self.decay * self.total_weight;
        self.count += 1;
        self.value()
    }

    fn reset(&mut self) {
        self.weighted_sum = Decimal::ZERO;
        self.total_weight = Decimal::ZERO;
        self.count = 0;
    }

    fn period(&self) -> usize {
        self.span
    }

    fn is_ready(&self) -> bool {
        self.count >= self.span
    }
}
