use blockhead_core::{split_pair, Account};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FundsError {
    #[error("Invalid pair {0}")]
    InvalidPair(String),
    #[error("No {0} account")]
    NoAccount(String),
    #[error("Price must be positive, got {0}")]
    BadPrice(Decimal),
    #[error("Insufficient funds, you have {available}, trading {required}")]
    Insufficient { available: Decimal, required: Decimal },
}

/// Outcome of a successful funds check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funds {
    /// A zero quantity; there is nothing to trade.
    NothingToDo,
    /// Enough is available; holds the quantity that could be traded.
    Available(Decimal),
}

pub fn available(accounts: &[Account], currency: &str) -> Option<Decimal> {
    accounts.iter().find(|a| a.currency == currency).map(|a| a.available)
}

fn balances(accounts: &[Account], pair: &str) -> Result<(Decimal, Decimal), FundsError> {
    let (base, quote) = split_pair(pair).ok_or_else(|| FundsError::InvalidPair(pair.to_string()))?;
    let base_avail = available(accounts, base).ok_or_else(|| FundsError::NoAccount(base.to_string()))?;
    let quote_avail = available(accounts, quote).ok_or_else(|| FundsError::NoAccount(quote.to_string()))?;
    Ok((base_avail, quote_avail))
}

/// Checks a signed quantity of the base currency can be traded at `price`.
///
/// Buying is limited by the quote balance converted at `price`, selling by
/// the base balance.
pub fn check_funds(accounts: &[Account], pair: &str, quantity: Decimal, price: Decimal) -> Result<Funds, FundsError> {
    if quantity.is_zero() {
        return Ok(Funds::NothingToDo);
    }
    if price <= Decimal::ZERO {
        return Err(FundsError::BadPrice(price));
    }
    let (base, quote) = balances(accounts, pair)?;
    let total = if quantity > Decimal::ZERO { quote / price } else { base };
    if total < quantity.abs() {
        return Err(FundsError::Insufficient {
            available: total,
            required: quantity.abs(),
        });
    }
    info!("We have {} available to trade {}", total, quantity);
    Ok(Funds::Available(total))
}

/// Checks `quantity` can be traded in either direction, counting both the
/// base balance and the quote balance converted at `price`.
pub fn check_tradeable(accounts: &[Account], pair: &str, quantity: Decimal, price: Decimal) -> Result<Decimal, FundsError> {
    if price <= Decimal::ZERO {
        return Err(FundsError::BadPrice(price));
    }
    let (base, quote) = balances(accounts, pair)?;
    let total = base + quote / price;
    if total < quantity.abs() {
        return Err(FundsError::Insufficient {
            available: total,
            required: quantity.abs(),
        });
    }
    info!("We have {} available to trade {}", total, quantity);
    Ok(total)
}
