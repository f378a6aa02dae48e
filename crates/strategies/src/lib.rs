//! Strategies run by the `blockhead` binary.

pub mod funds;
pub mod macd;
pub mod target_position;

pub use funds::{available, check_funds, check_tradeable, Funds, FundsError};
pub use macd::{MacdConfig, MacdStrategy};
pub use target_position::{TargetConfig, TargetPosition};
