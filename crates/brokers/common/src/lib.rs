//! Exchanges that run without touching a real account.

pub mod simulated;
pub mod static_market;

pub use simulated::{PaperExchange, PaperOrder, PAPER_USER};
pub use static_market::StaticMarket;
