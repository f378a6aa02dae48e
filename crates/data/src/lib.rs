//! Historical bar data: paged downloads from the exchange and a per-day CSV cache.

pub mod cache;
pub mod candles;
pub mod csv_loader;
pub mod fetch;
pub mod time;

pub use cache::BarStore;
pub use candles::candles_to_bars;
pub use fetch::{bar_span, fetch_bar_batch, fetch_bars, recent_bars, DEFAULT_BATCH, DEFAULT_PACING};
