//! Live execution for one product: a level-3 order book kept in sequence with
//! the full channel, bar building, order management and the session loop that
//! drives strategy callbacks.

pub mod bars;
pub mod book;
pub mod live;
pub mod order_manager;
pub mod tick_data;
pub mod trade_log;

pub use bars::BarBuilder;
pub use book::{BookError, BookOrder, OrderBook};
pub use live::{Control, LiveConfig, LiveContext, LiveHandler, LiveSession};
pub use order_manager::{ManagedOrder, OrderError, OrderManager, OrderState};
pub use tick_data::{TickData, TickEvent};
pub use trade_log::TradeLog;
