use crate::events::FeedMessage;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Strategy Trait
// ---------------------------------------------------------------------------

/// A bar-driven strategy that turns closes into a directional view.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Unique identifier for this strategy.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Called once before the first bar.
    async fn on_start(&mut self) {}

    /// Called on every new bar.
    async fn on_bar(&mut self, bar: &Bar) -> Option<Signal>;

    /// Reset internal state.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Exchange Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to an exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("API error: {0}")]
    Api(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ExchangeError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ExchangeError::RateLimited(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExchangeError::Timeout)
    }
}

/// Market data and order entry for one exchange account.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// All tradeable products.
    async fn products(&self) -> Result<Vec<Product>, ExchangeError>;

    /// Last trade and inside quote for a product.
    async fn ticker(&self, product_id: &str) -> Result<Ticker, ExchangeError>;

    /// Balances for every currency on the account.
    async fn accounts(&self) -> Result<Vec<Account>, ExchangeError>;

    /// Orders resting on the book for a product.
    async fn open_orders(&self, product_id: &str) -> Result<Vec<OpenOrder>, ExchangeError>;

    /// Full order book with every resting order.
    async fn order_book_l3(&self, product_id: &str) -> Result<BookSnapshot, ExchangeError>;

    /// Historic candles between `start` and `end`, `granularity` seconds wide.
    async fn candles(
        &self,
        product_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Place a limit order.
    async fn place_limit_order(&self, req: &LimitOrderRequest) -> Result<PlacedOrder, ExchangeError>;

    /// Cancel one order by exchange id.
    async fn cancel_order(&self, order_id: &str) -> Result<String, ExchangeError>;

    /// Cancel every open order for a product. Returns the cancelled ids.
    async fn cancel_all(&self, product_id: &str) -> Result<Vec<String>, ExchangeError>;

    /// Order updates raised by the exchange itself rather than the feed,
    /// oldest first. Each call drains the queue.
    async fn take_order_updates(&self) -> Vec<FeedMessage> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Data Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during data operations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}
