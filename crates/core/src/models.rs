use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Products & Accounts
// ---------------------------------------------------------------------------

/// A currency pair listed on the exchange (e.g. ETH-USD).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub base_currency: String,
    pub quote_currency: String,
    #[serde(default)]
    pub base_min_size: Option<Decimal>,
    #[serde(default)]
    pub base_max_size: Option<Decimal>,
    #[serde(default)]
    pub quote_increment: Option<Decimal>,
}

/// Last trade and inside quote for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    #[serde(default)]
    pub trade_id: Option<u64>,
    pub price: Decimal,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// A balance held in one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub currency: String,
    pub balance: Decimal,
    pub available: Decimal,
    pub hold: Decimal,
}

/// Splits a pair like `ETH-USD` into its base and quote currencies.
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (base, quote) = pair.split_once('-')?;
    if base.is_empty() || quote.is_empty() {
        None
    } else {
        Some((base, quote))
    }
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A single resting order in a level-3 snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: String,
}

/// Full (level-3) order book at a feed sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub sequence: u64,
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
}

/// One exchange candle, keyed by its open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub low: Decimal,
    pub high: Decimal,
    pub open: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A single OHLCV bar. `timestamp` is the close time of the bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub open_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Positive sizes buy, everything else sells.
    pub fn from_signed(size: Decimal) -> Self {
        if size > Decimal::ZERO {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Gtt,
    Ioc,
    Fok,
}

/// Expiry for good-till-time orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAfter {
    Min,
    Hour,
    Day,
}

/// A limit order to be placed on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrderRequest {
    pub client_oid: Uuid,
    pub product_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub time_in_force: TimeInForce,
    pub cancel_after: Option<CancelAfter>,
    pub post_only: bool,
}

impl LimitOrderRequest {
    /// A post-only order that expires after a day if it is not filled.
    pub fn passive(
        client_oid: Uuid,
        product_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            client_oid,
            product_id: product_id.to_string(),
            side,
            price,
            size,
            time_in_force: TimeInForce::Gtt,
            cancel_after: Some(CancelAfter::Day),
            post_only: true,
        }
    }
}

/// The exchange's acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
    pub product_id: String,
    pub side: Side,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub size: Decimal,
    #[serde(default)]
    pub status: Option<String>,
}

/// An order currently resting on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub product_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default)]
    pub filled_size: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Directional view emitted by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Long,
    Short,
}

/// A trading signal emitted by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub instrument: String,
    pub bias: Bias,
    pub strategy_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}
