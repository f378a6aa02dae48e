use blockhead_core::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Level-3 book as returned by `GET /products/{id}/book?level=3`.
/// Each entry is `[price, size, order_id]`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireBook {
    pub sequence: u64,
    pub bids: Vec<(Decimal, Decimal, String)>,
    pub asks: Vec<(Decimal, Decimal, String)>,
}

impl From<WireBook> for BookSnapshot {
    fn from(book: WireBook) -> Self {
        let convert = |entries: Vec<(Decimal, Decimal, String)>| -> Vec<BookEntry> {
            entries
                .into_iter()
                .map(|(price, size, order_id)| BookEntry {
                    price,
                    size,
                    order_id,
                })
                .collect()
        };
        BookSnapshot {
            sequence: book.sequence,
            bids: convert(book.bids),
            asks: convert(book.asks),
        }
    }
}

/// One candle row: `[time, low, high, open, close, volume]`, time in epoch seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct WireCandle(pub i64, pub Decimal, pub Decimal, pub Decimal, pub Decimal, pub Decimal);

impl WireCandle {
    pub fn into_candle(self) -> Option<Candle> {
        let WireCandle(time, low, high, open, close, volume) = self;
        Some(Candle {
            open_time: DateTime::<Utc>::from_timestamp(time, 0)?,
            low,
            high,
            open,
            close,
            volume,
        })
    }
}

/// Body of `POST /orders` for a limit order.
#[derive(Debug, Clone, Serialize)]
pub struct WireLimitOrder<'a> {
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub client_oid: String,
    pub product_id: &'a str,
    pub side: Side,
    pub price: String,
    pub size: String,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_after: Option<CancelAfter>,
    pub post_only: bool,
}

impl<'a> From<&'a LimitOrderRequest> for WireLimitOrder<'a> {
    fn from(req: &'a LimitOrderRequest) -> Self {
        Self {
            order_type: "limit",
            client_oid: req.client_oid.to_string(),
            product_id: &req.product_id,
            side: req.side,
            price: req.price.normalize().to_string(),
            size: req.size.normalize().to_string(),
            time_in_force: req.time_in_force,
            // the exchange only accepts cancel_after on GTT orders
            cancel_after: match req.time_in_force {
                TimeInForce::Gtt => req.cancel_after,
                _ => None,
            },
            post_only: req.post_only,
        }
    }
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    pub message: String,
}

/// The `subscribe` message sent when the feed opens.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub product_ids: Vec<String>,
    pub channels: Vec<String>,
    #[serde(flatten)]
    pub auth: Option<SubscribeAuth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeAuth {
    pub signature: String,
    pub key: String,
    pub passphrase: String,
    pub timestamp: String,
}
