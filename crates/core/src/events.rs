use crate::models::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A message from the exchange's full channel feed.
///
/// Unrecognised message types decode to [`FeedMessage::Unknown`] so a new
/// message kind never breaks the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Subscriptions(Subscriptions),
    Heartbeat(Heartbeat),
    Received(Received),
    Open(OpenMsg),
    Done(Done),
    Match(Match),
    Change(Change),
    Ticker(TickerMsg),
    Error(FeedError),
    #[serde(other)]
    Unknown,
}

impl FeedMessage {
    /// Sequence number, for messages that carry one.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            FeedMessage::Heartbeat(m) => Some(m.sequence),
            FeedMessage::Received(m) => Some(m.sequence),
            FeedMessage::Open(m) => Some(m.sequence),
            FeedMessage::Done(m) => Some(m.sequence),
            FeedMessage::Match(m) => Some(m.sequence),
            FeedMessage::Change(m) => Some(m.sequence),
            FeedMessage::Ticker(m) => m.sequence,
            _ => None,
        }
    }

    /// Set on messages about orders placed by the authenticated user.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            FeedMessage::Received(m) => m.user_id.as_deref(),
            FeedMessage::Open(m) => m.user_id.as_deref(),
            FeedMessage::Done(m) => m.user_id.as_deref(),
            FeedMessage::Match(m) => m.user_id.as_deref(),
            FeedMessage::Change(m) => m.user_id.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeedMessage::Subscriptions(_) => "subscriptions",
            FeedMessage::Heartbeat(_) => "heartbeat",
            FeedMessage::Received(_) => "received",
            FeedMessage::Open(_) => "open",
            FeedMessage::Done(_) => "done",
            FeedMessage::Match(_) => "match",
            FeedMessage::Change(_) => "change",
            FeedMessage::Ticker(_) => "ticker",
            FeedMessage::Error(_) => "error",
            FeedMessage::Unknown => "unknown",
        }
    }

    /// Every order id the message refers to, in lookup priority order.
    pub fn order_ids(&self) -> Vec<&str> {
        match self {
            FeedMessage::Received(m) => {
                let mut ids = Vec::with_capacity(2);
                if let Some(oid) = m.client_oid.as_deref() {
                    ids.push(oid);
                }
                ids.push(m.order_id.as_str());
                ids
            }
            FeedMessage::Open(m) => vec![m.order_id.as_str()],
            FeedMessage::Done(m) => vec![m.order_id.as_str()],
            FeedMessage::Change(m) => vec![m.order_id.as_str()],
            FeedMessage::Match(m) => vec![m.maker_order_id.as_str(), m.taker_order_id.as_str()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriptions {
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sequence: u64,
    #[serde(default)]
    pub last_trade_id: Option<u64>,
    pub product_id: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// An order was accepted by the matching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Received {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub funds: Option<Decimal>,
    #[serde(default)]
    pub client_oid: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// An order is now resting on the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenMsg {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub remaining_size: Decimal,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// An order left the book. Market orders carry no price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Done {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
    pub reason: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub remaining_size: Option<Decimal>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// A trade between a resting maker order and an incoming taker order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub sequence: u64,
    pub product_id: String,
    #[serde(default)]
    pub trade_id: Option<u64>,
    pub maker_order_id: String,
    pub taker_order_id: String,
    /// Side of the maker order.
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
    #[serde(default)]
    pub new_size: Option<Decimal>,
    #[serde(default)]
    pub old_size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMsg {
    #[serde(default)]
    pub sequence: Option<u64>,
    pub product_id: String,
    pub price: Decimal,
    #[serde(default)]
    pub best_bid: Option<Decimal>,
    #[serde(default)]
    pub best_ask: Option<Decimal>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedError {
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_match() {
        let json = r#"{
            "type": "match", "trade_id": 10, "sequence": 50,
            "maker_order_id": "ac928c66-ca53-498f-9c13-a110027a60e8",
            "taker_order_id": "132fb6ae-456b-4654-b4e0-d681ac05cea1",
            "time": "2014-11-07T08:19:27.028459Z", "product_id": "BTC-USD",
            "size": "5.23512", "price": "400.23", "side": "sell"
        }"#;
        let msg: FeedMessage = serde_json::from_str(json).unwrap();
        match &msg {
            FeedMessage::Match(m) => {
                assert_eq!(m.size, dec!(5.23512));
                assert_eq!(m.price, dec!(400.23));
                assert_eq!(m.side, Side::Sell);
            }
            other => panic!("Expected match, got {:?}", other),
        }
        assert_eq!(msg.sequence(), Some(50));
        assert!(msg.user_id().is_none());
    }

    #[test]
    fn test_decode_done_without_price() {
        let json = r#"{"type":"done","sequence":10,"product_id":"BTC-USD","order_id":"d50ec984","reason":"filled","side":"buy"}"#;
        let msg: FeedMessage = serde_json::from_str(json).unwrap();
        match msg {
            FeedMessage::Done(d) => assert!(d.price.is_none()),
            other => panic!("Expected done, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let json = r#"{"type":"activate","product_id":"BTC-USD"}"#;
        let msg: FeedMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, FeedMessage::Unknown);
        assert_eq!(msg.sequence(), None);
    }

    #[test]
    fn test_received_order_ids_prefer_client_oid() {
        let json = r#"{"type":"received","sequence":3,"product_id":"ETH-USD","order_id":"abc","side":"buy","client_oid":"my-oid","user_id":"u1"}"#;
        let msg: FeedMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.order_ids(), vec!["my-oid", "abc"]);
        assert_eq!(msg.user_id(), Some("u1"));
    }
}
