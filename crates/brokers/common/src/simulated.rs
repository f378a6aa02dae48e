use async_trait::async_trait;
use blockhead_core::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// An order accepted by the paper exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub id: String,
    pub client_oid: Uuid,
    pub product_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PaperOrder {
    fn to_open_order(&self) -> OpenOrder {
        OpenOrder {
            id: self.id.clone(),
            product_id: self.product_id.clone(),
            side: self.side,
            price: self.price,
            size: self.size,
            filled_size: Some(Decimal::ZERO),
            status: Some("open".to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    /// Resting orders keyed by exchange id.
    open: BTreeMap<String, PaperOrder>,
    cancelled: Vec<PaperOrder>,
    updates: Vec<FeedMessage>,
}

impl PaperState {
    fn cancel(&mut self, order_id: &str) -> Option<String> {
        let order = self.open.remove(order_id)?;
        self.updates.push(FeedMessage::Done(Done {
            sequence: 0,
            product_id: order.product_id.clone(),
            order_id: order.id.clone(),
            side: order.side,
            reason: "canceled".to_string(),
            price: Some(order.price),
            remaining_size: Some(order.size),
            user_id: Some(PAPER_USER.to_string()),
            time: Some(Utc::now()),
        }));
        let id = order.id.clone();
        self.cancelled.push(order);
        Some(id)
    }
}

/// User id on the order updates the paper exchange raises.
pub const PAPER_USER: &str = "paper";

/// Paper trading exchange.
///
/// Market data and balances are read from the wrapped exchange; order entry
/// is simulated locally so nothing reaches the real account. Placed orders
/// rest until cancelled, and each cancel queues the `done` message the feed
/// would have sent.
pub struct PaperExchange {
    inner: Arc<dyn Exchange>,
    balances: Option<Vec<Account>>,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(inner: Arc<dyn Exchange>) -> Self {
        Self {
            inner,
            balances: None,
            state: Mutex::new(PaperState::default()),
        }
    }

    /// Serve these balances instead of the wrapped exchange's accounts.
    pub fn with_balances(mut self, balances: Vec<Account>) -> Self {
        self.balances = Some(balances);
        self
    }

    /// Orders currently resting, oldest id first.
    pub async fn orders(&self) -> Vec<PaperOrder> {
        self.state.lock().await.open.values().cloned().collect()
    }

    pub async fn cancelled(&self) -> Vec<PaperOrder> {
        self.state.lock().await.cancelled.clone()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn products(&self) -> Result<Vec<Product>, ExchangeError> {
        self.inner.products().await
    }

    async fn ticker(&self, product_id: &str) -> Result<Ticker, ExchangeError> {
        self.inner.ticker(product_id).await
    }

    async fn accounts(&self) -> Result<Vec<Account>, ExchangeError> {
        match &self.balances {
            Some(balances) => Ok(balances.clone()),
            None => self.inner.accounts().await,
        }
    }

    async fn open_orders(&self, product_id: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(state
            .open
            .values()
            .filter(|o| o.product_id == product_id)
            .map(PaperOrder::to_open_order)
            .collect())
    }

    async fn order_book_l3(&self, product_id: &str) -> Result<BookSnapshot, ExchangeError> {
        self.inner.order_book_l3(product_id).await
    }

    async fn candles(
        &self,
        product_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.inner.candles(product_id, start, end, granularity).await
    }

    async fn place_limit_order(&self, req: &LimitOrderRequest) -> Result<PlacedOrder, ExchangeError> {
        if req.size <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!("size {} must be positive", req.size)));
        }
        if req.price <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!("price {} must be positive", req.price)));
        }

        let order = PaperOrder {
            id: Uuid::new_v4().to_string(),
            client_oid: req.client_oid,
            product_id: req.product_id.clone(),
            side: req.side,
            price: req.price,
            size: req.size,
            created_at: Utc::now(),
        };
        info!(
            id = %order.id,
            product = %order.product_id,
            side = %order.side,
            price = %order.price,
            size = %order.size,
            "Paper order placed"
        );

        let placed = PlacedOrder {
            id: order.id.clone(),
            client_oid: Some(req.client_oid.to_string()),
            product_id: order.product_id.clone(),
            side: order.side,
            price: Some(order.price),
            size: order.size,
            status: Some("pending".to_string()),
        };
        self.state.lock().await.open.insert(order.id.clone(), order);
        Ok(placed)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<String, ExchangeError> {
        let id = self
            .state
            .lock()
            .await
            .cancel(order_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("order {}", order_id)))?;
        info!(%id, "Paper order cancelled");
        Ok(id)
    }

    async fn cancel_all(&self, product_id: &str) -> Result<Vec<String>, ExchangeError> {
        let mut state = self.state.lock().await;
        let ids: Vec<String> = state
            .open
            .values()
            .filter(|o| o.product_id == product_id)
            .map(|o| o.id.clone())
            .collect();
        for id in &ids {
            state.cancel(id);
        }
        info!(product = product_id, count = ids.len(), "Paper orders cancelled");
        Ok(ids)
    }

    async fn take_order_updates(&self) -> Vec<FeedMessage> {
        std::mem::take(&mut self.state.lock().await.updates)
    }
}
