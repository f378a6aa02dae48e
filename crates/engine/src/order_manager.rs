use blockhead_core::*;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::book::OrderBook;

/// Fills are tracked to this many decimal places.
const FILL_SCALE: u32 = 5;

/// Errors raised while working orders.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("No inside {0} price to join")]
    NoInsidePrice(Side),
    #[error("Order size must be non-zero")]
    ZeroSize,
    #[error("Unknown order {0}")]
    UnknownOrder(Uuid),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Lifecycle of a managed order as seen on the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Initial,
    Received,
    Open,
    Done,
}

/// An order placed on the exchange and tracked through its feed updates.
#[derive(Debug, Clone)]
pub struct ManagedOrder {
    /// Signed size: positive buys, negative sells.
    pub size: Decimal,
    pub pair: String,
    pub limit_price: Option<Decimal>,
    pub total: Decimal,
    pub outstanding: Decimal,
    pub placed: Decimal,
    pub filled: Decimal,
    pub state: OrderState,
    pub done_reason: Option<String>,
    pub client_oid: Uuid,
    pub order_id: Option<String>,
}

impl ManagedOrder {
    pub fn new(size: Decimal, pair: &str, limit_price: Option<Decimal>) -> Self {
        Self {
            size,
            pair: pair.to_string(),
            limit_price,
            total: size.abs(),
            outstanding: size.abs(),
            placed: Decimal::ZERO,
            filled: Decimal::ZERO,
            state: OrderState::Initial,
            done_reason: None,
            client_oid: Uuid::new_v4(),
            order_id: None,
        }
    }

    pub fn side(&self) -> Side {
        Side::from_signed(self.size)
    }

    pub fn remaining(&self) -> Decimal {
        (self.total - self.filled).max(Decimal::ZERO)
    }

    pub fn is_filled(&self) -> bool {
        self.filled >= self.total
    }

    pub fn is_done(&self) -> bool {
        self.state == OrderState::Done
    }

    /// Updates state from a feed message about this order.
    pub fn handle_update(&mut self, msg: &FeedMessage) {
        match msg {
            FeedMessage::Received(_) => {
                debug!(client_oid = %self.client_oid, "Order received");
                self.state = OrderState::Received;
            }
            FeedMessage::Open(_) => {
                debug!(client_oid = %self.client_oid, "Order went active");
                self.state = OrderState::Open;
            }
            FeedMessage::Match(m) => {
                self.filled = (self.filled + m.size).round_dp(FILL_SCALE);
                self.outstanding = self.remaining();
                debug!(client_oid = %self.client_oid, filled = %self.filled, "Order matched");
                if self.is_filled() {
                    debug!(client_oid = %self.client_oid, "Order completed");
                }
            }
            FeedMessage::Done(d) => {
                debug!(client_oid = %self.client_oid, reason = %d.reason, "Order done");
                self.state = OrderState::Done;
                self.done_reason = Some(d.reason.clone());
            }
            _ => {}
        }
    }
}

impl fmt::Display for ManagedOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Order size: {}, o: {}, lp: {:?}, p: {}, f: {}, s: {:?}>",
            self.size, self.outstanding, self.limit_price, self.placed, self.filled, self.state
        )
    }
}

/// Tracks the account's resting orders for one pair and works new ones.
///
/// Orders added before the book is initialized are queued and placed by
/// [`OrderManager::on_initialized`].
#[derive(Debug)]
pub struct OrderManager {
    pair: String,
    buys: BTreeMap<Decimal, Vec<OpenOrder>>,
    sells: BTreeMap<Decimal, Vec<OpenOrder>>,
    buy_qty: Decimal,
    sell_qty: Decimal,
    orders: HashMap<Uuid, ManagedOrder>,
    /// client_oid strings and exchange ids -> client_oid
    lookup: HashMap<String, Uuid>,
    pending: Vec<Uuid>,
    initialized: bool,
}

impl OrderManager {
    pub fn new(pair: &str) -> Self {
        Self {
            pair: pair.to_string(),
            buys: BTreeMap::new(),
            sells: BTreeMap::new(),
            buy_qty: Decimal::ZERO,
            sell_qty: Decimal::ZERO,
            orders: HashMap::new(),
            lookup: HashMap::new(),
            pending: Vec::new(),
            initialized: false,
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn buy_qty(&self) -> Decimal {
        self.buy_qty
    }

    pub fn sell_qty(&self) -> Decimal {
        self.sell_qty
    }

    pub fn buys(&self) -> &BTreeMap<Decimal, Vec<OpenOrder>> {
        &self.buys
    }

    pub fn sells(&self) -> &BTreeMap<Decimal, Vec<OpenOrder>> {
        &self.sells
    }

    pub fn order(&self, client_oid: &Uuid) -> Option<&ManagedOrder> {
        self.orders.get(client_oid)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Loads the resting orders for the pair from the exchange.
    pub async fn init(&mut self, exchange: &dyn Exchange) -> Result<(), ExchangeError> {
        let orders = exchange.open_orders(&self.pair).await?;
        debug!(count = orders.len(), "Outstanding orders");
        self.buys.clear();
        self.sells.clear();
        for order in orders {
            self.track_resting(order);
        }
        self.recount();
        Ok(())
    }

    fn track_resting(&mut self, order: OpenOrder) {
        let side = match order.side {
            Side::Buy => &mut self.buys,
            Side::Sell => &mut self.sells,
        };
        side.entry(order.price).or_default().push(order);
    }

    fn untrack_resting(&mut self, order_id: &str) {
        for side in [&mut self.buys, &mut self.sells] {
            for level in side.values_mut() {
                level.retain(|o| o.id != order_id);
            }
            side.retain(|_, level| !level.is_empty());
        }
        self.recount();
    }

    fn recount(&mut self) {
        self.buy_qty = self.buys.values().flatten().map(|o| o.size).sum();
        self.sell_qty = self.sells.values().flatten().map(|o| o.size).sum();
    }

    /// Adds an order for a signed size. It is placed immediately when the book
    /// is initialized, otherwise queued.
    pub async fn add_order(
        &mut self,
        exchange: &dyn Exchange,
        book: &OrderBook,
        size: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<Uuid, OrderError> {
        if size.is_zero() {
            return Err(OrderError::ZeroSize);
        }
        let order = ManagedOrder::new(size, &self.pair, limit_price);
        let client_oid = order.client_oid;
        self.lookup.insert(client_oid.to_string(), client_oid);
        self.orders.insert(client_oid, order);

        if self.initialized {
            if let Err(e) = self.begin(exchange, book, client_oid).await {
                self.forget(client_oid);
                return Err(e);
            }
        } else {
            debug!(%client_oid, "Queueing order until the book is initialized");
            self.pending.push(client_oid);
        }
        Ok(client_oid)
    }

    /// Places every queued order. A failed order is logged and dropped, and
    /// does not stop the rest.
    pub async fn on_initialized(&mut self, exchange: &dyn Exchange, book: &OrderBook) -> usize {
        self.initialized = true;
        let mut placed = 0;
        for client_oid in std::mem::take(&mut self.pending) {
            match self.begin(exchange, book, client_oid).await {
                Ok(_) => placed += 1,
                Err(e) => {
                    error!(%client_oid, error = %e, "Failed to place queued order");
                    self.forget(client_oid);
                }
            }
        }
        placed
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn forget(&mut self, client_oid: Uuid) {
        self.orders.remove(&client_oid);
        self.lookup.retain(|_, oid| *oid != client_oid);
    }

    /// Places the order as a post-only limit at its limit price or the inside quote.
    async fn begin(&mut self, exchange: &dyn Exchange, book: &OrderBook, client_oid: Uuid) -> Result<PlacedOrder, OrderError> {
        let order = self
            .orders
            .get_mut(&client_oid)
            .ok_or(OrderError::UnknownOrder(client_oid))?;
        let side = order.side();
        let price = match order.limit_price {
            Some(price) => price,
            None => book.inside(side).ok_or(OrderError::NoInsidePrice(side))?,
        };
        order.limit_price = Some(price);
        debug!("Placing order: {}", order);

        let req = LimitOrderRequest::passive(client_oid, &order.pair, side, price, order.total);
        let placed = exchange.place_limit_order(&req).await?;
        order.placed = placed.size;
        order.order_id = Some(placed.id.clone());
        info!(id = %placed.id, %side, %price, size = %placed.size, "Order placed");

        self.lookup.insert(placed.id.clone(), client_oid);
        self.track_resting(OpenOrder {
            id: placed.id.clone(),
            product_id: placed.product_id.clone(),
            side,
            price,
            size: placed.size,
            filled_size: None,
            status: placed.status.clone(),
        });
        self.recount();
        Ok(placed)
    }

    /// Cancels every order for the pair, including ones this manager did not place.
    pub async fn cancel_all(&mut self, exchange: &dyn Exchange) -> Result<Vec<String>, ExchangeError> {
        let ids = exchange.cancel_all(&self.pair).await?;
        for id in &ids {
            self.untrack_resting(id);
        }
        Ok(ids)
    }

    pub async fn cancel_buys(&mut self, exchange: &dyn Exchange) -> Result<Vec<String>, ExchangeError> {
        let ids = self.buys.values().flatten().map(|o| o.id.clone()).collect();
        self.cancel_ids(exchange, ids).await
    }

    pub async fn cancel_sells(&mut self, exchange: &dyn Exchange) -> Result<Vec<String>, ExchangeError> {
        let ids = self.sells.values().flatten().map(|o| o.id.clone()).collect();
        self.cancel_ids(exchange, ids).await
    }

    /// Cancels the buy orders resting at `price`.
    pub async fn cancel_buy(&mut self, exchange: &dyn Exchange, price: Decimal) -> Result<Vec<String>, ExchangeError> {
        let ids = self.buys.get(&price).into_iter().flatten().map(|o| o.id.clone()).collect();
        self.cancel_ids(exchange, ids).await
    }

    /// Cancels the sell orders resting at `price`.
    pub async fn cancel_sell(&mut self, exchange: &dyn Exchange, price: Decimal) -> Result<Vec<String>, ExchangeError> {
        let ids = self.sells.get(&price).into_iter().flatten().map(|o| o.id.clone()).collect();
        self.cancel_ids(exchange, ids).await
    }

    async fn cancel_ids(&mut self, exchange: &dyn Exchange, ids: Vec<String>) -> Result<Vec<String>, ExchangeError> {
        let mut cancelled = Vec::with_capacity(ids.len());
        for id in ids {
            cancelled.push(exchange.cancel_order(&id).await?);
            self.untrack_resting(&id);
        }
        Ok(cancelled)
    }

    /// Cancels one managed order. A queued order is dropped without touching the exchange.
    pub async fn cancel(&mut self, exchange: &dyn Exchange, client_oid: Uuid) -> Result<(), OrderError> {
        let order = self
            .orders
            .get_mut(&client_oid)
            .ok_or(OrderError::UnknownOrder(client_oid))?;

        match order.order_id.clone() {
            Some(id) => {
                exchange.cancel_order(&id).await?;
                self.untrack_resting(&id);
            }
            None => {
                self.pending.retain(|oid| *oid != client_oid);
                order.state = OrderState::Done;
                order.done_reason = Some("canceled".to_string());
            }
        }
        Ok(())
    }

    /// Routes a feed message about one of the account's orders to the order
    /// it belongs to. Returns that order's client_oid.
    pub fn handle_order_update(&mut self, msg: &FeedMessage) -> Option<Uuid> {
        debug!(kind = msg.kind(), "Order update");
        let Some(client_oid) = msg.order_ids().into_iter().find_map(|id| self.lookup.get(id).copied()) else {
            error!(?msg, "Could not find matching order");
            return None;
        };

        // the feed may report the exchange id before the placement call returns
        if let FeedMessage::Received(r) = msg {
            self.lookup.insert(r.order_id.clone(), client_oid);
        }

        let order = self.orders.get_mut(&client_oid)?;
        if order.order_id.is_none() {
            if let FeedMessage::Received(r) = msg {
                order.order_id = Some(r.order_id.clone());
            }
        }
        order.handle_update(msg);

        if order.is_done() {
            if let Some(id) = order.order_id.clone() {
                self.untrack_resting(&id);
            }
        }
        Some(client_oid)
    }
}

impl fmt::Display for OrderManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |side: &BTreeMap<Decimal, Vec<OpenOrder>>| {
            side.values()
                .flatten()
                .map(|o| format!("{}@{}", o.size, o.price))
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(
            f,
            "Buys: {} {} Sells: {} {}",
            self.buy_qty,
            describe(&self.buys),
            self.sell_qty,
            describe(&self.sells)
        )
    }
}
