use blockhead_core::*;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::bars::BarBuilder;
use crate::book::OrderBook;

/// What a handled feed message means to the rest of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TickEvent {
    /// The first message was applied to a synced book.
    Initialized,
    /// Messages were missed; the book was reloaded from a snapshot.
    Resynced { from: u64, to: u64 },
    /// A message about one of the account's own orders.
    OrderUpdate(FeedMessage),
}

/// Live market state for one product, built from the full channel.
///
/// Keeps the level-3 book in sequence with the feed, turns matches into bars
/// and picks out messages about the account's own orders.
#[derive(Debug)]
pub struct TickData {
    product_id: String,
    book: OrderBook,
    bars: BarBuilder,
    initialized: bool,
    last_match: Option<Match>,
    message_count: u64,
}

impl TickData {
    pub fn new(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            book: OrderBook::new(),
            bars: BarBuilder::new(),
            initialized: false,
            last_match: None,
            message_count: 0,
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_match(&self) -> Option<&Match> {
        self.last_match.as_ref()
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn best_bid(&self) -> Option<rust_decimal::Decimal> {
        self.book.best_bid()
    }

    pub fn best_ask(&self) -> Option<rust_decimal::Decimal> {
        self.book.best_ask()
    }

    /// Seeds the bar builder so a quiet first interval still yields a bar.
    pub fn seed_close(&mut self, close: rust_decimal::Decimal) {
        if self.bars.is_empty() {
            self.bars = BarBuilder::with_prev_close(close);
        }
    }

    /// Called when a feed connection opens. The book is resynced on the next message.
    pub fn on_open(&mut self) {
        self.book.forget_sequence();
        self.message_count = 0;
        debug!(product = %self.product_id, "Feed opened, book will resync");
    }

    /// Closes the bar in progress.
    pub fn close_bar(&mut self, close_time: DateTime<Utc>, interval: Duration) -> Option<Bar> {
        self.bars.close_bar(&self.product_id, close_time, interval)
    }

    async fn reset_book(&mut self, exchange: &dyn Exchange) -> Result<(), ExchangeError> {
        let snapshot = exchange.order_book_l3(&self.product_id).await?;
        debug!(
            product = %self.product_id,
            sequence = snapshot.sequence,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Reset order book"
        );
        self.book.reset(snapshot);
        Ok(())
    }

    /// Applies one feed message.
    ///
    /// An unsynced book is reloaded from a snapshot and the triggering message
    /// dropped. Messages at or below the book's sequence are stale and ignored;
    /// a jump past the next sequence reloads the book.
    pub async fn handle_message(
        &mut self,
        exchange: &dyn Exchange,
        msg: &FeedMessage,
    ) -> Result<Vec<TickEvent>, ExchangeError> {
        self.message_count += 1;

        let Some(current) = self.book.sequence() else {
            self.reset_book(exchange).await?;
            return Ok(Vec::new());
        };

        let sequence = msg.sequence();
        if let Some(seq) = sequence {
            if seq <= current {
                return Ok(Vec::new());
            }
            if seq > current + 1 {
                self.reset_book(exchange).await?;
                error!(
                    gap_start = current,
                    gap_end = seq,
                    resync_sequence = ?self.book.sequence(),
                    "Messages missing, re-initialized book"
                );
                return Ok(vec![TickEvent::Resynced { from: current, to: seq }]);
            }
        }

        self.apply(msg);
        if let Some(seq) = sequence {
            self.book.set_sequence(seq);
        }

        let mut events = Vec::new();
        if !self.initialized {
            self.initialized = true;
            debug!(product = %self.product_id, "Tick data is initialized");
            events.push(TickEvent::Initialized);
        }
        if msg.user_id().is_some() {
            events.push(TickEvent::OrderUpdate(msg.clone()));
        }
        Ok(events)
    }

    fn apply(&mut self, msg: &FeedMessage) {
        match msg {
            FeedMessage::Open(m) => {
                self.book.add(m.order_id.clone(), m.side, m.price, m.remaining_size);
            }
            FeedMessage::Done(m) => {
                if let Some(price) = m.price {
                    self.book.remove(&m.order_id, m.side, price);
                }
            }
            FeedMessage::Match(m) => {
                if let Err(e) = self.book.apply_match(&m.maker_order_id, m.side, m.price, m.size) {
                    warn!(error = %e, sequence = m.sequence, "Ignoring inconsistent match");
                }
                self.bars.handle_close(m.price, m.size);
                self.last_match = Some(m.clone());
            }
            FeedMessage::Change(m) => {
                if let (Some(price), Some(new_size)) = (m.price, m.new_size) {
                    self.book.change(&m.order_id, m.side, price, new_size);
                }
            }
            FeedMessage::Error(e) => {
                error!(reason = ?e.reason, "Feed error: {}", e.message);
            }
            FeedMessage::Subscriptions(s) => {
                info!("Subscriptions");
                for channel in &s.channels {
                    info!("{} - products: {}", channel.name, channel.product_ids.join(","));
                }
            }
            FeedMessage::Heartbeat(_) | FeedMessage::Received(_) | FeedMessage::Ticker(_) => {}
            FeedMessage::Unknown => debug!("Ignoring unknown message"),
        }
    }
}
