use blockhead_core::{BookEntry, BookSnapshot, Side};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Inconsistencies found while applying feed updates to the book.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("match for maker {maker} but {head} is first at {side} {price}")]
    MakerNotAtHead {
        maker: String,
        head: String,
        side: Side,
        price: Decimal,
    },
    #[error("match of {size} exceeds maker {maker} size {available}")]
    Overfill {
        maker: String,
        size: Decimal,
        available: Decimal,
    },
}

/// One resting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookOrder {
    pub id: String,
    pub price: Decimal,
    pub size: Decimal,
}

/// One side of the book: price levels holding orders in arrival order.
#[derive(Debug, Clone, Default)]
struct BookSide {
    levels: BTreeMap<Decimal, Vec<BookOrder>>,
}

impl BookSide {
    fn add(&mut self, order: BookOrder) {
        self.levels.entry(order.price).or_default().push(order);
    }

    fn remove(&mut self, id: &str, price: Decimal) -> Option<BookOrder> {
        let level = self.levels.get_mut(&price)?;
        let idx = level.iter().position(|o| o.id == id)?;
        let order = level.remove(idx);
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(order)
    }

    fn order_count(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    fn entries(&self) -> Vec<BookEntry> {
        self.levels
            .values()
            .flatten()
            .map(|o| BookEntry {
                price: o.price,
                size: o.size,
                order_id: o.id.clone(),
            })
            .collect()
    }
}

/// Level-3 order book for a single product.
///
/// Every resting order is tracked individually. Levels are dropped as soon as
/// their last order leaves.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BookSide,
    asks: BookSide,
    sequence: Option<u64>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole book with a snapshot.
    pub fn reset(&mut self, snapshot: BookSnapshot) {
        self.bids = BookSide::default();
        self.asks = BookSide::default();
        for entry in snapshot.bids {
            self.add(entry.order_id, Side::Buy, entry.price, entry.size);
        }
        for entry in snapshot.asks {
            self.add(entry.order_id, Side::Sell, entry.price, entry.size);
        }
        self.sequence = Some(snapshot.sequence);
    }

    /// Sequence of the last applied update, `None` before the first snapshot.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = Some(sequence);
    }

    /// Marks the book stale; the next feed message triggers a resync.
    pub fn forget_sequence(&mut self) {
        self.sequence = None;
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub fn add(&mut self, id: impl Into<String>, side: Side, price: Decimal, size: Decimal) {
        self.side_mut(side).add(BookOrder {
            id: id.into(),
            price,
            size,
        });
    }

    /// Removes an order; unknown orders are ignored.
    pub fn remove(&mut self, id: &str, side: Side, price: Decimal) -> Option<BookOrder> {
        self.side_mut(side).remove(id, price)
    }

    /// Applies a trade against the maker order at the head of its level.
    ///
    /// `side` is the maker's side. A trade at a price with no resting orders
    /// is ignored.
    pub fn apply_match(&mut self, maker_id: &str, side: Side, price: Decimal, size: Decimal) -> Result<(), BookError> {
        let book_side = self.side_mut(side);
        let Some(level) = book_side.levels.get_mut(&price) else {
            return Ok(());
        };
        let Some(head) = level.first_mut() else {
            return Ok(());
        };
        if head.id != maker_id {
            return Err(BookError::MakerNotAtHead {
                maker: maker_id.to_string(),
                head: head.id.clone(),
                side,
                price,
            });
        }
        if size > head.size {
            return Err(BookError::Overfill {
                maker: maker_id.to_string(),
                size,
                available: head.size,
            });
        }

        head.size -= size;
        if head.size.is_zero() {
            level.remove(0);
            if level.is_empty() {
                book_side.levels.remove(&price);
            }
        }
        Ok(())
    }

    /// Resizes a resting order in place, keeping its queue position.
    /// Returns false when the order is not on the book.
    pub fn change(&mut self, id: &str, side: Side, price: Decimal, new_size: Decimal) -> bool {
        let Some(level) = self.side_mut(side).levels.get_mut(&price) else {
            return false;
        };
        match level.iter_mut().find(|o| o.id == id) {
            Some(order) => {
                order.size = new_size;
                true
            }
            None => false,
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.levels.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.levels.keys().next().copied()
    }

    /// Inside price an order on `side` would join: the bid for buys, the ask for sells.
    pub fn inside(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Buy => self.best_bid(),
            Side::Sell => self.best_ask(),
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Orders at one price, in queue order.
    pub fn level(&self, side: Side, price: Decimal) -> &[BookOrder] {
        self.side(side)
            .levels
            .get(&price)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn order_count(&self) -> usize {
        self.bids.order_count() + self.asks.order_count()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.levels.is_empty() && self.asks.levels.is_empty()
    }

    /// Snapshot of the book, both sides ascending by price.
    pub fn current_book(&self) -> BookSnapshot {
        BookSnapshot {
            sequence: self.sequence.unwrap_or_default(),
            bids: self.bids.entries(),
            asks: self.asks.entries(),
        }
    }
}
