use async_trait::async_trait;
use blockhead_core::*;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Most candles the exchange returns for one request.
pub const MAX_CANDLES_PER_REQUEST: usize = 300;

/// An [`Exchange`] serving canned market data.
///
/// Reads come from the data it was built with; order entry is refused with
/// [`ExchangeError::Unsupported`]. Scripted failures can be queued for the
/// candle endpoint to exercise retry paths.
#[derive(Debug, Default)]
pub struct StaticMarket {
    products: Vec<Product>,
    tickers: HashMap<String, Ticker>,
    accounts: Vec<Account>,
    open_orders: Vec<OpenOrder>,
    books: HashMap<String, BookSnapshot>,
    candles: HashMap<String, Vec<Candle>>,
    candle_failures: Mutex<VecDeque<ExchangeError>>,
    /// Keyed by 1-based candle request number.
    scripted_failures: Mutex<BTreeMap<usize, ExchangeError>>,
    candle_requests: AtomicUsize,
    book_requests: AtomicUsize,
}

impl StaticMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product_id: &str) -> Self {
        let (base, quote) = split_pair(product_id).unwrap_or((product_id, ""));
        self.products.push(Product {
            id: product_id.to_string(),
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            base_min_size: None,
            base_max_size: None,
            quote_increment: None,
        });
        self
    }

    pub fn with_ticker(mut self, product_id: &str, ticker: Ticker) -> Self {
        self.tickers.insert(product_id.to_string(), ticker);
        self
    }

    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn with_open_order(mut self, order: OpenOrder) -> Self {
        self.open_orders.push(order);
        self
    }

    pub fn with_book(mut self, product_id: &str, book: BookSnapshot) -> Self {
        self.books.insert(product_id.to_string(), book);
        self
    }

    pub fn with_candles(mut self, product_id: &str, candles: Vec<Candle>) -> Self {
        self.candles.entry(product_id.to_string()).or_default().extend(candles);
        self
    }

    /// Queue an error returned by the next candle request instead of data.
    pub async fn fail_next_candles(&self, err: ExchangeError) {
        self.candle_failures.lock().await.push_back(err);
    }

    /// Fail the `nth` candle request (counting from 1) with `err`.
    pub async fn fail_candles_at(&self, nth: usize, err: ExchangeError) {
        self.scripted_failures.lock().await.insert(nth, err);
    }

    /// Replace the snapshot served for a product.
    pub fn set_book(&mut self, product_id: &str, book: BookSnapshot) {
        self.books.insert(product_id.to_string(), book);
    }

    pub fn candle_requests(&self) -> usize {
        self.candle_requests.load(Ordering::SeqCst)
    }

    pub fn book_requests(&self) -> usize {
        self.book_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchange for StaticMarket {
    async fn products(&self) -> Result<Vec<Product>, ExchangeError> {
        Ok(self.products.clone())
    }

    async fn ticker(&self, product_id: &str) -> Result<Ticker, ExchangeError> {
        self.tickers
            .get(product_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("No ticker for {}", product_id)))
    }

    async fn accounts(&self) -> Result<Vec<Account>, ExchangeError> {
        Ok(self.accounts.clone())
    }

    async fn open_orders(&self, product_id: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(self
            .open_orders
            .iter()
            .filter(|o| o.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn order_book_l3(&self, product_id: &str) -> Result<BookSnapshot, ExchangeError> {
        self.book_requests.fetch_add(1, Ordering::SeqCst);
        self.books
            .get(product_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("No book for {}", product_id)))
    }

    /// Candles with `start <= open_time <= end`, newest first, as the exchange returns them.
    async fn candles(
        &self,
        product_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _granularity: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let nth = self.candle_requests.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.scripted_failures.lock().await.remove(&nth) {
            return Err(err);
        }
        if let Some(err) = self.candle_failures.lock().await.pop_front() {
            return Err(err);
        }

        let mut rows: Vec<Candle> = self
            .candles
            .get(product_id)
            .map(|all| {
                all.iter()
                    .filter(|c| c.open_time >= start && c.open_time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| b.open_time.cmp(&a.open_time));
        rows.truncate(MAX_CANDLES_PER_REQUEST);
        Ok(rows)
    }

    async fn place_limit_order(&self, _req: &LimitOrderRequest) -> Result<PlacedOrder, ExchangeError> {
        Err(ExchangeError::Unsupported("static market does not accept orders".to_string()))
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<String, ExchangeError> {
        Err(ExchangeError::Unsupported("static market does not accept orders".to_string()))
    }

    async fn cancel_all(&self, _product_id: &str) -> Result<Vec<String>, ExchangeError> {
        Err(ExchangeError::Unsupported("static market does not accept orders".to_string()))
    }
}
