use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use blockhead_brokers_gdax::{Credential, GdaxFeed, DEFAULT_CHANNELS};
use blockhead_core::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::order_manager::{OrderError, OrderManager};
use crate::tick_data::{TickData, TickEvent};
use crate::trade_log::TradeLog;

/// Whether the session keeps running after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// What a handler can see and do from inside a callback.
pub struct LiveContext<'a> {
    pub exchange: &'a dyn Exchange,
    pub tick: &'a TickData,
    pub orders: &'a mut OrderManager,
}

impl LiveContext<'_> {
    /// Works a new order for a signed size at `limit_price` or the inside quote.
    pub async fn add_order(&mut self, size: Decimal, limit_price: Option<Decimal>) -> Result<Uuid, OrderError> {
        self.orders
            .add_order(self.exchange, self.tick.book(), size, limit_price)
            .await
    }
}

/// Callbacks driven by a [`LiveSession`]. Every method defaults to doing nothing.
///
/// Errors are logged by the session and do not end it; return
/// [`Control::Stop`] to end it.
#[async_trait]
pub trait LiveHandler: Send {
    /// Called once the resting orders are loaded, before the feed connects.
    async fn on_start(&mut self, _ctx: &mut LiveContext<'_>) -> Result<Control> {
        Ok(Control::Continue)
    }

    /// Called when the book is first in sequence with the feed.
    async fn on_initialized(&mut self, _ctx: &mut LiveContext<'_>) -> Result<Control> {
        Ok(Control::Continue)
    }

    /// Called at the end of every bar interval.
    async fn on_bar(&mut self, _bar: &Bar, _ctx: &mut LiveContext<'_>) -> Result<Control> {
        Ok(Control::Continue)
    }

    /// Called on the check timer, when one is configured.
    async fn on_check(&mut self, _ctx: &mut LiveContext<'_>) -> Result<Control> {
        Ok(Control::Continue)
    }

    /// Called for every feed message about the account's own orders, with the
    /// managed order it was routed to.
    async fn on_order_update(
        &mut self,
        _client_oid: Option<Uuid>,
        _msg: &FeedMessage,
        _ctx: &mut LiveContext<'_>,
    ) -> Result<Control> {
        Ok(Control::Continue)
    }
}

/// Settings for one live session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub product_id: String,
    pub ws_url: String,
    pub channels: Vec<String>,
    pub bar_interval: Duration,
    pub check_interval: Option<Duration>,
    pub trade_log: Option<PathBuf>,
    pub reconnect_delay: Duration,
    /// Consecutive failed connection attempts before giving up.
    pub max_reconnects: u32,
}

impl LiveConfig {
    pub fn new(product_id: &str, ws_url: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            ws_url: ws_url.to_string(),
            channels: DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect(),
            bar_interval: Duration::from_secs(60),
            check_interval: None,
            trade_log: None,
            reconnect_delay: Duration::from_secs(5),
            max_reconnects: 5,
        }
    }
}

/// Runs one product live: feed, book, bars, order updates and timers on a
/// single task.
pub struct LiveSession {
    config: LiveConfig,
    exchange: Arc<dyn Exchange>,
    credential: Option<Credential>,
    tick: TickData,
    orders: OrderManager,
    trade_log: Option<TradeLog>,
}

impl LiveSession {
    pub fn new(config: LiveConfig, exchange: Arc<dyn Exchange>, credential: Option<Credential>) -> Result<Self> {
        let trade_log = match &config.trade_log {
            Some(path) => Some(
                TradeLog::open(path).with_context(|| format!("Failed to open trade log {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            tick: TickData::new(&config.product_id),
            orders: OrderManager::new(&config.product_id),
            config,
            exchange,
            credential,
            trade_log,
        })
    }

    pub fn tick(&self) -> &TickData {
        &self.tick
    }

    pub fn tick_mut(&mut self) -> &mut TickData {
        &mut self.tick
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    fn context(&mut self) -> LiveContext<'_> {
        LiveContext {
            exchange: self.exchange.as_ref(),
            tick: &self.tick,
            orders: &mut self.orders,
        }
    }

    /// Loads resting orders and runs the handler's start callback.
    pub async fn start<H: LiveHandler + ?Sized>(&mut self, handler: &mut H) -> Result<Control> {
        self.orders
            .init(self.exchange.as_ref())
            .await
            .context("Failed to load open orders")?;
        debug!("{}", self.orders);
        let control = handler.on_start(&mut self.context()).await?;
        if control == Control::Stop {
            return Ok(control);
        }
        Ok(self.route_exchange_updates(handler).await)
    }

    /// Routes an update about one of the account's orders to the order
    /// manager and the handler.
    async fn order_update<H: LiveHandler + ?Sized>(&mut self, update: &FeedMessage, handler: &mut H) -> Control {
        let client_oid = self.orders.handle_order_update(update);
        let result = handler
            .on_order_update(client_oid, update, &mut self.context())
            .await;
        outcome("order update", result)
    }

    /// Delivers the updates the exchange raised itself, such as the paper
    /// exchange confirming a cancel, including any raised while handling them.
    async fn route_exchange_updates<H: LiveHandler + ?Sized>(&mut self, handler: &mut H) -> Control {
        loop {
            let updates = self.exchange.take_order_updates().await;
            if updates.is_empty() {
                return Control::Continue;
            }
            for update in updates {
                if self.order_update(&update, handler).await == Control::Stop {
                    return Control::Stop;
                }
            }
        }
    }

    /// Handles one feed message.
    pub async fn process<H: LiveHandler + ?Sized>(
        &mut self,
        raw: &str,
        msg: FeedMessage,
        handler: &mut H,
    ) -> Control {
        if let Some(log) = self.trade_log.as_mut() {
            if let Err(e) = log.record(raw) {
                warn!(error = %e, "Failed to write trade log");
            }
        }

        let events = match self.tick.handle_message(self.exchange.as_ref(), &msg).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to sync order book");
                return Control::Continue;
            }
        };

        for event in events {
            let control = match event {
                TickEvent::Initialized => {
                    let placed = self
                        .orders
                        .on_initialized(self.exchange.as_ref(), self.tick.book())
                        .await;
                    info!(placed, bid = ?self.tick.best_bid(), ask = ?self.tick.best_ask(), "Book initialized");
                    let result = handler.on_initialized(&mut self.context()).await;
                    outcome("initialized", result)
                }
                TickEvent::Resynced { from, to } => {
                    debug!(from, to, "Book resynced");
                    Control::Continue
                }
                TickEvent::OrderUpdate(update) => self.order_update(&update, handler).await,
            };
            if control == Control::Stop {
                return Control::Stop;
            }
        }
        self.route_exchange_updates(handler).await
    }

    /// Closes the bar ending at the interval boundary nearest `now`.
    pub async fn close_bar<H: LiveHandler + ?Sized>(&mut self, now: DateTime<Utc>, handler: &mut H) -> Control {
        debug!(message_count = self.tick.message_count(), "Bar timer");
        if let Some(log) = self.trade_log.as_mut() {
            if let Err(e) = log.flush() {
                warn!(error = %e, "Failed to flush trade log");
            }
        }

        let interval = chrono::Duration::from_std(self.config.bar_interval).unwrap_or(chrono::Duration::minutes(1));
        let close_time = round_to_interval(now, self.config.bar_interval);
        match self.tick.close_bar(close_time, interval) {
            Some(bar) => {
                let result = handler.on_bar(&bar, &mut self.context()).await;
                if outcome("bar", result) == Control::Stop {
                    return Control::Stop;
                }
                self.route_exchange_updates(handler).await
            }
            None => {
                debug!("No trades yet, no bar");
                Control::Continue
            }
        }
    }

    pub async fn check<H: LiveHandler + ?Sized>(&mut self, handler: &mut H) -> Control {
        let result = handler.on_check(&mut self.context()).await;
        if outcome("check", result) == Control::Stop {
            return Control::Stop;
        }
        self.route_exchange_updates(handler).await
    }

    async fn connect(&self) -> Result<GdaxFeed, ExchangeError> {
        GdaxFeed::connect(
            &self.config.ws_url,
            std::slice::from_ref(&self.config.product_id),
            &self.config.channels,
            self.credential.as_ref(),
        )
        .await
    }

    /// Runs until a handler stops the session or Ctrl-C is pressed.
    /// A closed feed is reconnected and the book resynced.
    pub async fn run<H: LiveHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        if self.start(handler).await? == Control::Stop {
            return Ok(());
        }

        let bar_period = self.config.bar_interval;
        let first_bar = Instant::now() + delay_to_next_boundary(Utc::now(), bar_period);
        let mut bar_timer = interval_at(first_bar, bar_period);
        bar_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let checking = self.config.check_interval.is_some();
        let check_period = self.config.check_interval.unwrap_or(Duration::from_secs(1));
        let mut check_timer = interval_at(Instant::now() + check_period, check_period);
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut failures = 0;
        loop {
            let mut feed = match self.connect().await {
                Ok(feed) => {
                    failures = 0;
                    feed
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.config.max_reconnects {
                        bail!("Giving up on feed after {} attempts: {}", failures, e);
                    }
                    warn!(error = %e, attempt = failures, "Feed connection failed");
                    if interrupted(&mut ctrl_c, self.config.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };
            self.tick.on_open();

            let control = loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        info!("Quitting");
                        break Control::Stop;
                    }
                    _ = bar_timer.tick() => {
                        if self.close_bar(Utc::now(), handler).await == Control::Stop {
                            break Control::Stop;
                        }
                    }
                    _ = check_timer.tick(), if checking => {
                        if self.check(handler).await == Control::Stop {
                            break Control::Stop;
                        }
                    }
                    next = feed.next() => match next {
                        Some(Ok((raw, msg))) => {
                            if self.process(&raw, msg, handler).await == Control::Stop {
                                break Control::Stop;
                            }
                        }
                        Some(Err(ExchangeError::Decode(e))) => warn!(error = %e, "Skipping undecodable message"),
                        Some(Err(e)) => {
                            warn!(error = %e, "Feed error, reconnecting");
                            break Control::Continue;
                        }
                        None => {
                            warn!("Feed closed, reconnecting");
                            break Control::Continue;
                        }
                    }
                }
            };

            feed.close().await;
            if control == Control::Stop || interrupted(&mut ctrl_c, self.config.reconnect_delay).await {
                break;
            }
        }

        if let Some(log) = self.trade_log.as_mut() {
            log.flush().context("Failed to flush trade log")?;
        }
        Ok(())
    }
}

/// Waits out the reconnect backoff. True when Ctrl-C arrives first.
async fn interrupted<F>(ctrl_c: &mut std::pin::Pin<&mut F>, delay: Duration) -> bool
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        _ = ctrl_c.as_mut() => {
            info!("Quitting");
            true
        }
        _ = tokio::time::sleep(delay) => false,
    }
}

fn outcome(what: &str, result: Result<Control>) -> Control {
    result.unwrap_or_else(|e| {
        error!(error = %e, "Handler failed on {}", what);
        Control::Continue
    })
}

fn period_secs(period: Duration) -> i64 {
    (period.as_secs() as i64).max(1)
}

/// Interval boundary closest to `now`, tolerating a timer that fires a little
/// early or late.
pub fn round_to_interval(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let secs = period_secs(period);
    let ts = now.timestamp() + secs / 2;
    DateTime::from_timestamp(ts - ts.rem_euclid(secs), 0).unwrap_or(now)
}

/// Time from `now` until the next interval boundary, e.g. the top of the minute.
pub fn delay_to_next_boundary(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period_secs(period) * 1000;
    let into = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis((period_ms - into) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockhead_brokers_common::{PaperExchange, StaticMarket};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        order: Option<Uuid>,
        initialized: usize,
        bars: Vec<Bar>,
        updates: Vec<(Option<Uuid>, &'static str)>,
        stop_on_bar: bool,
    }

    #[async_trait]
    impl LiveHandler for Recorder {
        async fn on_start(&mut self, ctx: &mut LiveContext<'_>) -> Result<Control> {
            self.order = Some(ctx.add_order(dec!(0.5), None).await?);
            Ok(Control::Continue)
        }

        async fn on_initialized(&mut self, _ctx: &mut LiveContext<'_>) -> Result<Control> {
            self.initialized += 1;
            Ok(Control::Continue)
        }

        async fn on_bar(&mut self, bar: &Bar, _ctx: &mut LiveContext<'_>) -> Result<Control> {
            self.bars.push(bar.clone());
            Ok(if self.stop_on_bar { Control::Stop } else { Control::Continue })
        }

        async fn on_order_update(
            &mut self,
            client_oid: Option<Uuid>,
            msg: &FeedMessage,
            _ctx: &mut LiveContext<'_>,
        ) -> Result<Control> {
            self.updates.push((client_oid, msg.kind()));
            Ok(Control::Continue)
        }
    }

    fn session() -> (Arc<PaperExchange>, LiveSession) {
        let market = StaticMarket::new().with_product("ETH-USD").with_book(
            "ETH-USD",
            BookSnapshot {
                sequence: 100,
                bids: vec![BookEntry {
                    price: dec!(250),
                    size: dec!(1),
                    order_id: "b".to_string(),
                }],
                asks: vec![BookEntry {
                    price: dec!(251),
                    size: dec!(1),
                    order_id: "a".to_string(),
                }],
            },
        );
        let paper = Arc::new(PaperExchange::new(Arc::new(market)));
        let config = LiveConfig::new("ETH-USD", "wss://example.invalid");
        let session = LiveSession::new(config, paper.clone(), None).unwrap();
        (paper, session)
    }

    fn feed(json: String) -> (String, FeedMessage) {
        let msg = serde_json::from_str(&json).unwrap();
        (json, msg)
    }

    #[tokio::test]
    async fn test_queued_order_placed_once_book_initializes() {
        let (paper, mut session) = session();
        let mut handler = Recorder::default();
        assert_eq!(session.start(&mut handler).await.unwrap(), Control::Continue);
        assert!(paper.orders().await.is_empty());

        // first message syncs the book, the next one initializes it
        let (raw, msg) = feed(r#"{"type":"heartbeat","sequence":99,"product_id":"ETH-USD"}"#.to_string());
        session.process(&raw, msg, &mut handler).await;
        assert_eq!(handler.initialized, 0);

        let (raw, msg) = feed(r#"{"type":"heartbeat","sequence":101,"product_id":"ETH-USD"}"#.to_string());
        session.process(&raw, msg, &mut handler).await;
        assert_eq!(handler.initialized, 1);

        let orders = paper.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].price, dec!(250));
        assert_eq!(orders[0].client_oid, handler.order.unwrap());

        let (raw, msg) = feed(format!(
            r#"{{"type":"open","sequence":102,"product_id":"ETH-USD","order_id":"{}","side":"buy","price":"250","remaining_size":"0.5","user_id":"me"}}"#,
            orders[0].id
        ));
        session.process(&raw, msg, &mut handler).await;
        assert_eq!(handler.updates, vec![(handler.order, "open")]);
        assert_eq!(session.tick().book().level(Side::Buy, dec!(250)).len(), 2);
    }

    #[tokio::test]
    async fn test_bar_closes_on_timer_and_can_stop() {
        let (_paper, mut session) = session();
        let mut handler = Recorder {
            stop_on_bar: true,
            ..Recorder::default()
        };
        let now = Utc.with_ymd_and_hms(2018, 1, 3, 12, 1, 0).unwrap();

        // nothing traded yet
        assert_eq!(session.close_bar(now, &mut handler).await, Control::Continue);

        for (raw, msg) in [
            feed(r#"{"type":"heartbeat","sequence":100,"product_id":"ETH-USD"}"#.to_string()),
            feed(r#"{"type":"match","sequence":101,"product_id":"ETH-USD","maker_order_id":"a","taker_order_id":"t","side":"sell","size":"0.4","price":"251"}"#.to_string()),
        ] {
            session.process(&raw, msg, &mut handler).await;
        }

        assert_eq!(session.close_bar(now, &mut handler).await, Control::Stop);
        let bar = &handler.bars[0];
        assert_eq!(bar.timestamp, now);
        assert_eq!(bar.close, dec!(251));
        assert_eq!(bar.volume, dec!(0.4));
    }

    #[test]
    fn test_round_to_interval() {
        let minute = Duration::from_secs(60);
        let early = Utc.with_ymd_and_hms(2018, 1, 3, 12, 0, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2018, 1, 3, 12, 1, 2).unwrap();
        let boundary = Utc.with_ymd_and_hms(2018, 1, 3, 12, 1, 0).unwrap();
        assert_eq!(round_to_interval(early, minute), boundary);
        assert_eq!(round_to_interval(late, minute), boundary);
    }

    #[test]
    fn test_delay_to_next_boundary() {
        let now = Utc.with_ymd_and_hms(2018, 1, 3, 12, 0, 45).unwrap();
        assert_eq!(delay_to_next_boundary(now, Duration::from_secs(60)), Duration::from_secs(15));
        let on = Utc.with_ymd_and_hms(2018, 1, 3, 12, 0, 0).unwrap();
        assert_eq!(delay_to_next_boundary(on, Duration::from_secs(60)), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_trade_log_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks.log");
        let mut config = LiveConfig::new("ETH-USD", "wss://example.invalid");
        config.trade_log = Some(path.clone());
        let market = StaticMarket::new().with_book(
            "ETH-USD",
            BookSnapshot {
                sequence: 100,
                bids: Vec::new(),
                asks: Vec::new(),
            },
        );
        let mut session = LiveSession::new(config, Arc::new(market), None).unwrap();
        let mut handler = Recorder::default();

        let fill = r#"{"type":"match","sequence":101,"product_id":"ETH-USD","maker_order_id":"a","taker_order_id":"t","side":"sell","size":"0.4","price":"251"}"#;
        let (raw, msg) = feed(format!("{}\n", fill));
        session.process(&raw, msg, &mut handler).await;
        let now = Utc.with_ymd_and_hms(2018, 1, 3, 12, 1, 0).unwrap();
        session.close_bar(now, &mut handler).await;

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, format!("{}\n", fill));
    }

    #[tokio::test]
    async fn test_paper_cancel_is_routed_as_done() {
        let (paper, mut session) = session();
        let mut handler = Recorder::default();
        session.start(&mut handler).await.unwrap();
        for seq in [99, 101] {
            let (raw, msg) = feed(format!(r#"{{"type":"heartbeat","sequence":{},"product_id":"ETH-USD"}}"#, seq));
            session.process(&raw, msg, &mut handler).await;
        }
        let oid = handler.order.unwrap();
        assert_eq!(paper.orders().await.len(), 1);

        session.orders.cancel(paper.as_ref(), oid).await.unwrap();
        assert_eq!(session.check(&mut handler).await, Control::Continue);
        assert_eq!(handler.updates, vec![(Some(oid), "done")]);
        let order = session.orders().order(&oid).unwrap();
        assert!(order.is_done());
        assert_eq!(order.done_reason.as_deref(), Some("canceled"));
    }

    struct FailsOnInitialized;

    #[async_trait]
    impl LiveHandler for FailsOnInitialized {
        async fn on_initialized(&mut self, _ctx: &mut LiveContext<'_>) -> Result<Control> {
            anyhow::bail!("no quote yet")
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_handler_failure_names_its_callback() {
        let (_paper, mut session) = session();
        let mut handler = FailsOnInitialized;
        for seq in [99, 101] {
            let (raw, msg) = feed(format!(r#"{{"type":"heartbeat","sequence":{},"product_id":"ETH-USD"}}"#, seq));
            assert_eq!(session.process(&raw, msg, &mut handler).await, Control::Continue);
        }
        assert!(session.tick().is_initialized());
        assert!(logs_contain("Handler failed on initialized"));
        assert!(!logs_contain("Handler failed on order update"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_ends_on_shutdown() {
        let signal = std::future::ready(Ok(()));
        tokio::pin!(signal);
        assert!(interrupted(&mut signal, Duration::from_secs(3600)).await);

        let never = std::future::pending::<std::io::Result<()>>();
        tokio::pin!(never);
        assert!(!interrupted(&mut never, Duration::from_secs(5)).await);
    }
}
