use anyhow::Result;
use async_trait::async_trait;
use blockhead_core::*;
use blockhead_data::recent_bars;
use blockhead_engine::{Control, LiveContext, LiveHandler, TickData};
use blockhead_indicators::macd::{Macd, MacdOutput};
use blockhead_indicators::Indicator;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Reports a long/short bias from a fast and slow EMA of bar closes.
///
/// The averages span `12 * lookback` and `26 * lookback` bars. The strategy
/// only reports; it never places orders.
pub struct MacdStrategy {
    id: String,
    config: MacdConfig,
    macd: Macd,
    last_close: Option<Decimal>,
    bias: Option<Bias>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdConfig {
    pub instrument: String,
    /// Bars of lookback per unit of the classic 12/26 periods.
    pub lookback: usize,
    /// Bar size in seconds.
    pub granularity: u32,
}

impl Default for MacdConfig {
    fn default() -> Self {
        Self {
            instrument: "ETH-USD".to_string(),
            lookback: 15,
            granularity: 60,
        }
    }
}

impl std::fmt::Debug for MacdStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacdStrategy")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("last_close", &self.last_close)
            .field("bias", &self.bias)
            .finish()
    }
}

impl MacdStrategy {
    pub fn new(config: MacdConfig) -> Self {
        let lookback = config.lookback.max(1);
        Self {
            id: format!("macd_{}_{}", config.instrument, lookback),
            macd: Macd::with_lookback(lookback),
            config,
            last_close: None,
            bias: None,
        }
    }

    /// History needed to seed the slow average.
    pub fn warm_up_bars(&self) -> usize {
        self.macd.period()
    }

    pub fn bias(&self) -> Option<Bias> {
        self.bias
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.last_close
    }

    pub fn output(&self) -> Option<MacdOutput> {
        self.macd.output()
    }

    /// Feeds historical bars through the averages and reports the result.
    pub fn warm_up(&mut self, bars: &[Bar]) -> Option<Signal> {
        let mut reading = None;
        for bar in bars {
            reading = self.evaluate(bar);
        }
        debug!(bars = bars.len(), "Warmed up");
        let reading = reading?;
        self.log_reading(&reading);
        let signal = self.signal(&reading);
        self.log_bias();
        signal
    }

    /// Downloads the latest history from `exchange` and warms up on it.
    pub async fn warm_up_from(&mut self, exchange: &dyn Exchange) -> Vec<Bar> {
        let bars = recent_bars(
            exchange,
            &self.config.instrument,
            self.warm_up_bars(),
            self.config.granularity,
            None,
        )
        .await;
        info!(bars = bars.len(), needed = self.warm_up_bars(), "Loaded history");
        self.warm_up(&bars);
        bars
    }

    fn evaluate(&mut self, bar: &Bar) -> Option<Reading> {
        self.last_close = Some(bar.close);
        let output = self.macd.next_output(bar.close)?;
        self.bias = Some(if output.fast > output.slow { Bias::Long } else { Bias::Short });
        Some(Reading {
            close: bar.close,
            timestamp: bar.timestamp,
            output,
        })
    }

    fn log_reading(&self, reading: &Reading) {
        info!(
            "close: {} ema1: {} ema2: {}",
            reading.close, reading.output.fast, reading.output.slow
        );
    }

    fn log_bias(&self) {
        match self.bias {
            Some(Bias::Long) => info!("long"),
            Some(Bias::Short) => info!("short"),
            None => debug!("Averages still warming up"),
        }
    }

    fn signal(&self, reading: &Reading) -> Option<Signal> {
        Some(Signal {
            id: Uuid::new_v4(),
            instrument: self.config.instrument.clone(),
            bias: self.bias?,
            strategy_id: self.id.clone(),
            timestamp: reading.timestamp,
            metadata: Some(serde_json::json!({
                "fast": reading.output.fast,
                "slow": reading.output.slow,
                "macd": reading.output.macd,
            })),
        })
    }
}

struct Reading {
    close: Decimal,
    timestamp: chrono::DateTime<Utc>,
    output: MacdOutput,
}

fn log_quote(tick: &TickData) {
    match (tick.best_bid(), tick.best_ask()) {
        (Some(bid), Some(ask)) => info!("bid: {} ask: {}", bid, ask),
        _ => info!("No book yet"),
    }
}

#[async_trait]
impl Strategy for MacdStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "MACD"
    }

    async fn on_bar(&mut self, bar: &Bar) -> Option<Signal> {
        let reading = self.evaluate(bar)?;
        self.log_reading(&reading);
        self.log_bias();
        self.signal(&reading)
    }

    fn reset(&mut self) {
        self.macd.reset();
        self.last_close = None;
        self.bias = None;
    }
}

#[async_trait]
impl LiveHandler for MacdStrategy {
    async fn on_bar(&mut self, bar: &Bar, ctx: &mut LiveContext<'_>) -> Result<Control> {
        match self.evaluate(bar) {
            Some(reading) => {
                self.log_reading(&reading);
                log_quote(ctx.tick);
                self.log_bias();
            }
            None => debug!(close = %bar.close, "Averages still warming up"),
        }
        debug!("{}", ctx.orders);
        Ok(Control::Continue)
    }
}
