use anyhow::Result;
use async_trait::async_trait;
use blockhead_core::*;
use blockhead_engine::{Control, LiveContext, LiveHandler, OrderBook};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Signed quantity of the base currency: positive buys, negative sells.
    pub target: Decimal,
    pub limit_price: Option<Decimal>,
    /// Keep the working order at the inside quote, never past `limit_price`.
    pub follow: bool,
}

/// Works passive orders until a signed target quantity has been filled.
///
/// One order is worked at a time. When it ends short of the target (cancelled
/// to follow the market, or rejected as post-only) a new one is placed for
/// what remains.
#[derive(Debug)]
pub struct TargetPosition {
    config: TargetConfig,
    working: Option<Uuid>,
    /// Filled on orders that are done.
    done_filled: Decimal,
    cancelling: bool,
}

impl TargetPosition {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            working: None,
            done_filled: Decimal::ZERO,
            cancelling: false,
        }
    }

    pub fn working(&self) -> Option<Uuid> {
        self.working
    }

    pub fn filled(&self, ctx: &LiveContext<'_>) -> Decimal {
        let working = self
            .working
            .and_then(|oid| ctx.orders.order(&oid))
            .map_or(Decimal::ZERO, |o| o.filled);
        self.done_filled + working
    }

    pub fn remaining(&self, ctx: &LiveContext<'_>) -> Decimal {
        (self.config.target.abs() - self.filled(ctx)).max(Decimal::ZERO)
    }

    pub fn is_complete(&self, ctx: &LiveContext<'_>) -> bool {
        self.remaining(ctx).is_zero()
    }

    fn side(&self) -> Side {
        Side::from_signed(self.config.target)
    }

    /// Price for a new order. Following joins the inside quote, capped by
    /// the limit price.
    fn price(&self, book: &OrderBook) -> Option<Decimal> {
        if !self.config.follow {
            return self.config.limit_price;
        }
        let inside = book.inside(self.side());
        match (inside, self.config.limit_price, self.side()) {
            (Some(inside), Some(limit), Side::Buy) => Some(inside.min(limit)),
            (Some(inside), Some(limit), Side::Sell) => Some(inside.max(limit)),
            (Some(inside), None, _) => Some(inside),
            (None, limit, _) => limit,
        }
    }

    async fn place(&mut self, ctx: &mut LiveContext<'_>) -> Result<()> {
        let remaining = self.remaining(ctx);
        let size = match self.side() {
            Side::Buy => remaining,
            Side::Sell => -remaining,
        };
        let price = if ctx.orders.pending() == 0 && ctx.tick.is_initialized() {
            self.price(ctx.tick.book())
        } else {
            self.config.limit_price
        };
        let oid = ctx.add_order(size, price).await?;
        info!(client_oid = %oid, %size, ?price, "Working order");
        self.working = Some(oid);
        self.cancelling = false;
        Ok(())
    }

    fn finish(&self, ctx: &LiveContext<'_>) -> Control {
        info!(filled = %self.filled(ctx), target = %self.config.target, "All done");
        Control::Stop
    }
}

#[async_trait]
impl LiveHandler for TargetPosition {
    async fn on_start(&mut self, ctx: &mut LiveContext<'_>) -> Result<Control> {
        if self.config.target.is_zero() {
            info!("Nothing to do");
            return Ok(Control::Stop);
        }
        self.place(ctx).await?;
        Ok(Control::Continue)
    }

    async fn on_check(&mut self, ctx: &mut LiveContext<'_>) -> Result<Control> {
        if self.is_complete(ctx) {
            return Ok(self.finish(ctx));
        }
        debug!("{}", ctx.orders);

        let Some(oid) = self.working else {
            // a replacement failed earlier; try again
            self.place(ctx).await?;
            return Ok(Control::Continue);
        };
        let Some(order) = ctx.orders.order(&oid) else {
            // the exchange refused it and the manager dropped it
            warn!(client_oid = %oid, "Working order was never placed, retrying");
            self.working = None;
            self.place(ctx).await?;
            return Ok(Control::Continue);
        };
        if !self.config.follow || self.cancelling || order.order_id.is_none() || order.is_done() {
            return Ok(Control::Continue);
        }
        let want = self.price(ctx.tick.book());
        if want.is_some() && want != order.limit_price {
            info!(at = ?order.limit_price, inside = ?want, "Order away from the market, cancelling");
            self.cancelling = true;
            if let Err(e) = ctx.orders.cancel(ctx.exchange, oid).await {
                self.cancelling = false;
                return Err(e.into());
            }
        }
        Ok(Control::Continue)
    }

    async fn on_order_update(
        &mut self,
        client_oid: Option<Uuid>,
        msg: &FeedMessage,
        ctx: &mut LiveContext<'_>,
    ) -> Result<Control> {
        if client_oid.is_none() || client_oid != self.working {
            return Ok(Control::Continue);
        }
        if self.is_complete(ctx) {
            return Ok(self.finish(ctx));
        }

        let Some(order) = client_oid.and_then(|oid| ctx.orders.order(&oid)) else {
            return Ok(Control::Continue);
        };
        if !order.is_done() {
            return Ok(Control::Continue);
        }

        warn!(
            kind = msg.kind(),
            reason = ?order.done_reason,
            filled = %order.filled,
            "Working order ended before the target was reached, replacing"
        );
        self.done_filled += order.filled;
        self.working = None;
        self.place(ctx).await?;
        Ok(Control::Continue)
    }
}
