use crate::market::{AccountInfo, Kline, OcoOrderAck, OrderAck, OrderSide, PriceUpdate};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Exchange/market-data collaborator consumed by the engine.
///
/// All calls are fallible; the control loop isolates failures per symbol
/// rather than letting one bad call abort a cycle.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Kline>>;

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_account_info(&self) -> Result<AccountInfo>;

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck>;

    async fn place_oco_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        take_profit: Decimal,
        stop_loss: Decimal,
        stop_limit: Decimal,
    ) -> Result<OcoOrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderAck>>;

    /// Subscribes to pushed price updates for the given symbols.
    ///
    /// Updates are delivered over a channel so the engine can hand them
    /// into its serialized execution context.
    async fn subscribe_prices(&self, symbols: &[String]) -> Result<mpsc::Receiver<PriceUpdate>>;
}

/// Source of the available quote-asset balance for allocation checks.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn available_balance(&self) -> Result<Decimal>;
}
