//! Execution adapters: the only place paper and live trading differ.
//!
//! The control loop drives one [`ExecutionAdapter`]; paper mode fills
//! virtually against a simulated balance, live mode forwards to the
//! exchange collaborator. Control and risk logic upstream are identical.

use crate::oco::OcoPrices;
use anyhow::{Context, Result};
use arena_trade_core::{BalanceSource, ExchangeClient, ExecutionMode, OrderSide};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

/// A realized entry fill.
#[derive(Debug, Clone)]
pub struct EntryFill {
    pub order_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A realized exit fill.
#[derive(Debug, Clone)]
pub struct ExitFill {
    pub order_id: Option<String>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Buys `quote_amount` worth of the symbol at market.
    async fn execute_entry(&mut self, symbol: &str, quote_amount: Decimal) -> Result<EntryFill>;

    /// Places the take-profit/stop-loss bracket for an open position,
    /// returning the bracket order ids.
    async fn place_bracket(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        prices: &OcoPrices,
    ) -> Result<Vec<String>>;

    /// Cancels the given orders; callers tolerate failure (an order may
    /// already have filled) and reconcile via remaining quantity.
    async fn cancel_orders(&mut self, symbol: &str, order_ids: &[String]) -> Result<()>;

    /// Sells `quantity` of the symbol at market.
    async fn execute_exit(&mut self, symbol: &str, quantity: Decimal) -> Result<ExitFill>;
}

/// Shared virtual quote balance for paper trading.
///
/// Doubles as the [`BalanceSource`] for allocation checks so paper mode
/// exercises the exact admission path live mode does.
#[derive(Debug, Clone)]
pub struct VirtualBalance {
    inner: Arc<Mutex<Decimal>>,
}

impl VirtualBalance {
    #[must_use]
    pub fn new(initial: Decimal) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    #[must_use]
    pub fn get(&self) -> Decimal {
        *self.inner.lock().expect("balance lock poisoned")
    }

    fn debit(&self, amount: Decimal) {
        *self.inner.lock().expect("balance lock poisoned") -= amount;
    }

    fn credit(&self, amount: Decimal) {
        *self.inner.lock().expect("balance lock poisoned") += amount;
    }
}

#[async_trait]
impl BalanceSource for VirtualBalance {
    async fn available_balance(&self) -> Result<Decimal> {
        Ok(self.get())
    }
}

/// Simulated fills at the current market price, no real money.
pub struct PaperExecutionAdapter {
    exchange: Arc<dyn ExchangeClient>,
    balance: VirtualBalance,
    order_seq: u64,
}

impl PaperExecutionAdapter {
    #[must_use]
    pub fn new(exchange: Arc<dyn ExchangeClient>, balance: VirtualBalance) -> Self {
        Self {
            exchange,
            balance,
            order_seq: 0,
        }
    }

    fn next_order_id(&mut self, kind: &str) -> String {
        self.order_seq += 1;
        format!("paper-{kind}-{}", self.order_seq)
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecutionAdapter {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Paper
    }

    async fn execute_entry(&mut self, symbol: &str, quote_amount: Decimal) -> Result<EntryFill> {
        let price = self
            .exchange
            .get_current_price(symbol)
            .await
            .context("paper entry price lookup failed")?;
        // 8 decimal places, standard for crypto quantities.
        let quantity = (quote_amount / price).round_dp(8);
        self.balance.debit(quote_amount);

        tracing::info!(symbol, %price, %quantity, "paper entry filled");
        Ok(EntryFill {
            order_id: self.next_order_id("entry"),
            price,
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn place_bracket(
        &mut self,
        _symbol: &str,
        _quantity: Decimal,
        _prices: &OcoPrices,
    ) -> Result<Vec<String>> {
        // Virtual bracket: the control loop enforces the conditions itself.
        Ok(vec![self.next_order_id("oco")])
    }

    async fn cancel_orders(&mut self, _symbol: &str, _order_ids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn execute_exit(&mut self, symbol: &str, quantity: Decimal) -> Result<ExitFill> {
        let price = self
            .exchange
            .get_current_price(symbol)
            .await
            .context("paper exit price lookup failed")?;
        self.balance.credit(quantity * price);

        tracing::info!(symbol, %price, %quantity, "paper exit filled");
        Ok(ExitFill {
            order_id: Some(self.next_order_id("exit")),
            price,
            quantity,
            timestamp: Utc::now(),
        })
    }
}

/// Forwards every operation to the real exchange.
pub struct LiveExecutionAdapter {
    client: Arc<dyn ExchangeClient>,
}

impl LiveExecutionAdapter {
    #[must_use]
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutionAdapter for LiveExecutionAdapter {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn execute_entry(&mut self, symbol: &str, quote_amount: Decimal) -> Result<EntryFill> {
        let price = self
            .client
            .get_current_price(symbol)
            .await
            .context("entry price lookup failed")?;
        let quantity = (quote_amount / price).round_dp(8);

        let ack = self
            .client
            .place_order(symbol, OrderSide::Buy, quantity)
            .await
            .context("entry order failed")?;

        Ok(EntryFill {
            order_id: ack.order_id,
            price: ack.avg_fill_price,
            quantity: ack.executed_qty,
            timestamp: ack.timestamp,
        })
    }

    async fn place_bracket(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        prices: &OcoPrices,
    ) -> Result<Vec<String>> {
        let ack = self
            .client
            .place_oco_order(
                symbol,
                OrderSide::Sell,
                quantity,
                prices.take_profit,
                prices.stop_loss,
                prices.stop_limit,
            )
            .await
            .context("bracket order failed")?;
        Ok(ack.order_ids)
    }

    async fn cancel_orders(&mut self, symbol: &str, order_ids: &[String]) -> Result<()> {
        for order_id in order_ids {
            self.client
                .cancel_order(symbol, order_id)
                .await
                .with_context(|| format!("cancel failed for order {order_id}"))?;
        }
        Ok(())
    }

    async fn execute_exit(&mut self, symbol: &str, quantity: Decimal) -> Result<ExitFill> {
        let ack = self
            .client
            .place_order(symbol, OrderSide::Sell, quantity)
            .await
            .context("exit order failed")?;
        Ok(ExitFill {
            order_id: Some(ack.order_id),
            price: ack.avg_fill_price,
            quantity: ack.executed_qty,
            timestamp: ack.timestamp,
        })
    }
}

/// Live-mode balance source: the exchange's reported free quote balance.
pub struct LiveBalanceSource {
    client: Arc<dyn ExchangeClient>,
    quote_asset: String,
}

impl LiveBalanceSource {
    #[must_use]
    pub fn new(client: Arc<dyn ExchangeClient>, quote_asset: String) -> Self {
        Self {
            client,
            quote_asset,
        }
    }
}

#[async_trait]
impl BalanceSource for LiveBalanceSource {
    async fn available_balance(&self) -> Result<Decimal> {
        let info = self
            .client
            .get_account_info()
            .await
            .context("account info lookup failed")?;
        Ok(info.free_balance(&self.quote_asset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oco;
    use arena_trade_core::{
        AccountInfo, Balance, Kline, OcoOrderAck, OrderAck, OrderStatus, PriceUpdate,
    };
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    struct FixedPriceExchange {
        price: Decimal,
    }

    #[async_trait]
    impl ExchangeClient for FixedPriceExchange {
        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _start: Option<DateTime<Utc>>,
            _end: Option<DateTime<Utc>>,
            _limit: usize,
        ) -> Result<Vec<Kline>> {
            Ok(vec![])
        }

        async fn get_current_price(&self, _symbol: &str) -> Result<Decimal> {
            Ok(self.price)
        }

        async fn get_account_info(&self) -> Result<AccountInfo> {
            Ok(AccountInfo {
                balances: vec![Balance {
                    asset: "USDT".to_string(),
                    free: dec!(500),
                    locked: dec!(25),
                }],
            })
        }

        async fn place_order(
            &self,
            symbol: &str,
            side: OrderSide,
            quantity: Decimal,
        ) -> Result<OrderAck> {
            Ok(OrderAck {
                order_id: "live-1".to_string(),
                symbol: symbol.to_string(),
                side,
                status: OrderStatus::Filled,
                executed_qty: quantity,
                avg_fill_price: self.price,
                timestamp: Utc::now(),
            })
        }

        async fn place_oco_order(
            &self,
            symbol: &str,
            _side: OrderSide,
            _quantity: Decimal,
            _take_profit: Decimal,
            _stop_loss: Decimal,
            _stop_limit: Decimal,
        ) -> Result<OcoOrderAck> {
            Ok(OcoOrderAck {
                order_list_id: "oco-1".to_string(),
                symbol: symbol.to_string(),
                order_ids: vec!["tp-1".to_string(), "sl-1".to_string()],
                timestamp: Utc::now(),
            })
        }

        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<()> {
            Ok(())
        }

        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OrderAck>> {
            Ok(vec![])
        }

        async fn subscribe_prices(
            &self,
            _symbols: &[String],
        ) -> Result<mpsc::Receiver<PriceUpdate>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn exchange(price: Decimal) -> Arc<dyn ExchangeClient> {
        Arc::new(FixedPriceExchange { price })
    }

    #[tokio::test]
    async fn paper_entry_debits_and_exit_credits_the_virtual_balance() {
        let balance = VirtualBalance::new(dec!(1000));
        let mut adapter = PaperExecutionAdapter::new(exchange(dec!(50)), balance.clone());

        let fill = adapter.execute_entry("BTCUSDT", dec!(100)).await.unwrap();
        assert_eq!(fill.price, dec!(50));
        assert_eq!(fill.quantity, dec!(2));
        assert_eq!(balance.get(), dec!(900));

        let exit = adapter.execute_exit("BTCUSDT", dec!(2)).await.unwrap();
        assert_eq!(exit.price, dec!(50));
        assert_eq!(balance.get(), dec!(1000));
    }

    #[tokio::test]
    async fn paper_order_ids_are_distinct() {
        let balance = VirtualBalance::new(dec!(1000));
        let mut adapter = PaperExecutionAdapter::new(exchange(dec!(50)), balance);

        let first = adapter.execute_entry("BTCUSDT", dec!(100)).await.unwrap();
        let prices = oco::calculate_oco_prices(first.price, dec!(5), dec!(2)).unwrap();
        let bracket = adapter
            .place_bracket("BTCUSDT", first.quantity, &prices)
            .await
            .unwrap();
        assert_ne!(first.order_id, bracket[0]);
    }

    #[tokio::test]
    async fn live_adapter_forwards_to_the_exchange() {
        let mut adapter = LiveExecutionAdapter::new(exchange(dec!(50)));

        let fill = adapter.execute_entry("BTCUSDT", dec!(100)).await.unwrap();
        assert_eq!(fill.order_id, "live-1");
        assert_eq!(fill.quantity, dec!(2));

        let prices = oco::calculate_oco_prices(fill.price, dec!(5), dec!(2)).unwrap();
        let ids = adapter
            .place_bracket("BTCUSDT", fill.quantity, &prices)
            .await
            .unwrap();
        assert_eq!(ids, vec!["tp-1".to_string(), "sl-1".to_string()]);

        adapter.cancel_orders("BTCUSDT", &ids).await.unwrap();
        let exit = adapter.execute_exit("BTCUSDT", dec!(2)).await.unwrap();
        assert_eq!(exit.order_id.as_deref(), Some("live-1"));
    }

    #[tokio::test]
    async fn live_balance_source_reads_free_quote_balance() {
        let source = LiveBalanceSource::new(exchange(dec!(50)), "USDT".to_string());
        assert_eq!(source.available_balance().await.unwrap(), dec!(500));
    }
}
