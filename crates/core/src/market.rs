use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle as returned by the market-data collaborator.
///
/// `taker_buy_volume` is optional because not every venue reports the
/// taker-side split; rating classification degrades gracefully without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub taker_buy_volume: Option<Decimal>,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
}

impl AccountInfo {
    /// Free balance for a single asset, zero when the asset is absent.
    #[must_use]
    pub fn free_balance(&self, asset: &str) -> Decimal {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .map_or(Decimal::ZERO, |b| b.free)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// Acknowledgement for a single order placed with the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub avg_fill_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement for a bracket (OCO) order pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcoOrderAck {
    pub order_list_id: String,
    pub symbol: String,
    pub order_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Push message from the price-stream subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn free_balance_finds_asset() {
        let info = AccountInfo {
            balances: vec![
                Balance {
                    asset: "USDT".to_string(),
                    free: dec!(1000),
                    locked: dec!(50),
                },
                Balance {
                    asset: "BTC".to_string(),
                    free: dec!(0.5),
                    locked: dec!(0),
                },
            ],
        };

        assert_eq!(info.free_balance("USDT"), dec!(1000));
        assert_eq!(info.free_balance("BTC"), dec!(0.5));
    }

    #[test]
    fn free_balance_missing_asset_is_zero() {
        let info = AccountInfo { balances: vec![] };
        assert_eq!(info.free_balance("ETH"), Decimal::ZERO);
    }
}
