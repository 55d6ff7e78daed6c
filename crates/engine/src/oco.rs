//! Stateless price/condition/P&L math for bracket (OCO) orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OcoPriceError {
    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(Decimal),
    #[error("profit percent must be positive, got {0}")]
    NonPositiveProfit(Decimal),
    #[error("stop-loss percent must be positive, got {0}")]
    NonPositiveStopLoss(Decimal),
    #[error("take-profit {take_profit} must exceed entry {entry}")]
    TakeProfitNotAboveEntry {
        entry: Decimal,
        take_profit: Decimal,
    },
    #[error("stop-loss {stop_loss} must be below entry {entry} and positive")]
    StopLossOutOfRange { entry: Decimal, stop_loss: Decimal },
}

/// Computed bracket prices for a long position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcoPrices {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    /// Stop-limit sits a fixed 0.1% below the stop price so the limit leg
    /// still fills after a fast move through the stop.
    pub stop_limit: Decimal,
}

/// Which side of the bracket a price touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcoTrigger {
    TakeProfit,
    StopLoss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfitLoss {
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
}

fn percent(value: Decimal) -> Decimal {
    value / Decimal::ONE_HUNDRED
}

/// Derives bracket prices from a realized entry price.
///
/// # Errors
///
/// Rejects a non-positive entry price or non-positive percents.
pub fn calculate_oco_prices(
    entry_price: Decimal,
    profit_percent: Decimal,
    stop_loss_percent: Decimal,
) -> Result<OcoPrices, OcoPriceError> {
    if entry_price <= Decimal::ZERO {
        return Err(OcoPriceError::NonPositiveEntry(entry_price));
    }
    if profit_percent <= Decimal::ZERO {
        return Err(OcoPriceError::NonPositiveProfit(profit_percent));
    }
    if stop_loss_percent <= Decimal::ZERO {
        return Err(OcoPriceError::NonPositiveStopLoss(stop_loss_percent));
    }

    let take_profit = entry_price * (Decimal::ONE + percent(profit_percent));
    let stop_loss = entry_price * (Decimal::ONE - percent(stop_loss_percent));
    let stop_limit = stop_loss * (Decimal::ONE - Decimal::new(1, 3));

    Ok(OcoPrices {
        take_profit,
        stop_loss,
        stop_limit,
    })
}

/// Checks whether the current price triggers either bracket side.
///
/// Deterministic priority: take-profit is evaluated before stop-loss, so a
/// degenerate bracket where both hold resolves to the profitable side.
#[must_use]
pub fn check_oco_condition(
    current_price: Decimal,
    take_profit: Decimal,
    stop_loss: Decimal,
) -> Option<OcoTrigger> {
    if current_price >= take_profit {
        Some(OcoTrigger::TakeProfit)
    } else if current_price <= stop_loss {
        Some(OcoTrigger::StopLoss)
    } else {
        None
    }
}

/// Realized P&L for a closed quantity.
#[must_use]
pub fn calculate_profit_loss(
    entry_price: Decimal,
    exit_price: Decimal,
    quantity: Decimal,
) -> ProfitLoss {
    let pnl = quantity * (exit_price - entry_price);
    let cost = quantity * entry_price;
    let pnl_percent = if cost > Decimal::ZERO {
        pnl / cost * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };
    ProfitLoss { pnl, pnl_percent }
}

/// Validates an externally supplied bracket against its entry price.
///
/// # Errors
///
/// The take-profit must exceed the entry; the stop-loss must be positive
/// and below the entry.
pub fn validate_oco_prices(
    entry_price: Decimal,
    take_profit: Decimal,
    stop_loss: Decimal,
) -> Result<(), OcoPriceError> {
    if entry_price <= Decimal::ZERO {
        return Err(OcoPriceError::NonPositiveEntry(entry_price));
    }
    if take_profit <= entry_price {
        return Err(OcoPriceError::TakeProfitNotAboveEntry {
            entry: entry_price,
            take_profit,
        });
    }
    if stop_loss <= Decimal::ZERO || stop_loss >= entry_price {
        return Err(OcoPriceError::StopLossOutOfRange {
            entry: entry_price,
            stop_loss,
        });
    }
    Ok(())
}
