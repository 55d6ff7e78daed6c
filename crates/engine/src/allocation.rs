//! Capital reservation ledger.
//!
//! Every admitted entry holds a reservation until the position closes (or
//! the entry fails), so concurrent positions can never overcommit funds.
//! Admission is checked against the balance minus all outstanding
//! reservations observed at reservation time — two back-to-back
//! reservations cannot double-allocate the same capital.

use anyhow::Result;
use arena_trade_core::BalanceSource;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A provisional capital hold for a pending or active position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationReservation {
    pub symbol: String,
    pub reserved_amount: Decimal,
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Typed admission failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationRejection {
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },
    BelowMinimumNotional {
        requested: Decimal,
        minimum: Decimal,
    },
    AlreadyReserved,
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved { amount: Decimal },
    Rejected(AllocationRejection),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationStatus {
    pub total_reserved: Decimal,
    pub total_balance: Decimal,
    pub percent_used: Decimal,
    pub reservations: Vec<AllocationReservation>,
}

/// Reservation ledger keyed by symbol.
#[derive(Debug, Default)]
pub struct AllocationManager {
    reservations: HashMap<String, AllocationReservation>,
    min_notional: Decimal,
}

impl AllocationManager {
    #[must_use]
    pub fn new(min_notional: Decimal) -> Self {
        Self {
            reservations: HashMap::new(),
            min_notional,
        }
    }

    /// Attempts to reserve `allocation_percent` of the current balance.
    ///
    /// The balance is read once; the admission check runs against that
    /// reading minus all outstanding reservations, and the reservation is
    /// recorded before returning so a subsequent call sees it.
    ///
    /// # Errors
    ///
    /// Only the balance-source read can fail; admission failures are a
    /// typed [`ReservationOutcome::Rejected`], not an error.
    pub async fn reserve_funds(
        &mut self,
        symbol: &str,
        allocation_percent: Decimal,
        balance_source: &dyn BalanceSource,
    ) -> Result<ReservationOutcome> {
        if self.reservations.contains_key(symbol) {
            return Ok(ReservationOutcome::Rejected(
                AllocationRejection::AlreadyReserved,
            ));
        }

        let balance = balance_source.available_balance().await?;
        let amount = balance * allocation_percent / Decimal::ONE_HUNDRED;
        let available = balance - self.total_reserved();

        if amount < self.min_notional {
            tracing::debug!(
                symbol,
                %amount,
                minimum = %self.min_notional,
                "reservation below exchange minimum"
            );
            return Ok(ReservationOutcome::Rejected(
                AllocationRejection::BelowMinimumNotional {
                    requested: amount,
                    minimum: self.min_notional,
                },
            ));
        }

        if amount > available {
            tracing::debug!(symbol, %amount, %available, "insufficient unreserved funds");
            return Ok(ReservationOutcome::Rejected(
                AllocationRejection::InsufficientFunds {
                    requested: amount,
                    available,
                },
            ));
        }

        self.reservations.insert(
            symbol.to_string(),
            AllocationReservation {
                symbol: symbol.to_string(),
                reserved_amount: amount,
                order_id: None,
                timestamp: Utc::now(),
            },
        );
        tracing::info!(symbol, %amount, "funds reserved");
        Ok(ReservationOutcome::Reserved { amount })
    }

    /// Attaches the concrete order id once known.
    pub fn update_reservation(&mut self, symbol: &str, order_id: &str) {
        if let Some(reservation) = self.reservations.get_mut(symbol) {
            reservation.order_id = Some(order_id.to_string());
        }
    }

    /// Idempotent release; an unknown or already-released symbol is a no-op.
    pub fn release_funds(&mut self, symbol: &str) {
        if let Some(reservation) = self.reservations.remove(symbol) {
            tracing::info!(symbol, amount = %reservation.reserved_amount, "funds released");
        }
    }

    /// # Errors
    ///
    /// Fails only if the balance source read fails.
    pub async fn allocation_status(
        &self,
        balance_source: &dyn BalanceSource,
    ) -> Result<AllocationStatus> {
        let total_balance = balance_source.available_balance().await?;
        let total_reserved = self.total_reserved();
        let percent_used = if total_balance > Decimal::ZERO {
            total_reserved / total_balance * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        let mut reservations: Vec<AllocationReservation> =
            self.reservations.values().cloned().collect();
        reservations.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        Ok(AllocationStatus {
            total_reserved,
            total_balance,
            percent_used,
            reservations,
        })
    }

    /// Emergency reset of the whole ledger.
    pub fn clear_all_reservations(&mut self) {
        if !self.reservations.is_empty() {
            tracing::warn!(count = self.reservations.len(), "clearing all reservations");
        }
        self.reservations.clear();
    }

    #[must_use]
    pub fn total_reserved(&self) -> Decimal {
        self.reservations.values().map(|r| r.reserved_amount).sum()
    }

    #[must_use]
    pub fn reservation(&self, symbol: &str) -> Option<&AllocationReservation> {
        self.reservations.get(symbol)
    }
}
