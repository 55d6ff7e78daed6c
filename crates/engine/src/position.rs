//! Per-symbol position lifecycle: FLAT -> ENTERING -> OPEN -> CLOSING -> FLAT.
//!
//! The machine is re-entrant — a symbol returns to FLAT and may enter again
//! on a later cycle. Exits track the remaining quantity rather than assuming
//! a single fill, so a bracket leg filling concurrently with a compensating
//! market order cannot double-count.

use arena_trade_core::TradingParameterSet;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exchange order ids tied to a position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRefs {
    pub entry_order_id: Option<String>,
    pub bracket_order_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    /// Quantity not yet closed; decremented per exit fill.
    pub remaining_quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub order_refs: OrderRefs,
    pub parameters: TradingParameterSet,
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Marks `quantity` closed, saturating at zero.
    pub fn reduce(&mut self, quantity: Decimal) {
        self.remaining_quantity = (self.remaining_quantity - quantity).max(Decimal::ZERO);
    }

    pub fn mark_price(&mut self, price: Decimal) {
        self.unrealized_pnl = self.remaining_quantity * (price - self.entry_price);
    }
}

#[derive(Debug, Clone, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Entering,
    Open(Position),
    Closing(Position),
}

impl PositionState {
    #[must_use]
    pub fn is_flat(&self) -> bool {
        matches!(self, Self::Flat)
    }
}

/// All per-symbol lifecycle states, keyed by symbol.
#[derive(Debug, Default)]
pub struct PositionBook {
    states: HashMap<String, PositionState>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, symbol: &str) -> &PositionState {
        self.states.get(symbol).unwrap_or(&PositionState::Flat)
    }

    #[must_use]
    pub fn is_flat(&self, symbol: &str) -> bool {
        self.state(symbol).is_flat()
    }

    /// Positions currently OPEN or CLOSING, i.e. holding inventory.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| !matches!(s, PositionState::Flat))
            .count()
    }

    /// Symbols with an OPEN position, sorted for deterministic iteration.
    #[must_use]
    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .states
            .iter()
            .filter(|(_, s)| matches!(s, PositionState::Open(_)))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    #[must_use]
    pub fn open_position(&self, symbol: &str) -> Option<&Position> {
        match self.state(symbol) {
            PositionState::Open(position) => Some(position),
            _ => None,
        }
    }

    pub fn open_position_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        match self.states.get_mut(symbol) {
            Some(PositionState::Open(position)) => Some(position),
            _ => None,
        }
    }

    pub fn set_entering(&mut self, symbol: &str) {
        self.states
            .insert(symbol.to_string(), PositionState::Entering);
    }

    pub fn set_open(&mut self, position: Position) {
        self.states
            .insert(position.symbol.clone(), PositionState::Open(position));
    }

    /// OPEN -> CLOSING, handing the position to the exit path.
    pub fn begin_close(&mut self, symbol: &str) -> Option<Position> {
        match self.states.remove(symbol) {
            Some(PositionState::Open(position)) => {
                self.states
                    .insert(symbol.to_string(), PositionState::Closing(position.clone()));
                Some(position)
            }
            Some(other) => {
                self.states.insert(symbol.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// CLOSING -> OPEN, used when an exit attempt failed and the position
    /// must be retried on a later cycle.
    pub fn reopen(&mut self, position: Position) {
        self.states
            .insert(position.symbol.clone(), PositionState::Open(position));
    }

    pub fn set_flat(&mut self, symbol: &str) {
        self.states.remove(symbol);
    }

    /// Drops every position; emergency path only.
    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Every position currently holding inventory (OPEN or CLOSING).
    #[must_use]
    pub fn inventory(&self) -> Vec<&Position> {
        let mut positions: Vec<&Position> = self
            .states
            .values()
            .filter_map(|s| match s {
                PositionState::Open(p) | PositionState::Closing(p) => Some(p),
                _ => None,
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }
}
