use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Risk limit that was breached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLimitKind {
    DailyLoss,
    Drawdown,
    MaxPositions,
}

/// Why a position left the book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    ZScoreReversal,
    Emergency,
}

/// Typed events emitted by the engine over a broadcast channel.
///
/// Consumers (logging, persistence, dashboards) subscribe via [`EventBus`];
/// the engine never depends on their concrete types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    Started,
    Stopped,

    /// One signal-generation pass completed.
    SignalsChecked {
        total_signals: usize,
        strong_signals: usize,
        timestamp: DateTime<Utc>,
    },

    /// A signal was admitted and acted on (entry submitted).
    SignalProcessed {
        symbol: String,
        moving_average_z: f64,
        timestamp: DateTime<Utc>,
    },

    /// An order hit the real exchange.
    LiveTradeExecuted {
        symbol: String,
        side: crate::market::OrderSide,
        quantity: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// A simulated fill in paper mode.
    PaperTrade {
        symbol: String,
        side: crate::market::OrderSide,
        quantity: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },

    ZScoreCalculated {
        symbol: String,
        raw_z: f64,
        moving_average_z: f64,
        rating: f64,
    },

    /// Moving-average z crossed below the negative threshold on an open
    /// position; an unconditional exit was triggered.
    ZScoreReversal {
        symbol: String,
        moving_average_z: f64,
        threshold: f64,
    },

    RiskLimitHit(RiskLimitKind),

    EmergencyStop,

    /// Recoverable error scoped to one symbol's processing.
    TradingError {
        symbol: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A position closed with realized P&L.
    PositionClosed {
        symbol: String,
        reason: ExitReason,
        pnl: Decimal,
        pnl_percent: Decimal,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast fan-out for [`EngineEvent`].
///
/// Publishing never fails: with no live subscribers the event is dropped,
/// which is the correct behavior for an observability channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::Started);

        match rx.recv().await.unwrap() {
            EngineEvent::Started => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        bus.publish(EngineEvent::EmergencyStop);
    }
}
