//! Daily-loss and drawdown tracking over realized P&L.

use arena_trade_core::{RiskConfig, RiskLimitKind};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// Tracks realized equity against the configured risk limits.
///
/// Equity here is realized-only: initial balance plus cumulative realized
/// P&L. The daily counter resets on the first record of each UTC day.
#[derive(Debug)]
pub struct RiskTracker {
    config: RiskConfig,
    equity: Decimal,
    peak_equity: Decimal,
    daily_pnl: Decimal,
    day: NaiveDate,
}

impl RiskTracker {
    #[must_use]
    pub fn new(config: RiskConfig, initial_equity: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            config,
            equity: initial_equity,
            peak_equity: initial_equity,
            daily_pnl: Decimal::ZERO,
            day: now.date_naive(),
        }
    }

    pub fn record_realized_pnl(&mut self, pnl: Decimal, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.daily_pnl = Decimal::ZERO;
        }
        self.daily_pnl += pnl;
        self.equity += pnl;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
    }

    /// First breached limit, if any. Checked before admitting entries.
    #[must_use]
    pub fn breached_limit(&self, now: DateTime<Utc>) -> Option<RiskLimitKind> {
        if now.date_naive() == self.day && self.daily_pnl <= -self.config.max_daily_loss {
            return Some(RiskLimitKind::DailyLoss);
        }
        if self.peak_equity > Decimal::ZERO {
            let drawdown_pct =
                (self.peak_equity - self.equity) / self.peak_equity * Decimal::ONE_HUNDRED;
            if drawdown_pct >= self.config.max_drawdown_percent {
                return Some(RiskLimitKind::Drawdown);
            }
        }
        None
    }

    #[must_use]
    pub fn equity(&self) -> Decimal {
        self.equity
    }

    #[must_use]
    pub fn daily_pnl(&self) -> Decimal {
        self.daily_pnl
    }
}
