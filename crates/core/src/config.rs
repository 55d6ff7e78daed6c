use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution mode for the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Paper trading with simulated fills against a virtual balance.
    #[default]
    Paper,
    /// Live trading with real exchange orders.
    Live,
}

/// Per-symbol trading parameters, externally supplied.
///
/// Looked up through [`ParameterStore`] with a global-default fallback, so
/// symbols without an explicit entry still trade with sane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingParameterSet {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,

    /// Moving-average z magnitude required to fire a signal.
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,

    /// Number of raw z-scores averaged before thresholding.
    #[serde(default = "default_moving_averages")]
    pub moving_averages: usize,

    #[serde(default = "default_profit_percent")]
    pub profit_percent: Decimal,
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: Decimal,

    /// Percentage of the available balance reserved per entry.
    #[serde(default = "default_allocation_percent")]
    pub allocation_percent: Decimal,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_z_score_threshold() -> f64 {
    2.0
}

const fn default_moving_averages() -> usize {
    5
}

fn default_profit_percent() -> Decimal {
    Decimal::new(5, 0) // 5%
}

fn default_stop_loss_percent() -> Decimal {
    Decimal::new(2, 0) // 2%
}

fn default_allocation_percent() -> Decimal {
    Decimal::new(10, 0) // 10%
}

const fn default_enabled() -> bool {
    true
}

impl TradingParameterSet {
    /// Global fallback parameters for a symbol with no explicit entry.
    #[must_use]
    pub fn fallback(symbol: &str, base_asset: &str, quote_asset: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            z_score_threshold: default_z_score_threshold(),
            moving_averages: default_moving_averages(),
            profit_percent: default_profit_percent(),
            stop_loss_percent: default_stop_loss_percent(),
            allocation_percent: default_allocation_percent(),
            enabled: default_enabled(),
        }
    }
}

/// Resolves per-symbol parameters with a global-default fallback.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    by_symbol: HashMap<String, TradingParameterSet>,
    quote_asset: String,
}

impl ParameterStore {
    #[must_use]
    pub fn new(sets: Vec<TradingParameterSet>, quote_asset: String) -> Self {
        let by_symbol = sets.into_iter().map(|p| (p.symbol.clone(), p)).collect();
        Self {
            by_symbol,
            quote_asset,
        }
    }

    /// Parameters for `symbol`, falling back to global defaults.
    ///
    /// The fallback derives the base asset by stripping the quote-asset
    /// suffix from the symbol (e.g. "BTCUSDT" -> "BTC").
    #[must_use]
    pub fn get(&self, symbol: &str) -> TradingParameterSet {
        if let Some(params) = self.by_symbol.get(symbol) {
            return params.clone();
        }
        let base = symbol.strip_suffix(self.quote_asset.as_str()).unwrap_or(symbol);
        TradingParameterSet::fallback(symbol, base, &self.quote_asset)
    }

    /// All symbols with an explicit parameter entry that is enabled.
    #[must_use]
    pub fn enabled_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .by_symbol
            .values()
            .filter(|p| p.enabled)
            .map(|p| p.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Largest configured moving-average period across all entries.
    #[must_use]
    pub fn max_moving_average_period(&self) -> usize {
        self.by_symbol
            .values()
            .map(|p| p.moving_averages)
            .max()
            .unwrap_or(default_moving_averages())
    }

    #[must_use]
    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }
}

/// Risk-management limits enforced by the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum realized loss per UTC day before entries are suppressed.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,

    /// Maximum equity drawdown from peak, in percent.
    #[serde(default = "default_max_drawdown_percent")]
    pub max_drawdown_percent: Decimal,

    /// Entry suppression window after a failed entry, in seconds.
    #[serde(default = "default_cooldown_period_secs")]
    pub cooldown_period_secs: u64,
}

fn default_max_daily_loss() -> Decimal {
    Decimal::new(100, 0)
}

fn default_max_drawdown_percent() -> Decimal {
    Decimal::new(15, 0)
}

const fn default_cooldown_period_secs() -> u64 {
    3600
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: default_max_daily_loss(),
            max_drawdown_percent: default_max_drawdown_percent(),
            cooldown_period_secs: default_cooldown_period_secs(),
        }
    }
}

/// Engine-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Control-loop period in seconds, matching the bar interval.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Kline interval string passed to the market-data collaborator.
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,

    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    #[serde(default)]
    pub enable_live_trading: bool,

    /// Exchange minimum order notional in quote currency.
    #[serde(default = "default_min_notional")]
    pub min_notional: Decimal,

    #[serde(default)]
    pub risk: RiskConfig,
}

const fn default_cycle_interval_secs() -> u64 {
    3600
}

fn default_kline_interval() -> String {
    "1h".to_string()
}

const fn default_max_positions() -> usize {
    5
}

fn default_min_notional() -> Decimal {
    Decimal::new(10, 0)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            kline_interval: default_kline_interval(),
            max_positions: default_max_positions(),
            enable_live_trading: false,
            min_notional: default_min_notional(),
            risk: RiskConfig::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.enable_live_trading {
            ExecutionMode::Live
        } else {
            ExecutionMode::Paper
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params(symbol: &str, period: usize) -> TradingParameterSet {
        TradingParameterSet {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            z_score_threshold: 2.5,
            moving_averages: period,
            profit_percent: dec!(5),
            stop_loss_percent: dec!(2),
            allocation_percent: dec!(10),
            enabled: true,
        }
    }

    #[test]
    fn explicit_entry_wins_over_fallback() {
        let store = ParameterStore::new(vec![params("BTCUSDT", 7)], "USDT".to_string());
        let p = store.get("BTCUSDT");
        assert_eq!(p.moving_averages, 7);
        assert!((p.z_score_threshold - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_symbol_falls_back_to_defaults() {
        let store = ParameterStore::new(vec![], "USDT".to_string());
        let p = store.get("ETHUSDT");
        assert_eq!(p.base_asset, "ETH");
        assert_eq!(p.quote_asset, "USDT");
        assert_eq!(p.moving_averages, 5);
        assert!(p.enabled);
    }

    #[test]
    fn max_moving_average_period_spans_entries() {
        let store = ParameterStore::new(
            vec![params("BTCUSDT", 5), params("ETHUSDT", 20)],
            "USDT".to_string(),
        );
        assert_eq!(store.max_moving_average_period(), 20);
    }

    #[test]
    fn parameter_defaults_deserialize() {
        let p: TradingParameterSet = serde_json::from_str(
            r#"{"symbol":"SOLUSDT","base_asset":"SOL","quote_asset":"USDT"}"#,
        )
        .unwrap();
        assert_eq!(p.moving_averages, 5);
        assert_eq!(p.profit_percent, dec!(5));
        assert!(p.enabled);
    }
}
