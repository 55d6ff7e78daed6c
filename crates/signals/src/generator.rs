//! Cross-sectional z-score signal generation.
//!
//! Each cycle, every tracked asset's rating is expressed in standard
//! deviations from the mean rating of the basket. Signals fire on the
//! moving average of that z-score rather than the instantaneous value:
//! sustained statistical deviation is required before committing capital,
//! which damps single-interval noise.

use arena_trade_core::ParameterStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Extra capacity kept beyond the largest configured moving-average period,
/// so a mid-run period increase does not immediately starve the average.
const HISTORY_SLACK: usize = 8;

/// One appended z-score observation for an asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZScoreEntry {
    pub timestamp: DateTime<Utc>,
    pub raw_z: f64,
    pub rating: f64,
}

/// Mean/stddev over the supplied ratings at one instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatingStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalDirection {
    Buy,
    Sell,
}

/// A threshold crossing on the moving-average z-score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub base_asset: String,
    pub direction: SignalDirection,
    pub raw_z: f64,
    pub moving_average_z: f64,
    pub rating: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// Output of one signal-generation pass.
#[derive(Debug, Clone)]
pub struct SignalBatch {
    pub signals: Vec<TradeSignal>,
    /// Raw z-score per asset.
    pub z_scores: HashMap<String, f64>,
    /// Moving-average z per enabled symbol, whether or not it crossed a
    /// threshold (exit evaluation needs these for open positions).
    pub moving_average_z: HashMap<String, f64>,
    pub statistics: RatingStatistics,
}

/// Generates signals from rating snapshots, owning the bounded per-asset
/// z-score history.
#[derive(Debug)]
pub struct SignalGenerator {
    history: HashMap<String, VecDeque<ZScoreEntry>>,
    capacity: usize,
}

impl SignalGenerator {
    /// `max_period` is the largest configured moving-average period; the
    /// history buffer holds that many entries plus slack, oldest evicted
    /// on insert.
    #[must_use]
    pub fn new(max_period: usize) -> Self {
        Self {
            history: HashMap::new(),
            capacity: max_period + HISTORY_SLACK,
        }
    }

    /// Runs one full pass: cross-sectional statistics, raw z per asset,
    /// history append, and per-symbol threshold evaluation.
    ///
    /// `ratings` is keyed by asset (the tracked universe); signals are
    /// produced for enabled symbols in `params` whose base asset has a
    /// rating.
    pub fn generate_signals(
        &mut self,
        ratings: &HashMap<String, f64>,
        params: &ParameterStore,
        now: DateTime<Utc>,
    ) -> SignalBatch {
        let statistics = Self::statistics(ratings);
        let mut z_scores = HashMap::with_capacity(ratings.len());

        let mut assets: Vec<&String> = ratings.keys().collect();
        assets.sort();

        for asset in assets {
            let rating = ratings[asset];
            let raw_z = if statistics.std_dev > 0.0 {
                (rating - statistics.mean) / statistics.std_dev
            } else {
                0.0
            };
            z_scores.insert(asset.clone(), raw_z);

            let buffer = self.history.entry(asset.clone()).or_default();
            while buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(ZScoreEntry {
                timestamp: now,
                raw_z,
                rating,
            });
        }

        let mut signals = Vec::new();
        let mut symbol_ma = HashMap::new();
        for symbol in params.enabled_symbols() {
            let symbol_params = params.get(&symbol);
            let Some(&raw_z) = z_scores.get(&symbol_params.base_asset) else {
                continue;
            };
            let rating = ratings[&symbol_params.base_asset];

            let moving_average_z =
                self.moving_average_z(&symbol_params.base_asset, symbol_params.moving_averages, raw_z);
            symbol_ma.insert(symbol.clone(), moving_average_z);

            let threshold = symbol_params.z_score_threshold;
            let direction = if moving_average_z >= threshold {
                Some(SignalDirection::Buy)
            } else if moving_average_z <= -threshold {
                Some(SignalDirection::Sell)
            } else {
                None
            };

            if let Some(direction) = direction {
                tracing::debug!(
                    symbol = %symbol,
                    ?direction,
                    moving_average_z,
                    threshold,
                    "signal threshold crossed"
                );
                signals.push(TradeSignal {
                    symbol,
                    base_asset: symbol_params.base_asset,
                    direction,
                    raw_z,
                    moving_average_z,
                    rating,
                    threshold,
                    timestamp: now,
                });
            }
        }

        SignalBatch {
            signals,
            z_scores,
            moving_average_z: symbol_ma,
            statistics,
        }
    }

    /// Mean of the last `period` raw z-scores; degrades to the raw z when
    /// the history is still shorter than the period.
    fn moving_average_z(&self, asset: &str, period: usize, raw_z: f64) -> f64 {
        let Some(buffer) = self.history.get(asset) else {
            return raw_z;
        };
        if buffer.len() < period || period == 0 {
            return raw_z;
        }
        let sum: f64 = buffer.iter().rev().take(period).map(|e| e.raw_z).sum();
        sum / period as f64
    }

    #[must_use]
    pub fn history_len(&self, asset: &str) -> usize {
        self.history.get(asset).map_or(0, VecDeque::len)
    }

    fn statistics(ratings: &HashMap<String, f64>) -> RatingStatistics {
        let count = ratings.len();
        if count == 0 {
            return RatingStatistics {
                mean: 0.0,
                std_dev: 0.0,
                count: 0,
            };
        }
        let mean = ratings.values().sum::<f64>() / count as f64;
        let variance =
            ratings.values().map(|r| (r - mean) * (r - mean)).sum::<f64>() / count as f64;
        RatingStatistics {
            mean,
            std_dev: variance.sqrt(),
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_trade_core::TradingParameterSet;
    use rust_decimal_macros::dec;

    fn store(threshold: f64, period: usize) -> ParameterStore {
        ParameterStore::new(
            vec![TradingParameterSet {
                symbol: "OUTUSDT".to_string(),
                base_asset: "OUT".to_string(),
                quote_asset: "USDT".to_string(),
                z_score_threshold: threshold,
                moving_averages: period,
                profit_percent: dec!(5),
                stop_loss_percent: dec!(2),
                allocation_percent: dec!(10),
                enabled: true,
            }],
            "USDT".to_string(),
        )
    }

    /// Nine assets at 1500 plus one outlier: the outlier's raw z is exactly
    /// sqrt(n - 1) = 3 for n = 10.
    fn outlier_ratings() -> HashMap<String, f64> {
        let mut ratings = HashMap::new();
        for i in 0..9 {
            ratings.insert(format!("A{i}"), 1500.0);
        }
        ratings.insert("OUT".to_string(), 1600.0);
        ratings
    }

    #[test]
    fn identical_ratings_give_zero_z_and_no_signals() {
        let mut generator = SignalGenerator::new(5);
        let ratings: HashMap<String, f64> =
            (0..5).map(|i| (format!("A{i}"), 1500.0)).collect();
        let params = store(0.5, 5);

        for _ in 0..10 {
            let batch = generator.generate_signals(&ratings, &params, Utc::now());
            assert!(batch.signals.is_empty());
            assert!(batch.z_scores.values().all(|z| *z == 0.0));
            assert_eq!(batch.statistics.std_dev, 0.0);
        }
    }

    #[test]
    fn sustained_deviation_fires_buy_at_threshold() {
        // Raw z history [3, 3, 3, 3, 3] with period 5.
        let mut generator = SignalGenerator::new(5);
        let ratings = outlier_ratings();
        let params = store(2.5, 5);

        let mut last = None;
        for _ in 0..5 {
            last = Some(generator.generate_signals(&ratings, &params, Utc::now()));
        }
        let batch = last.unwrap();
        assert!((batch.z_scores["OUT"] - 3.0).abs() < 1e-9);

        let signal = batch
            .signals
            .iter()
            .find(|s| s.symbol == "OUTUSDT")
            .expect("buy signal expected");
        assert_eq!(signal.direction, SignalDirection::Buy);
        assert!((signal.moving_average_z - 3.0).abs() < 1e-9);
    }

    #[test]
    fn higher_threshold_suppresses_the_same_history() {
        let mut generator = SignalGenerator::new(5);
        let ratings = outlier_ratings();
        let params = store(3.5, 5);

        let mut last = None;
        for _ in 0..5 {
            last = Some(generator.generate_signals(&ratings, &params, Utc::now()));
        }
        assert!(last.unwrap().signals.is_empty());
    }

    #[test]
    fn negative_deviation_fires_sell() {
        let mut generator = SignalGenerator::new(5);
        let mut ratings = HashMap::new();
        for i in 0..9 {
            ratings.insert(format!("A{i}"), 1500.0);
        }
        ratings.insert("OUT".to_string(), 1400.0);
        let params = store(2.5, 5);

        let mut last = None;
        for _ in 0..5 {
            last = Some(generator.generate_signals(&ratings, &params, Utc::now()));
        }
        let batch = last.unwrap();
        let signal = &batch.signals[0];
        assert_eq!(signal.direction, SignalDirection::Sell);
        assert!((signal.moving_average_z + 3.0).abs() < 1e-9);
    }

    #[test]
    fn short_history_degrades_to_raw_z() {
        let mut generator = SignalGenerator::new(5);
        let ratings = outlier_ratings();
        let params = store(2.5, 5);

        // First pass: one entry of history, period 5 — raw z is used and
        // the signal still fires.
        let batch = generator.generate_signals(&ratings, &params, Utc::now());
        let signal = &batch.signals[0];
        assert!((signal.moving_average_z - signal.raw_z).abs() < 1e-12);
        assert_eq!(signal.direction, SignalDirection::Buy);
    }

    #[test]
    fn history_is_bounded_with_oldest_evicted() {
        let mut generator = SignalGenerator::new(5);
        let ratings = outlier_ratings();
        let params = store(2.5, 5);

        for _ in 0..100 {
            generator.generate_signals(&ratings, &params, Utc::now());
        }
        assert_eq!(generator.history_len("OUT"), 5 + HISTORY_SLACK);
    }

    #[test]
    fn empty_ratings_produce_empty_batch() {
        let mut generator = SignalGenerator::new(5);
        let batch =
            generator.generate_signals(&HashMap::new(), &store(2.5, 5), Utc::now());
        assert!(batch.signals.is_empty());
        assert_eq!(batch.statistics.count, 0);
    }

    #[test]
    fn disabled_symbols_are_skipped() {
        let mut generator = SignalGenerator::new(5);
        let ratings = outlier_ratings();
        let mut params_set = store(2.5, 5).get("OUTUSDT");
        params_set.enabled = false;
        let params = ParameterStore::new(vec![params_set], "USDT".to_string());

        let batch = generator.generate_signals(&ratings, &params, Utc::now());
        assert!(batch.signals.is_empty());
    }
}
