//! Live rating state: the store, the engine, and per-period batch updates.

use crate::glicko::{
    self, GameResult, DEFAULT_RATING, DEFAULT_RD, DEFAULT_VOLATILITY, RATING_MAX, RATING_MIN,
    RD_MAX, RD_MIN, VOLATILITY_MAX, VOLATILITY_MIN,
};
use crate::hybrid::{classify, HybridScore, Observation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Damping applied when recentering the cross-sectional mean toward 1500.
const MEAN_RECENTER_FACTOR: f64 = 0.1;

/// Per-asset Glicko-2 state on the display scale.
///
/// Invariants: rating in [800, 2200], deviation in [50, 350], volatility in
/// [0.001, 0.5]. Mutated only by [`RatingEngine`]; lives for the engine's
/// lifetime once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRatingState {
    pub symbol: String,
    pub rating: f64,
    pub rating_deviation: f64,
    pub volatility: f64,
    pub last_updated: DateTime<Utc>,
}

impl AssetRatingState {
    fn new(symbol: String, now: DateTime<Utc>) -> Self {
        Self {
            symbol,
            rating: DEFAULT_RATING,
            rating_deviation: DEFAULT_RD,
            volatility: DEFAULT_VOLATILITY,
            last_updated: now,
        }
    }
}

/// Owned map of asset rating states.
///
/// An explicit instance held by the engine rather than a module-level
/// singleton, so independent engines (e.g. concurrent backtests) never
/// cross-contaminate.
#[derive(Debug, Default)]
pub struct RatingStore {
    assets: HashMap<String, AssetRatingState>,
}

impl RatingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&AssetRatingState> {
        self.assets.get(symbol)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    fn ensure(&mut self, symbol: &str, now: DateTime<Utc>) -> &mut AssetRatingState {
        self.assets
            .entry(symbol.to_string())
            .or_insert_with(|| AssetRatingState::new(symbol.to_string(), now))
    }
}

/// Glicko-2 rating engine over pairwise price/volume observations.
///
/// Observations accumulate into per-asset game lists during an interval;
/// [`RatingEngine::apply_period`] runs the batched update and
/// [`RatingEngine::normalize_ratings`] recenters afterwards. Both are
/// invoked once per interval, in that order, never interleaved.
#[derive(Debug, Default)]
pub struct RatingEngine {
    store: RatingStore,
    pending: HashMap<String, Vec<GameResult>>,
}

impl RatingEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: RatingStore::new(),
            pending: HashMap::new(),
        }
    }

    /// Idempotent lazy init: 1500 / 350 / 0.06 on first sight.
    pub fn ensure_asset_exists(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.store.ensure(symbol, now);
    }

    /// Scores one observation and queues the resulting game for both sides.
    ///
    /// Opponent ratings are captured at observation time, i.e. period-start
    /// values, since updates only apply in [`Self::apply_period`].
    pub fn process_observation(&mut self, observation: &Observation) -> HybridScore {
        self.ensure_asset_exists(&observation.base_asset, observation.timestamp);
        self.ensure_asset_exists(&observation.quote_asset, observation.timestamp);

        let score = classify(observation);

        let (base_mu, base_phi) = self.internal_state(&observation.base_asset);
        let (quote_mu, quote_phi) = self.internal_state(&observation.quote_asset);

        self.pending
            .entry(observation.base_asset.clone())
            .or_default()
            .push(GameResult {
                opponent_mu: quote_mu,
                opponent_phi: quote_phi,
                score: score.base,
            });
        self.pending
            .entry(observation.quote_asset.clone())
            .or_default()
            .push(GameResult {
                opponent_mu: base_mu,
                opponent_phi: base_phi,
                score: score.quote,
            });

        score
    }

    /// Applies all queued games for the interval in one batch.
    ///
    /// Assets with no games get the standard no-play deviation inflation.
    /// A non-finite update is discarded: the prior state is retained and a
    /// warning logged.
    pub fn apply_period(&mut self, now: DateTime<Utc>) {
        let pending = std::mem::take(&mut self.pending);

        let mut symbols: Vec<String> = self.store.assets.keys().cloned().collect();
        symbols.sort();

        for symbol in symbols {
            let Some(state) = self.store.assets.get_mut(&symbol) else {
                continue;
            };
            let (mu, phi) = glicko::to_internal_scale(state.rating, state.rating_deviation);

            match pending.get(&symbol) {
                Some(games) if !games.is_empty() => {
                    match glicko::rate(mu, phi, state.volatility, games) {
                        Some((mu_prime, phi_prime, sigma_prime)) => {
                            let (rating, rd) = glicko::from_internal_scale(mu_prime, phi_prime);
                            Self::store_clamped(state, rating, rd, sigma_prime, now);
                        }
                        None => {
                            tracing::warn!(
                                symbol = %symbol,
                                games = games.len(),
                                "non-finite rating update discarded, prior state retained"
                            );
                        }
                    }
                }
                _ => {
                    let rating = state.rating;
                    let volatility = state.volatility;
                    let phi_star = glicko::inflate_deviation(phi, volatility);
                    let (_, rd) = glicko::from_internal_scale(mu, phi_star);
                    Self::store_clamped(state, rating, rd, volatility, now);
                }
            }
        }
    }

    /// Recenters the cross-sectional mean toward 1500 with a damped uniform
    /// shift, bounding long-run drift without disturbing relative order.
    pub fn normalize_ratings(&mut self) {
        if self.store.is_empty() {
            return;
        }
        let mean: f64 = self
            .store
            .assets
            .values()
            .map(|s| s.rating)
            .sum::<f64>()
            / self.store.len() as f64;
        let shift = MEAN_RECENTER_FACTOR * (DEFAULT_RATING - mean);
        if shift.abs() < f64::EPSILON {
            return;
        }

        for state in self.store.assets.values_mut() {
            let shifted = state.rating + shift;
            let rd = state.rating_deviation;
            let volatility = state.volatility;
            let last_updated = state.last_updated;
            Self::store_clamped(state, shifted, rd, volatility, last_updated);
        }
    }

    /// Read-only snapshot of one asset's state.
    #[must_use]
    pub fn get_state(&self, symbol: &str) -> Option<&AssetRatingState> {
        self.store.get(symbol)
    }

    /// Current rating per asset.
    #[must_use]
    pub fn ratings_snapshot(&self) -> HashMap<String, f64> {
        self.store
            .assets
            .iter()
            .map(|(symbol, state)| (symbol.clone(), state.rating))
            .collect()
    }

    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.store.len()
    }

    fn internal_state(&self, symbol: &str) -> (f64, f64) {
        let state = &self.store.assets[symbol];
        glicko::to_internal_scale(state.rating, state.rating_deviation)
    }

    fn store_clamped(
        state: &mut AssetRatingState,
        rating: f64,
        rd: f64,
        volatility: f64,
        now: DateTime<Utc>,
    ) {
        let clamped_rating = rating.clamp(RATING_MIN, RATING_MAX);
        let clamped_rd = rd.clamp(RD_MIN, RD_MAX);
        let clamped_vol = volatility.clamp(VOLATILITY_MIN, VOLATILITY_MAX);

        if clamped_rating != rating || clamped_rd != rd || clamped_vol != volatility {
            tracing::warn!(
                symbol = %state.symbol,
                rating,
                rd,
                volatility,
                "rating state clamped to bounds"
            );
        }

        state.rating = clamped_rating;
        state.rating_deviation = clamped_rd;
        state.volatility = clamped_vol;
        state.last_updated = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid::VolumeMetrics;

    fn observation(base: &str, open: f64, close: f64) -> Observation {
        Observation {
            base_asset: base.to_string(),
            quote_asset: "USDT".to_string(),
            open,
            close,
            timestamp: Utc::now(),
            volume: Some(VolumeMetrics {
                total_volume: 1000.0,
                taker_buy_volume: if close > open { 800.0 } else { 200.0 },
            }),
        }
    }

    #[test]
    fn first_observation_lazily_creates_both_assets() {
        let mut engine = RatingEngine::new();
        engine.process_observation(&observation("BTC", 100.0, 105.0));

        let btc = engine.get_state("BTC").unwrap();
        assert!((btc.rating - 1500.0).abs() < 1e-9);
        assert!((btc.rating_deviation - 350.0).abs() < 1e-9);
        assert!((btc.volatility - 0.06).abs() < 1e-9);
        assert!(engine.get_state("USDT").is_some());
    }

    #[test]
    fn ensure_asset_exists_is_idempotent() {
        let mut engine = RatingEngine::new();
        let now = Utc::now();
        engine.ensure_asset_exists("BTC", now);
        engine.process_observation(&observation("BTC", 100.0, 105.0));
        engine.apply_period(now);
        let rating = engine.get_state("BTC").unwrap().rating;

        engine.ensure_asset_exists("BTC", Utc::now());
        assert!((engine.get_state("BTC").unwrap().rating - rating).abs() < 1e-12);
    }

    #[test]
    fn winner_gains_loser_drops() {
        let mut engine = RatingEngine::new();
        engine.process_observation(&observation("BTC", 100.0, 105.0));
        engine.apply_period(Utc::now());

        assert!(engine.get_state("BTC").unwrap().rating > 1500.0);
        assert!(engine.get_state("USDT").unwrap().rating < 1500.0);
    }

    #[test]
    fn draw_between_equal_assets_leaves_ratings_unchanged() {
        let mut engine = RatingEngine::new();
        engine.process_observation(&observation("BTC", 100.0, 100.0));
        engine.apply_period(Utc::now());

        // Equal opponents with score 0.5 each: delta contribution is zero,
        // only the deviation moves.
        let btc = engine.get_state("BTC").unwrap();
        let usdt = engine.get_state("USDT").unwrap();
        assert!((btc.rating - 1500.0).abs() < 1e-6);
        assert!((usdt.rating - 1500.0).abs() < 1e-6);
        assert!(btc.rating_deviation < 350.0);
    }

    #[test]
    fn states_stay_bounded_and_finite_under_sustained_streaks() {
        let mut engine = RatingEngine::new();
        for _ in 0..200 {
            engine.process_observation(&observation("BTC", 100.0, 110.0));
            engine.process_observation(&observation("DOGE", 100.0, 90.0));
            engine.apply_period(Utc::now());
        }

        for symbol in ["BTC", "DOGE", "USDT"] {
            let state = engine.get_state(symbol).unwrap();
            assert!(state.rating.is_finite());
            assert!((800.0..=2200.0).contains(&state.rating), "{symbol}");
            assert!((50.0..=350.0).contains(&state.rating_deviation));
            assert!((0.001..=0.5).contains(&state.volatility));
        }
    }

    #[test]
    fn no_games_inflates_deviation_up_to_cap() {
        let mut engine = RatingEngine::new();
        engine.process_observation(&observation("BTC", 100.0, 105.0));
        engine.apply_period(Utc::now());
        let rd_after_play = engine.get_state("BTC").unwrap().rating_deviation;

        engine.apply_period(Utc::now());
        let rd_idle = engine.get_state("BTC").unwrap().rating_deviation;
        assert!(rd_idle > rd_after_play);
        assert!(rd_idle <= 350.0);
    }

    #[test]
    fn normalize_pulls_mean_toward_center() {
        let mut engine = RatingEngine::new();
        for _ in 0..20 {
            engine.process_observation(&observation("BTC", 100.0, 110.0));
            engine.process_observation(&observation("ETH", 100.0, 108.0));
        }
        engine.apply_period(Utc::now());

        let mean_before: f64 = engine.ratings_snapshot().values().sum::<f64>() / 3.0;
        engine.normalize_ratings();
        let mean_after: f64 = engine.ratings_snapshot().values().sum::<f64>() / 3.0;

        assert!((mean_after - 1500.0).abs() <= (mean_before - 1500.0).abs());
    }

    #[test]
    fn normalize_preserves_relative_order() {
        let mut engine = RatingEngine::new();
        engine.process_observation(&observation("BTC", 100.0, 110.0));
        engine.process_observation(&observation("DOGE", 100.0, 90.0));
        engine.apply_period(Utc::now());
        engine.normalize_ratings();

        let snapshot = engine.ratings_snapshot();
        assert!(snapshot["BTC"] > snapshot["DOGE"]);
    }
}
