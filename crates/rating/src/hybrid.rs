//! Hybrid performance score classification.
//!
//! Each observed interval of a trading pair is scored as one "game" between
//! the base and quote asset: price direction decides the winner, taker-side
//! volume dominance decides the confidence. Scores are zero-sum and discrete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fractional price moves below this magnitude count as a draw.
pub const DRAW_EPSILON: f64 = 1e-4;

/// Taker-side volume split for one interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeMetrics {
    pub total_volume: f64,
    pub taker_buy_volume: f64,
}

/// One interval of a trading pair's price action, consumed into a
/// [`HybridScore`] immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub base_asset: String,
    pub quote_asset: String,
    pub open: f64,
    pub close: f64,
    pub timestamp: DateTime<Utc>,
    pub volume: Option<VolumeMetrics>,
}

impl Observation {
    /// Fractional price change over the interval.
    #[must_use]
    pub fn price_change(&self) -> f64 {
        (self.close - self.open) / self.open
    }
}

/// Zero-sum game outcome: `base + quote == 1.0`, each side one of
/// {0, 0.25, 0.5, 0.75, 1.0}.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridScore {
    pub base: f64,
    pub quote: f64,
}

impl HybridScore {
    const DRAW: Self = Self {
        base: 0.5,
        quote: 0.5,
    };

    fn base_score(base: f64) -> Self {
        Self {
            base,
            quote: 1.0 - base,
        }
    }
}

/// Classifies an observation into its hybrid score.
///
/// Invalid inputs (non-positive price, negative volume, taker-buy exceeding
/// total volume) short-circuit to a draw and are logged as data-quality
/// events — never raised as errors. Without volume data, price direction
/// alone classifies at low confidence (0.75/0.25).
#[must_use]
pub fn classify(observation: &Observation) -> HybridScore {
    if observation.open <= 0.0
        || observation.close <= 0.0
        || !observation.open.is_finite()
        || !observation.close.is_finite()
    {
        tracing::warn!(
            base = %observation.base_asset,
            quote = %observation.quote_asset,
            open = observation.open,
            close = observation.close,
            "data quality: non-positive or non-finite price, scoring as draw"
        );
        return HybridScore::DRAW;
    }

    if let Some(volume) = &observation.volume {
        if volume.total_volume < 0.0
            || volume.taker_buy_volume < 0.0
            || volume.taker_buy_volume > volume.total_volume
        {
            tracing::warn!(
                base = %observation.base_asset,
                quote = %observation.quote_asset,
                total = volume.total_volume,
                taker_buy = volume.taker_buy_volume,
                "data quality: inconsistent volume split, scoring as draw"
            );
            return HybridScore::DRAW;
        }
    }

    let change = observation.price_change();
    if change.abs() < DRAW_EPSILON {
        return HybridScore::DRAW;
    }

    let buy_dominant = observation
        .volume
        .map(|v| v.taker_buy_volume > v.total_volume - v.taker_buy_volume);

    if change > 0.0 {
        match buy_dominant {
            // Price up with aggressive buying: decisive win for base.
            Some(true) => HybridScore::base_score(1.0),
            // Price up against sell pressure, or no volume data: low confidence.
            Some(false) | None => HybridScore::base_score(0.75),
        }
    } else {
        match buy_dominant {
            // Price down with aggressive selling: decisive loss for base.
            Some(false) => HybridScore::base_score(0.0),
            Some(true) | None => HybridScore::base_score(0.25),
        }
    }
}
