pub mod engine;
pub mod glicko;
pub mod hybrid;

pub use engine::{AssetRatingState, RatingEngine, RatingStore};
pub use hybrid::{classify, HybridScore, Observation, VolumeMetrics};
