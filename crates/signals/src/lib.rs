pub mod generator;

pub use generator::{
    RatingStatistics, SignalBatch, SignalDirection, SignalGenerator, TradeSignal, ZScoreEntry,
};
