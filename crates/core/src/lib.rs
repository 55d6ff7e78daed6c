pub mod config;
pub mod config_loader;
pub mod events;
pub mod market;
pub mod traits;

pub use config::{EngineConfig, ExecutionMode, ParameterStore, RiskConfig, TradingParameterSet};
pub use config_loader::ConfigLoader;
pub use events::{EngineEvent, EventBus, ExitReason, RiskLimitKind};
pub use market::{
    AccountInfo, Balance, Kline, OcoOrderAck, OrderAck, OrderSide, OrderStatus, PriceUpdate,
};
pub use traits::{BalanceSource, ExchangeClient};
