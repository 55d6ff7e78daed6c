pub mod allocation;
pub mod executor;
pub mod manager;
pub mod oco;
pub mod position;
pub mod risk;

pub use allocation::{
    AllocationManager, AllocationRejection, AllocationReservation, AllocationStatus,
    ReservationOutcome,
};
pub use executor::{
    EntryFill, ExecutionAdapter, ExitFill, LiveBalanceSource, LiveExecutionAdapter,
    PaperExecutionAdapter, VirtualBalance,
};
pub use manager::{EngineCommand, EngineHandle, EngineStatus, PositionManager, PositionSummary};
pub use oco::{OcoPriceError, OcoPrices, OcoTrigger, ProfitLoss};
pub use position::{OrderRefs, Position, PositionBook, PositionState};
pub use risk::RiskTracker;
