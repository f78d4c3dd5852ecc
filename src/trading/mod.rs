pub mod execution;
pub mod exit_manager;

pub use execution::{
    ExecutionClient, Fill, OrderRequest, PaperExecution, Position, StopModification,
};
pub use exit_manager::{ExitConfig, ExitDecision, ExitRule, ExitStateMachine};
