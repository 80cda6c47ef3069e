//! Built-in node handlers, one module per [`crate::types::HandlerType`].

mod codergen;
mod conditional;
mod exit;
mod fail;
mod fan_in;
mod parallel;
mod stack_manager;
mod start;
mod tool;
mod wait_human;

pub use codergen::{CodergenBackend, CodergenHandler, SimulationBackend};
pub use conditional::ConditionalHandler;
pub use exit::ExitHandler;
pub use fail::FailHandler;
pub use fan_in::FanInHandler;
pub use parallel::{BranchOutcome, ErrorPolicy, JoinPolicy, ParallelHandler};
pub use stack_manager::StackManagerHandler;
pub use start::StartHandler;
pub use tool::ToolHandler;
pub use wait_human::WaitHumanHandler;
