// src/move_execution/mod.rs - Scheduling and dispatch of move groups over the CAN bus
pub mod completions;
pub mod dispatcher;
pub mod error;
pub mod runner;
pub mod scheduled_move;
pub mod scheduler;

pub use completions::{
    Completion, CompletionMessage, MotorPositionStatus, NodeDict, accumulate_gear_motor_completions,
    accumulate_move_completions,
};
pub use dispatcher::{GroupState, MoveDispatcher};
pub use error::MoveError;
pub use runner::{MoveGroupRunner, MoveOutcome};
pub use scheduled_move::{MoveGroupInfo, ScheduledMove};
pub use scheduler::{MoveScheduler, build_message, check_group_ids};
