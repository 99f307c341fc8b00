// canmotion: move-group scheduling and dispatch for CAN-connected motion nodes
pub mod motion;
pub mod move_execution;

pub use canmotion_shared as shared;
pub use motion::{MoveGroup, MoveGroups, MovePlan, MoveStep, Sequence};
pub use move_execution::{MoveError, MoveGroupRunner, MoveOutcome};
