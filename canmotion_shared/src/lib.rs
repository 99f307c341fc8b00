// canmotion_shared: firmware bindings and the bus contract shared by the
// move-group core and the simulator

pub mod config;
pub mod constants;
pub mod messages;
pub mod messenger;
pub mod node;
pub mod stop_condition;

pub use constants::{
    ErrorCode, ErrorSeverity, InterruptRates, MotorClass, MotorPositionFlags, MoveAckId,
    TipActionType,
};
pub use messages::{IncomingMessage, Request};
pub use messenger::{BusError, ListenerGuard, ListenerId, MessageListener, Messenger};
pub use node::{GearMotorId, NodeId};
pub use stop_condition::{StopCondition, StopConditionMask};
