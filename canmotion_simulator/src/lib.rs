//! Simulated CAN motion nodes for driving the move-group runner without hardware.
//!
//! Each node keeps the moves scheduled on it keyed by `(group, seq)`. When a
//! group is executed, every participating node walks its sequences in order,
//! sleeping for each move's duration and then reporting a completion the way
//! the firmware does. Faults can be injected per node.

pub mod bus;
pub mod event_log;
pub mod fault;
pub mod node;

pub use bus::{SimOptions, SimulatedBus};
pub use event_log::{SentRecord, SimClock};
pub use fault::Fault;
pub use node::SimNode;
