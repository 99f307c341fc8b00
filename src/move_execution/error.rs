// src/move_execution/error.rs - Failures raised while scheduling or executing move groups

use canmotion_shared::{BusError, ErrorCode, ErrorSeverity, MoveAckId, NodeId, StopCondition};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("Move condition not met in group {group_id}: {node} did not satisfy {stop_condition} (ack: {ack})")]
    ConditionNotMet {
        group_id: u8,
        node: NodeId,
        stop_condition: StopCondition,
        ack: MoveAckId,
    },
    #[error("Move condition not met in group {group_id}")]
    GroupConditionNotMet { group_id: u8 },
    #[error(
        "Move group {group_id} timed out after {elapsed:?} (full timeout {full_timeout:?}, expected {expected_time:?}); missing: {}",
        format_nodes(.missing_nodes)
    )]
    TimedOut {
        group_id: u8,
        missing_nodes: Vec<NodeId>,
        full_timeout: Duration,
        expected_time: Duration,
        elapsed: Duration,
    },
    #[error("Motion failed in group {group_id} with {} errors", .errors.len())]
    MotionFailed { group_id: u8, errors: Vec<MoveError> },
    #[error("Firmware error from {node}: {error_code} ({severity:?})")]
    Firmware {
        node: NodeId,
        error_code: ErrorCode,
        severity: ErrorSeverity,
    },
    #[error("A move group must be prepped before it can be executed")]
    NotPrepped,
    #[error("Move groups must be scheduled before building a dispatcher")]
    NotScheduled,
    #[error("Move plan does not fit in 8-bit ids: {0}")]
    PlanTooLarge(String),
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl MoveError {
    pub fn is_estop(&self) -> bool {
        matches!(
            self,
            MoveError::Firmware {
                error_code: ErrorCode::EstopDetected,
                ..
            }
        )
    }
}

fn format_nodes(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(|node| node.name())
        .collect::<Vec<_>>()
        .join(", ")
}
