//! Faults a simulated node can be told to exhibit.

use canmotion_shared::{ErrorCode, ErrorSeverity, GearMotorId, MoveAckId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Accepts every request but never reports a completion.
    Silent,
    /// Stalls during `seq`: reports `stopped_by_condition` and abandons the
    /// rest of its queue for the group.
    StallAt { seq: u8 },
    /// Reports `ack` instead of the natural ack for `seq`.
    AckWith { seq: u8, ack: MoveAckId },
    /// Raises a firmware error when `seq` finishes. Unrecoverable errors halt
    /// the node.
    FirmwareError {
        seq: u8,
        severity: ErrorSeverity,
        code: ErrorCode,
    },
    /// The given gear motor never answers the tip action at `seq`.
    DropGearMotor { seq: u8, motor: GearMotorId },
}

impl Fault {
    pub fn applies_to(&self, seq_id: u8) -> bool {
        match *self {
            Fault::Silent => true,
            Fault::StallAt { seq }
            | Fault::AckWith { seq, .. }
            | Fault::FirmwareError { seq, .. }
            | Fault::DropGearMotor { seq, .. } => seq == seq_id,
        }
    }
}
