// canmotion_shared::stop_condition - declared stop conditions and their wire mask

use crate::constants::MoveAckId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The criterion under which a step is considered correctly finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    #[default]
    None,
    LimitSwitch,
    SyncLine,
    EncoderPosition,
    GripperForce,
    Stall,
    LimitSwitchBackoff,
}

const COMPLETE_OR_STOPPED: &[MoveAckId] = &[
    MoveAckId::CompleteWithoutCondition,
    MoveAckId::StoppedByCondition,
];
const STOPPED_ONLY: &[MoveAckId] = &[MoveAckId::StoppedByCondition];

impl StopCondition {
    pub fn bits(self) -> u8 {
        match self {
            StopCondition::None => 0x00,
            StopCondition::LimitSwitch => 0x01,
            StopCondition::SyncLine => 0x02,
            StopCondition::EncoderPosition => 0x04,
            StopCondition::GripperForce => 0x08,
            StopCondition::Stall => 0x10,
            StopCondition::LimitSwitchBackoff => 0x40,
        }
    }

    /// Acks a node may answer with when it executed a step declared with this
    /// condition. Anything else means the condition was not met.
    ///
    /// Limit-switch moves must end on the switch; every other condition may
    /// either run to completion or stop early on its trigger. Timeouts and
    /// position errors are never acceptable.
    pub fn acceptable_acks(self) -> &'static [MoveAckId] {
        match self {
            StopCondition::LimitSwitch | StopCondition::LimitSwitchBackoff => STOPPED_ONLY,
            StopCondition::None
            | StopCondition::SyncLine
            | StopCondition::EncoderPosition
            | StopCondition::GripperForce
            | StopCondition::Stall => COMPLETE_OR_STOPPED,
        }
    }

    pub fn accepts(self, ack: MoveAckId) -> bool {
        self.acceptable_acks().contains(&ack)
    }
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopCondition::None => "none",
            StopCondition::LimitSwitch => "limit_switch",
            StopCondition::SyncLine => "sync_line",
            StopCondition::EncoderPosition => "encoder_position",
            StopCondition::GripperForce => "gripper_force",
            StopCondition::Stall => "stall",
            StopCondition::LimitSwitchBackoff => "limit_switch_backoff",
        };
        f.write_str(name)
    }
}

/// Stop-condition bitmask as sent to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StopConditionMask(pub u8);

impl StopConditionMask {
    /// Tells the firmware not to treat stalls as errors for this move.
    pub const IGNORE_STALLS: u8 = 0x20;

    pub fn new(condition: StopCondition, ignore_stalls: bool) -> Self {
        let mut bits = condition.bits();
        if ignore_stalls {
            bits |= Self::IGNORE_STALLS;
        }
        Self(bits)
    }

    pub fn contains(self, condition: StopCondition) -> bool {
        let bits = condition.bits();
        bits != 0 && self.0 & bits == bits
    }

    pub fn ignores_stalls(self) -> bool {
        self.0 & Self::IGNORE_STALLS != 0
    }
}
