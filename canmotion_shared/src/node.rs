// canmotion_shared::node - bus node identities

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown {kind} value: {value:#04x}")]
pub struct UnknownIdError {
    pub kind: &'static str,
    pub value: u8,
}

/// An addressable endpoint on the CAN bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NodeId {
    Broadcast = 0x00,
    Host = 0x10,
    Gripper = 0x20,
    GripperZ = 0x21,
    GripperG = 0x22,
    GantryX = 0x30,
    GantryY = 0x40,
    Head = 0x50,
    HeadL = 0x51,
    HeadR = 0x52,
    PipetteLeft = 0x60,
    PipetteRight = 0x70,
}

impl NodeId {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeId::Broadcast => "broadcast",
            NodeId::Host => "host",
            NodeId::Gripper => "gripper",
            NodeId::GripperZ => "gripper_z",
            NodeId::GripperG => "gripper_g",
            NodeId::GantryX => "gantry_x",
            NodeId::GantryY => "gantry_y",
            NodeId::Head => "head",
            NodeId::HeadL => "head_l",
            NodeId::HeadR => "head_r",
            NodeId::PipetteLeft => "pipette_left",
            NodeId::PipetteRight => "pipette_right",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for NodeId {
    type Error = UnknownIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let node = match value {
            0x00 => NodeId::Broadcast,
            0x10 => NodeId::Host,
            0x20 => NodeId::Gripper,
            0x21 => NodeId::GripperZ,
            0x22 => NodeId::GripperG,
            0x30 => NodeId::GantryX,
            0x40 => NodeId::GantryY,
            0x50 => NodeId::Head,
            0x51 => NodeId::HeadL,
            0x52 => NodeId::HeadR,
            0x60 => NodeId::PipetteLeft,
            0x70 => NodeId::PipetteRight,
            _ => return Err(UnknownIdError { kind: "node id", value }),
        };
        Ok(node)
    }
}

/// One of the two gear motors driving a 96-channel tip action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GearMotorId {
    Left = 0,
    Right = 1,
}

impl GearMotorId {
    pub const ALL: [GearMotorId; 2] = [GearMotorId::Left, GearMotorId::Right];
}

impl TryFrom<u8> for GearMotorId {
    type Error = UnknownIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GearMotorId::Left),
            1 => Ok(GearMotorId::Right),
            _ => Err(UnknownIdError { kind: "gear motor id", value }),
        }
    }
}
