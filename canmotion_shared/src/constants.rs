// canmotion_shared::constants - firmware enumerations and timing constants

use serde::{Deserialize, Serialize};
use std::fmt;

/// Motor families that run their step generators at different interrupt rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorClass {
    Stepper,
    TipAction,
    Brushed,
}

/// Interrupt rates (ticks per second) for each motor class.
///
/// Durations, velocities and accelerations are sent to the firmware in units of
/// these ticks, so every message builder takes the table explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct InterruptRates {
    #[serde(default = "default_stepper_rate")]
    pub stepper: u32,
    #[serde(default = "default_tip_action_rate")]
    pub tip_action: u32,
    #[serde(default = "default_brushed_rate")]
    pub brushed: u32,
}

impl InterruptRates {
    pub fn for_class(&self, class: MotorClass) -> u32 {
        match class {
            MotorClass::Stepper => self.stepper,
            MotorClass::TipAction => self.tip_action,
            MotorClass::Brushed => self.brushed,
        }
    }
}

impl Default for InterruptRates {
    fn default() -> Self {
        Self {
            stepper: default_stepper_rate(),
            tip_action: default_tip_action_rate(),
            brushed: default_brushed_rate(),
        }
    }
}

fn default_stepper_rate() -> u32 { 100_000 }
fn default_tip_action_rate() -> u32 { 200_000 }
fn default_brushed_rate() -> u32 { 32_000 }

/// How a node finished a move, reported in every completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MoveAckId {
    CompleteWithoutCondition = 1,
    StoppedByCondition = 2,
    Timeout = 3,
    PositionError = 4,
}

impl fmt::Display for MoveAckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoveAckId::CompleteWithoutCondition => "complete_without_condition",
            MoveAckId::StoppedByCondition => "stopped_by_condition",
            MoveAckId::Timeout => "timeout",
            MoveAckId::PositionError => "position_error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ErrorSeverity {
    None = 0,
    Warning = 1,
    Recoverable = 2,
    Unrecoverable = 3,
}

/// Bus-level status codes returned by acknowledged sends and carried by
/// asynchronous error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    InvalidSize,
    BadChecksum,
    InvalidByteCount,
    InvalidInput,
    Hardware,
    Timeout,
    EstopDetected,
    CollisionDetected,
    LabwareDropped,
    EstopReleased,
    MotorBusy,
    StopRequested,
    OverPressure,
    DoorOpen,
    ReedOpen,
    MotorDriverErrorDetected,
    SafetyRelayInactive,
    Unknown(u16),
}

impl ErrorCode {
    pub fn value(self) -> u16 {
        match self {
            ErrorCode::Ok => 0x00,
            ErrorCode::InvalidSize => 0x01,
            ErrorCode::BadChecksum => 0x02,
            ErrorCode::InvalidByteCount => 0x03,
            ErrorCode::InvalidInput => 0x04,
            ErrorCode::Hardware => 0x05,
            ErrorCode::Timeout => 0x06,
            ErrorCode::EstopDetected => 0x07,
            ErrorCode::CollisionDetected => 0x08,
            ErrorCode::LabwareDropped => 0x09,
            ErrorCode::EstopReleased => 0x0A,
            ErrorCode::MotorBusy => 0x0B,
            ErrorCode::StopRequested => 0x0C,
            ErrorCode::OverPressure => 0x0D,
            ErrorCode::DoorOpen => 0x0E,
            ErrorCode::ReedOpen => 0x0F,
            ErrorCode::MotorDriverErrorDetected => 0x10,
            ErrorCode::SafetyRelayInactive => 0x11,
            ErrorCode::Unknown(v) => v,
        }
    }
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            0x00 => ErrorCode::Ok,
            0x01 => ErrorCode::InvalidSize,
            0x02 => ErrorCode::BadChecksum,
            0x03 => ErrorCode::InvalidByteCount,
            0x04 => ErrorCode::InvalidInput,
            0x05 => ErrorCode::Hardware,
            0x06 => ErrorCode::Timeout,
            0x07 => ErrorCode::EstopDetected,
            0x08 => ErrorCode::CollisionDetected,
            0x09 => ErrorCode::LabwareDropped,
            0x0A => ErrorCode::EstopReleased,
            0x0B => ErrorCode::MotorBusy,
            0x0C => ErrorCode::StopRequested,
            0x0D => ErrorCode::OverPressure,
            0x0E => ErrorCode::DoorOpen,
            0x0F => ErrorCode::ReedOpen,
            0x10 => ErrorCode::MotorDriverErrorDetected,
            0x11 => ErrorCode::SafetyRelayInactive,
            other => ErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Unknown(v) => write!(f, "unknown({:#06x})", v),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Validity bits attached to a reported motor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorPositionFlags(pub u8);

impl MotorPositionFlags {
    pub const STEPPER_POSITION_OK: u8 = 0x1;
    pub const ENCODER_POSITION_OK: u8 = 0x2;

    pub fn all_ok() -> Self {
        Self(Self::STEPPER_POSITION_OK | Self::ENCODER_POSITION_OK)
    }

    pub fn stepper_ok(self) -> bool {
        self.0 & Self::STEPPER_POSITION_OK != 0
    }

    pub fn encoder_ok(self) -> bool {
        self.0 & Self::ENCODER_POSITION_OK != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TipActionType {
    Clamp = 0,
    Home = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_preserve_unknown_values() {
        assert_eq!(ErrorCode::from(0x0C), ErrorCode::StopRequested);
        assert_eq!(ErrorCode::from(0x7F), ErrorCode::Unknown(0x7F));
        assert_eq!(ErrorCode::Unknown(0x7F).value(), 0x7F);
    }

    #[test]
    fn position_flags_decode_each_bit() {
        assert!(MotorPositionFlags::all_ok().stepper_ok());
        assert!(MotorPositionFlags::all_ok().encoder_ok());
        let stepper_only = MotorPositionFlags(MotorPositionFlags::STEPPER_POSITION_OK);
        assert!(stepper_only.stepper_ok());
        assert!(!stepper_only.encoder_ok());
    }

    #[test]
    fn rates_lookup_by_motor_class() {
        let rates = InterruptRates::default();
        assert_eq!(rates.for_class(MotorClass::Stepper), 100_000);
        assert_eq!(rates.for_class(MotorClass::TipAction), 200_000);
        assert_eq!(rates.for_class(MotorClass::Brushed), 32_000);
    }
}
