// canmotion_shared::messages - typed firmware messages exchanged over the bus
//
// Framing and serialization belong to the transport; these are the decoded
// payloads the motion core builds and branches on.

use crate::constants::{ErrorCode, ErrorSeverity, MotorPositionFlags, MoveAckId, TipActionType};
use crate::node::GearMotorId;
use crate::stop_condition::StopConditionMask;

#[derive(Debug, Clone, PartialEq)]
pub struct AddLinearMovePayload {
    pub group_id: u8,
    pub seq_id: u8,
    pub duration: u32,
    pub acceleration_um: i32,
    pub velocity_mm: i32,
    pub request_stop_condition: StopConditionMask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomePayload {
    pub group_id: u8,
    pub seq_id: u8,
    pub duration: u32,
    pub velocity_mm: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GripperMovePayload {
    pub group_id: u8,
    pub seq_id: u8,
    pub duration: u32,
    pub duty_cycle: u32,
    pub encoder_position_um: i32,
    pub stay_engaged: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TipActionPayload {
    pub group_id: u8,
    pub seq_id: u8,
    pub duration: u32,
    pub velocity: i32,
    pub acceleration: i32,
    pub action: TipActionType,
    pub request_stop_condition: StopConditionMask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteMoveGroupPayload {
    pub group_id: u8,
    pub start_trigger: u8,
    pub cancel_trigger: u8,
}

/// Messages the host sends to nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    AddLinearMove(AddLinearMovePayload),
    Home(HomePayload),
    GripperGrip(GripperMovePayload),
    GripperHome(GripperMovePayload),
    AddBrushedLinearMove(GripperMovePayload),
    TipAction(TipActionPayload),
    ExecuteMoveGroup(ExecuteMoveGroupPayload),
    ClearAllMoveGroups,
    Stop,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::AddLinearMove(_) => "AddLinearMoveRequest",
            Request::Home(_) => "HomeRequest",
            Request::GripperGrip(_) => "GripperGripRequest",
            Request::GripperHome(_) => "GripperHomeRequest",
            Request::AddBrushedLinearMove(_) => "AddBrushedLinearMoveRequest",
            Request::TipAction(_) => "TipActionRequest",
            Request::ExecuteMoveGroup(_) => "ExecuteMoveGroupRequest",
            Request::ClearAllMoveGroups => "ClearAllMoveGroupsRequest",
            Request::Stop => "StopRequest",
        }
    }

    /// `(group_id, seq_id)` for requests that schedule a move.
    pub fn move_ids(&self) -> Option<(u8, u8)> {
        match self {
            Request::AddLinearMove(p) => Some((p.group_id, p.seq_id)),
            Request::Home(p) => Some((p.group_id, p.seq_id)),
            Request::GripperGrip(p) | Request::GripperHome(p) | Request::AddBrushedLinearMove(p) => {
                Some((p.group_id, p.seq_id))
            }
            Request::TipAction(p) => Some((p.group_id, p.seq_id)),
            Request::ExecuteMoveGroup(_) | Request::ClearAllMoveGroups | Request::Stop => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveCompletedPayload {
    pub group_id: u8,
    pub seq_id: u8,
    pub current_position_um: u32,
    pub encoder_position_um: i32,
    pub position_flags: MotorPositionFlags,
    pub ack_id: MoveAckId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TipActionResponsePayload {
    pub group_id: u8,
    pub seq_id: u8,
    pub current_position_um: u32,
    pub encoder_position_um: i32,
    pub position_flags: MotorPositionFlags,
    pub ack_id: MoveAckId,
    pub action: TipActionType,
    pub success: bool,
    pub gear_motor_id: GearMotorId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessagePayload {
    pub severity: ErrorSeverity,
    pub error_code: ErrorCode,
}

/// Messages nodes send to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    MoveCompleted(MoveCompletedPayload),
    TipActionResponse(TipActionResponsePayload),
    Error(ErrorMessagePayload),
    Acknowledgement,
}
