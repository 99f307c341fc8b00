// src/move_execution/completions.rs - Completion records and final-position reduction

use canmotion_shared::messages::{MoveCompletedPayload, TipActionResponsePayload};
use canmotion_shared::{GearMotorId, MotorPositionFlags, MoveAckId, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub type NodeDict<T> = HashMap<NodeId, T>;

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionMessage {
    MoveCompleted(MoveCompletedPayload),
    TipActionResponse(TipActionResponsePayload),
}

impl CompletionMessage {
    /// `(group_id, seq_id)` the completion reports on.
    pub fn ids(&self) -> (u8, u8) {
        match self {
            CompletionMessage::MoveCompleted(p) => (p.group_id, p.seq_id),
            CompletionMessage::TipActionResponse(p) => (p.group_id, p.seq_id),
        }
    }

    pub fn ack_id(&self) -> MoveAckId {
        match self {
            CompletionMessage::MoveCompleted(p) => p.ack_id,
            CompletionMessage::TipActionResponse(p) => p.ack_id,
        }
    }

    /// The reporting gear motor, for tip-action responses.
    pub fn gear_motor(&self) -> Option<GearMotorId> {
        match self {
            CompletionMessage::MoveCompleted(_) => None,
            CompletionMessage::TipActionResponse(p) => Some(p.gear_motor_id),
        }
    }
}

/// A matched completion and the node that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub node: NodeId,
    pub message: CompletionMessage,
}

/// Final position of one motor, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotorPositionStatus {
    pub motor_position: f64,
    pub encoder_position: f64,
    pub motor_ok: bool,
    pub encoder_ok: bool,
}

impl MotorPositionStatus {
    fn from_wire(current_position_um: u32, encoder_position_um: i32, flags: MotorPositionFlags) -> Self {
        Self {
            motor_position: current_position_um as f64 / 1000.0,
            encoder_position: encoder_position_um as f64 / 1000.0,
            motor_ok: flags.stepper_ok(),
            encoder_ok: flags.encoder_ok(),
        }
    }
}

/// Reduces `MoveCompleted` messages to one position per node.
///
/// The completion with the highest `(group_id, seq_id)` wins regardless of
/// where it sits in the list; bus delivery order across nodes is not
/// execution order. Nodes without any move completion are absent.
pub fn accumulate_move_completions(completions: &[Completion]) -> NodeDict<MotorPositionStatus> {
    let mut latest: HashMap<NodeId, &MoveCompletedPayload> = HashMap::new();
    for completion in completions {
        let CompletionMessage::MoveCompleted(payload) = &completion.message else {
            continue;
        };
        latest
            .entry(completion.node)
            .and_modify(|current| {
                if (payload.group_id, payload.seq_id) > (current.group_id, current.seq_id) {
                    *current = payload;
                }
            })
            .or_insert(payload);
    }
    latest
        .into_iter()
        .map(|(node, p)| {
            (
                node,
                MotorPositionStatus::from_wire(p.current_position_um, p.encoder_position_um, p.position_flags),
            )
        })
        .collect()
}

/// Same reduction for tip-action responses, kept per gear motor so gear
/// positions never overwrite the pipette's own axis position.
pub fn accumulate_gear_motor_completions(
    completions: &[Completion],
) -> NodeDict<BTreeMap<GearMotorId, MotorPositionStatus>> {
    let mut latest: HashMap<(NodeId, GearMotorId), &TipActionResponsePayload> = HashMap::new();
    for completion in completions {
        let CompletionMessage::TipActionResponse(payload) = &completion.message else {
            continue;
        };
        latest
            .entry((completion.node, payload.gear_motor_id))
            .and_modify(|current| {
                if (payload.group_id, payload.seq_id) > (current.group_id, current.seq_id) {
                    *current = payload;
                }
            })
            .or_insert(payload);
    }
    let mut positions: NodeDict<BTreeMap<GearMotorId, MotorPositionStatus>> = HashMap::new();
    for ((node, motor), p) in latest {
        positions.entry(node).or_default().insert(
            motor,
            MotorPositionStatus::from_wire(p.current_position_um, p.encoder_position_um, p.position_flags),
        );
    }
    positions
}
