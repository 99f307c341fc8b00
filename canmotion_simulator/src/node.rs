//! Per-node state of the simulated bus: the scheduled move table and the
//! motor positions the node reports back.

use crate::fault::Fault;
use canmotion_shared::messages::Request;
use canmotion_shared::{InterruptRates, MotorPositionFlags, MoveAckId, StopCondition, StopConditionMask, TipActionType};
use std::collections::BTreeMap;

const FIXED_POINT_SCALE: f64 = 2_147_483_648.0;

pub fn decode_velocity(raw: i32, interrupts_per_sec: u32) -> f64 {
    raw as f64 / FIXED_POINT_SCALE * interrupts_per_sec as f64
}

pub fn decode_acceleration(raw: i32, interrupts_per_sec: u32) -> f64 {
    let rate = interrupts_per_sec as f64;
    raw as f64 / FIXED_POINT_SCALE * rate * rate / 1000.0
}

pub fn decode_duration(ticks: u32, interrupts_per_sec: u32) -> f64 {
    ticks as f64 / interrupts_per_sec as f64
}

fn travel(velocity: f64, acceleration: f64, t: f64) -> f64 {
    velocity * t + 0.5 * acceleration * t * t
}

fn natural_ack(mask: StopConditionMask) -> MoveAckId {
    if mask.contains(StopCondition::LimitSwitch) || mask.contains(StopCondition::LimitSwitchBackoff) {
        MoveAckId::StoppedByCondition
    } else {
        MoveAckId::CompleteWithoutCondition
    }
}

/// How long a scheduled request runs, in unscaled seconds.
pub fn step_duration(request: &Request, rates: &InterruptRates) -> f64 {
    match request {
        Request::AddLinearMove(p) => decode_duration(p.duration, rates.stepper),
        Request::Home(p) => decode_duration(p.duration, rates.stepper),
        Request::GripperGrip(p) | Request::GripperHome(p) | Request::AddBrushedLinearMove(p) => {
            decode_duration(p.duration, rates.brushed)
        }
        Request::TipAction(p) => decode_duration(p.duration, rates.tip_action),
        Request::ExecuteMoveGroup(_) | Request::ClearAllMoveGroups | Request::Stop => 0.0,
    }
}

/// A motor position as the firmware reports it, in whole micrometres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedPosition {
    pub current_position_um: u32,
    pub encoder_position_um: i32,
    pub position_flags: MotorPositionFlags,
}

fn report(position_mm: f64, position_flags: MotorPositionFlags) -> ReportedPosition {
    let um = (position_mm * 1000.0).round();
    ReportedPosition {
        current_position_um: um.max(0.0) as u32,
        encoder_position_um: um as i32,
        position_flags,
    }
}

#[derive(Debug, Clone)]
pub struct SimNode {
    pub(crate) scheduled: BTreeMap<(u8, u8), Request>,
    pub(crate) faults: Vec<Fault>,
    pub(crate) position_mm: f64,
    pub(crate) gear_positions_mm: [f64; 2],
    pub(crate) position_flags: MotorPositionFlags,
}

impl Default for SimNode {
    fn default() -> Self {
        Self {
            scheduled: BTreeMap::new(),
            faults: Vec::new(),
            position_mm: 0.0,
            gear_positions_mm: [0.0; 2],
            position_flags: MotorPositionFlags::all_ok(),
        }
    }
}

impl SimNode {
    pub fn position_mm(&self) -> f64 {
        self.position_mm
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Stores a move request under its `(group, seq)` slot. Returns `false`
    /// for requests that do not schedule a move.
    pub(crate) fn schedule(&mut self, request: Request) -> bool {
        match request.move_ids() {
            Some(ids) => {
                self.scheduled.insert(ids, request);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.scheduled.clear();
    }

    /// Removes and returns the group's requests in sequence order.
    pub(crate) fn take_group(&mut self, group_id: u8) -> Vec<(u8, Request)> {
        let keys: Vec<(u8, u8)> = self
            .scheduled
            .range((group_id, 0)..=(group_id, u8::MAX))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.scheduled.remove(&key).map(|request| (key.1, request)))
            .collect()
    }

    /// Moves the node's motors as the request describes and returns the ack
    /// the firmware would send.
    pub(crate) fn apply(&mut self, request: &Request, rates: &InterruptRates) -> MoveAckId {
        match request {
            Request::AddLinearMove(p) => {
                let t = decode_duration(p.duration, rates.stepper);
                self.position_mm += travel(
                    decode_velocity(p.velocity_mm, rates.stepper),
                    decode_acceleration(p.acceleration_um, rates.stepper),
                    t,
                );
                natural_ack(p.request_stop_condition)
            }
            Request::Home(_) | Request::GripperHome(_) => {
                self.position_mm = 0.0;
                MoveAckId::StoppedByCondition
            }
            Request::GripperGrip(p) => {
                self.position_mm = p.encoder_position_um as f64 / 1000.0;
                MoveAckId::StoppedByCondition
            }
            Request::AddBrushedLinearMove(p) => {
                self.position_mm = p.encoder_position_um as f64 / 1000.0;
                MoveAckId::CompleteWithoutCondition
            }
            Request::TipAction(p) => {
                if p.action == TipActionType::Home {
                    self.gear_positions_mm = [0.0; 2];
                    return MoveAckId::StoppedByCondition;
                }
                let t = decode_duration(p.duration, rates.tip_action);
                let distance = travel(
                    decode_velocity(p.velocity, rates.tip_action),
                    decode_acceleration(p.acceleration, rates.tip_action),
                    t,
                );
                for gear in &mut self.gear_positions_mm {
                    *gear += distance;
                }
                natural_ack(p.request_stop_condition)
            }
            Request::ExecuteMoveGroup(_) | Request::ClearAllMoveGroups | Request::Stop => {
                MoveAckId::CompleteWithoutCondition
            }
        }
    }

    pub(crate) fn reported(&self) -> ReportedPosition {
        report(self.position_mm, self.position_flags)
    }

    pub(crate) fn reported_gear(&self, index: usize) -> ReportedPosition {
        report(self.gear_positions_mm[index], self.position_flags)
    }
}
