// src/move_execution/scheduler.rs - Sends every step to its node ahead of execution
//
// Scheduling turns the plan into one wire message per (sequence, node), sends
// each message to its node and records what has to be acknowledged later.

use crate::motion::{self, BrushedMoveType, MoveGroups, MoveStep};
use crate::move_execution::dispatcher::MoveDispatcher;
use crate::move_execution::error::MoveError;
use crate::move_execution::scheduled_move::{MoveGroupInfo, ScheduledMove};
use canmotion_shared::config::RunnerConfig;
use canmotion_shared::messages::{
    AddLinearMovePayload, GripperMovePayload, HomePayload, Request, TipActionPayload,
};
use canmotion_shared::{InterruptRates, Messenger, MotorClass, NodeId, StopConditionMask};
use std::collections::BTreeSet;

const FIXED_POINT_SCALE: f64 = 2_147_483_648.0; // 2^31

/// mm/s to the firmware's signed fixed-point mm per tick.
pub fn convert_velocity(velocity_mm_sec: f64, interrupts_per_sec: u32) -> i32 {
    ((velocity_mm_sec / interrupts_per_sec as f64) * FIXED_POINT_SCALE) as i32
}

/// mm/s² to the firmware's signed fixed-point µm per tick².
pub fn convert_acceleration(acceleration_mm_sec_sq: f64, interrupts_per_sec: u32) -> i32 {
    let rate = interrupts_per_sec as f64;
    ((acceleration_mm_sec_sq * 1000.0 / (rate * rate)) * FIXED_POINT_SCALE) as i32
}

pub fn convert_duration(duration_sec: f64, interrupts_per_sec: u32) -> u32 {
    (duration_sec * interrupts_per_sec as f64) as u32
}

/// Builds the wire message for one step.
pub fn build_message(
    step: &MoveStep,
    group_id: u8,
    seq_id: u8,
    ignore_stalls: bool,
    rates: &InterruptRates,
) -> Request {
    match step {
        MoveStep::Linear(axis) => {
            let rate = rates.for_class(MotorClass::Stepper);
            Request::AddLinearMove(AddLinearMovePayload {
                group_id,
                seq_id,
                duration: convert_duration(axis.duration_sec, rate),
                acceleration_um: convert_acceleration(axis.acceleration_mm_sec_sq, rate),
                velocity_mm: convert_velocity(axis.velocity_mm_sec, rate),
                request_stop_condition: StopConditionMask::new(axis.stop_condition, ignore_stalls),
            })
        }
        MoveStep::Home(axis) => {
            let rate = rates.for_class(MotorClass::Stepper);
            Request::Home(HomePayload {
                group_id,
                seq_id,
                duration: convert_duration(axis.duration_sec, rate),
                velocity_mm: convert_velocity(axis.velocity_mm_sec, rate),
            })
        }
        MoveStep::Gripper(gripper) => {
            let rate = rates.for_class(MotorClass::Brushed);
            let payload = GripperMovePayload {
                group_id,
                seq_id,
                duration: convert_duration(gripper.duration_sec, rate),
                duty_cycle: gripper.duty_cycle,
                encoder_position_um: gripper.encoder_position_um,
                stay_engaged: u8::from(gripper.stay_engaged),
            };
            match gripper.move_type {
                BrushedMoveType::Home => Request::GripperHome(payload),
                BrushedMoveType::Grip => Request::GripperGrip(payload),
                BrushedMoveType::Linear => Request::AddBrushedLinearMove(payload),
            }
        }
        MoveStep::TipAction(tip) => {
            let rate = rates.for_class(MotorClass::TipAction);
            Request::TipAction(TipActionPayload {
                group_id,
                seq_id,
                duration: convert_duration(tip.duration_sec, rate),
                velocity: convert_velocity(tip.velocity_mm_sec, rate),
                acceleration: convert_acceleration(tip.acceleration_mm_sec_sq, rate),
                action: tip.action,
                request_stop_condition: StopConditionMask::new(tip.stop_condition, ignore_stalls),
            })
        }
    }
}

/// Schedules a plan on the bus and hands the bookkeeping to a dispatcher.
/// Group ids run from `start_at_index` upward and must stay within `u8`.
pub fn check_group_ids(start_at_index: u8, group_count: usize) -> Result<(), MoveError> {
    if group_count == 0 {
        return Ok(());
    }
    let last = start_at_index as usize + group_count - 1;
    if last > u8::MAX as usize {
        return Err(MoveError::PlanTooLarge(format!(
            "{} groups starting at {} would need group id {}",
            group_count, start_at_index, last
        )));
    }
    Ok(())
}

fn check_sequence_ids(move_groups: &MoveGroups) -> Result<(), MoveError> {
    let limit = u8::MAX as usize + 1;
    match move_groups.iter().position(|group| group.len() > limit) {
        Some(index) => Err(MoveError::PlanTooLarge(format!(
            "group {} has {} sequences, at most {} fit",
            index,
            move_groups[index].len(),
            limit
        ))),
        None => Ok(()),
    }
}

#[derive(Debug)]
pub struct MoveScheduler {
    move_groups: MoveGroups,
    start_at_index: u8,
    ignore_stalls: bool,
    rates: InterruptRates,
    scheduled: Vec<MoveGroupInfo>,
    ready_for_dispatch: bool,
}

impl MoveScheduler {
    pub fn new(
        move_groups: MoveGroups,
        start_at_index: u8,
        ignore_stalls: bool,
        rates: InterruptRates,
    ) -> Self {
        let scheduled = vec![MoveGroupInfo::default(); move_groups.len()];
        Self {
            move_groups,
            start_at_index,
            ignore_stalls,
            rates,
            scheduled,
            ready_for_dispatch: false,
        }
    }

    pub fn ready_for_dispatch(&self) -> bool {
        self.ready_for_dispatch
    }

    pub fn scheduled(&self) -> &[MoveGroupInfo] {
        &self.scheduled
    }

    pub fn all_nodes(&self) -> BTreeSet<NodeId> {
        motion::all_nodes(&self.move_groups)
    }

    /// Sends every step to its node, in group then sequence order. Nothing is
    /// sent if a group or sequence id would not fit on the wire.
    pub async fn schedule_groups<M: Messenger + ?Sized>(&mut self, bus: &M) -> Result<(), MoveError> {
        check_group_ids(self.start_at_index, self.move_groups.len())?;
        check_sequence_ids(&self.move_groups)?;
        for (group_index, group) in self.move_groups.iter().enumerate() {
            let group_id = self.start_at_index + group_index as u8;
            let info = &mut self.scheduled[group_index];
            for (seq_index, sequence) in group.iter().enumerate() {
                let seq_id = seq_index as u8;
                for (node, step) in sequence {
                    let message = build_message(step, group_id, seq_id, self.ignore_stalls, &self.rates);
                    tracing::debug!(
                        "Scheduling {} for {} (group {}, seq {})",
                        message.name(),
                        node,
                        group_id,
                        seq_id
                    );
                    bus.send(*node, message).await?;
                    info.moves.push(ScheduledMove {
                        sequence_id: seq_id,
                        node_id: *node,
                        stop_condition: step.stop_condition(),
                        duration_sec: step.duration_sec(),
                        remaining_sub_actuators: step.sub_actuators(),
                    });
                }
                info.duration_sec += sequence_duration(sequence.values());
            }
        }
        self.ready_for_dispatch = true;
        tracing::debug!("Scheduled {} move groups", self.scheduled.len());
        Ok(())
    }

    /// Hands the bookkeeping over to a dispatcher. Fails if `schedule_groups`
    /// has not completed.
    pub fn into_dispatcher(self, config: &RunnerConfig) -> Result<MoveDispatcher, MoveError> {
        if !self.ready_for_dispatch {
            return Err(MoveError::NotScheduled);
        }
        Ok(MoveDispatcher::new(self.scheduled, self.start_at_index, config.timeouts))
    }
}

/// A sequence lasts as long as its longest step.
fn sequence_duration<'a>(steps: impl Iterator<Item = &'a MoveStep>) -> f64 {
    steps.map(MoveStep::duration_sec).fold(0.0, f64::max)
}
