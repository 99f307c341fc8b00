// src/motion/mod.rs - Move-group plan types handed over by the motion planner
//
// A plan is groups -> sequences -> per-node steps. Groups run strictly in
// order; the steps of one sequence are dispatched together.

use canmotion_shared::{GearMotorId, NodeId, StopCondition, TipActionType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// One wave of per-node steps.
pub type Sequence = BTreeMap<NodeId, MoveStep>;
/// Sequences that execute as one atomic unit of motion.
pub type MoveGroup = Vec<Sequence>;
pub type MoveGroups = Vec<MoveGroup>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Linear,
    Home,
    Grip,
}

/// A stepper axis move, used for both linear moves and homing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisStep {
    #[serde(default)]
    pub distance_mm: f64,
    pub velocity_mm_sec: f64,
    #[serde(default)]
    pub acceleration_mm_sec_sq: f64,
    pub duration_sec: f64,
    #[serde(default)]
    pub stop_condition: StopCondition,
}

/// How a brushed (gripper jaw) motor is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrushedMoveType {
    #[default]
    Linear,
    Home,
    Grip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperStep {
    pub duration_sec: f64,
    pub duty_cycle: u32,
    #[serde(default)]
    pub encoder_position_um: i32,
    #[serde(default)]
    pub stay_engaged: bool,
    #[serde(default)]
    pub move_type: BrushedMoveType,
    #[serde(default)]
    pub stop_condition: StopCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipActionStep {
    pub velocity_mm_sec: f64,
    #[serde(default)]
    pub acceleration_mm_sec_sq: f64,
    pub duration_sec: f64,
    pub action: TipActionType,
    #[serde(default)]
    pub stop_condition: StopCondition,
    /// Gear motors that each acknowledge this step independently.
    #[serde(default = "default_gear_motors")]
    pub gear_motors: BTreeSet<GearMotorId>,
}

fn default_gear_motors() -> BTreeSet<GearMotorId> {
    GearMotorId::ALL.into_iter().collect()
}

/// A single node's part of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MoveStep {
    Linear(AxisStep),
    Home(AxisStep),
    Gripper(GripperStep),
    TipAction(TipActionStep),
}

impl MoveStep {
    pub fn duration_sec(&self) -> f64 {
        match self {
            MoveStep::Linear(step) | MoveStep::Home(step) => step.duration_sec,
            MoveStep::Gripper(step) => step.duration_sec,
            MoveStep::TipAction(step) => step.duration_sec,
        }
    }

    pub fn move_type(&self) -> MoveType {
        match self {
            MoveStep::Linear(_) | MoveStep::TipAction(_) => MoveType::Linear,
            MoveStep::Home(_) => MoveType::Home,
            MoveStep::Gripper(step) => match step.move_type {
                BrushedMoveType::Linear => MoveType::Linear,
                BrushedMoveType::Home => MoveType::Home,
                BrushedMoveType::Grip => MoveType::Grip,
            },
        }
    }

    /// The condition the node must satisfy for this step. Homing always ends
    /// on the limit switch regardless of what was declared.
    pub fn stop_condition(&self) -> StopCondition {
        if self.move_type() == MoveType::Home {
            return StopCondition::LimitSwitch;
        }
        match self {
            MoveStep::Linear(step) | MoveStep::Home(step) => step.stop_condition,
            MoveStep::Gripper(step) => step.stop_condition,
            MoveStep::TipAction(step) => step.stop_condition,
        }
    }

    /// Sub-actuators expected to acknowledge this step individually.
    pub fn sub_actuators(&self) -> BTreeSet<GearMotorId> {
        match self {
            MoveStep::TipAction(step) => step.gear_motors.clone(),
            _ => BTreeSet::new(),
        }
    }

    pub fn linear(velocity_mm_sec: f64, duration_sec: f64) -> Self {
        MoveStep::Linear(AxisStep {
            distance_mm: velocity_mm_sec * duration_sec,
            velocity_mm_sec,
            acceleration_mm_sec_sq: 0.0,
            duration_sec,
            stop_condition: StopCondition::None,
        })
    }

    pub fn home(velocity_mm_sec: f64, duration_sec: f64) -> Self {
        MoveStep::Home(AxisStep {
            distance_mm: velocity_mm_sec * duration_sec,
            velocity_mm_sec,
            acceleration_mm_sec_sq: 0.0,
            duration_sec,
            stop_condition: StopCondition::LimitSwitch,
        })
    }
}

/// `true` if any sequence of any group holds at least one step.
pub fn has_moves(move_groups: &[MoveGroup]) -> bool {
    move_groups
        .iter()
        .flatten()
        .any(|sequence| !sequence.is_empty())
}

/// Every node that appears anywhere in the plan.
pub fn all_nodes(move_groups: &[MoveGroup]) -> BTreeSet<NodeId> {
    move_groups
        .iter()
        .flatten()
        .flat_map(|sequence| sequence.keys().copied())
        .collect()
}

/// On-disk form of a plan, as read by the simulator harness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovePlan {
    #[serde(default)]
    pub groups: MoveGroups,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MovePlan {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
