// src/move_execution/scheduled_move.rs - Bookkeeping for one (sequence, node) move

use canmotion_shared::{GearMotorId, MoveAckId, NodeId, StopCondition};
use std::collections::BTreeSet;

/// A move that was sent to a node and still has to be acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMove {
    pub sequence_id: u8,
    pub node_id: NodeId,
    pub stop_condition: StopCondition,
    pub duration_sec: f64,
    pub remaining_sub_actuators: BTreeSet<GearMotorId>,
}

impl ScheduledMove {
    /// Done once every sub-actuator has reported. Moves without
    /// sub-actuators are done as soon as their single completion arrives.
    pub fn is_done(&self) -> bool {
        self.remaining_sub_actuators.is_empty()
    }

    /// Marks one gear motor as reported. Returns `false` if the motor was not
    /// outstanding (a duplicate or unexpected ack).
    pub fn satisfy_sub_actuator(&mut self, motor: GearMotorId) -> bool {
        self.remaining_sub_actuators.remove(&motor)
    }

    pub fn rejects_ack(&self, ack: MoveAckId) -> bool {
        !self.stop_condition.accepts(ack)
    }

    pub fn matches(&self, sequence_id: u8, node_id: NodeId) -> bool {
        self.sequence_id == sequence_id && self.node_id == node_id
    }
}

/// Every move scheduled for one group plus its expected duration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveGroupInfo {
    pub moves: Vec<ScheduledMove>,
    /// Sum of the sequence durations in this group.
    pub duration_sec: f64,
}

impl MoveGroupInfo {
    pub fn expected_nodes(&self) -> BTreeSet<NodeId> {
        self.moves.iter().map(|m| m.node_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tip_move() -> ScheduledMove {
        ScheduledMove {
            sequence_id: 0,
            node_id: NodeId::PipetteLeft,
            stop_condition: StopCondition::None,
            duration_sec: 1.0,
            remaining_sub_actuators: GearMotorId::ALL.into_iter().collect(),
        }
    }

    #[test]
    fn done_only_after_every_sub_actuator_reports() {
        let mut scheduled = tip_move();
        assert!(!scheduled.is_done());
        assert!(scheduled.satisfy_sub_actuator(GearMotorId::Left));
        assert!(!scheduled.is_done());
        assert!(!scheduled.satisfy_sub_actuator(GearMotorId::Left));
        assert!(scheduled.satisfy_sub_actuator(GearMotorId::Right));
        assert!(scheduled.is_done());
    }

    #[test]
    fn limit_switch_moves_reject_plain_completion() {
        let mut scheduled = tip_move();
        scheduled.stop_condition = StopCondition::LimitSwitch;
        assert!(scheduled.rejects_ack(MoveAckId::CompleteWithoutCondition));
        assert!(!scheduled.rejects_ack(MoveAckId::StoppedByCondition));
    }

    #[test]
    fn expected_nodes_are_deduplicated() {
        let mut info = MoveGroupInfo::default();
        for seq in 0..3 {
            info.moves.push(ScheduledMove {
                sequence_id: seq,
                node_id: NodeId::GantryX,
                stop_condition: StopCondition::None,
                duration_sec: 1.0,
                remaining_sub_actuators: BTreeSet::new(),
            });
        }
        assert_eq!(info.expected_nodes().into_iter().collect::<Vec<_>>(), vec![NodeId::GantryX]);
    }
}
