// src/move_execution/dispatcher.rs - Executes scheduled move groups one at a time
//
// The bus listener only forwards messages into a channel. The per-group wait
// loop owns the pending moves and is the only place they are mutated.

use crate::move_execution::completions::{Completion, CompletionMessage};
use crate::move_execution::error::MoveError;
use crate::move_execution::scheduled_move::MoveGroupInfo;
use crate::move_execution::scheduler::check_group_ids;
use canmotion_shared::config::TimeoutPolicy;
use canmotion_shared::messages::{ErrorMessagePayload, ExecuteMoveGroupPayload};
use canmotion_shared::{
    BusError, ErrorCode, ErrorSeverity, IncomingMessage, ListenerGuard, MoveAckId, Messenger,
    NodeId, Request, StopCondition,
};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::Instant;

type BusEvent = (NodeId, IncomingMessage);

/// Lifecycle of a single move group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    NotStarted,
    BroadcastSent,
    WaitingForCompletions,
    Complete,
    StoppedByCondition,
    TimedOut,
    FatalError,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupState::NotStarted => "not_started",
            GroupState::BroadcastSent => "broadcast_sent",
            GroupState::WaitingForCompletions => "waiting_for_completions",
            GroupState::Complete => "complete",
            GroupState::StoppedByCondition => "stopped_by_condition",
            GroupState::TimedOut => "timed_out",
            GroupState::FatalError => "fatal_error",
        };
        f.write_str(name)
    }
}

/// Runs scheduled groups strictly in order and matches node acks back to them.
#[derive(Debug)]
pub struct MoveDispatcher {
    groups: Vec<MoveGroupInfo>,
    start_at_index: u8,
    timeouts: TimeoutPolicy,
    errors: Vec<MoveError>,
    should_stop: bool,
    states: Vec<GroupState>,
}

impl MoveDispatcher {
    pub fn new(groups: Vec<MoveGroupInfo>, start_at_index: u8, timeouts: TimeoutPolicy) -> Self {
        let states = vec![GroupState::NotStarted; groups.len()];
        Self {
            groups,
            start_at_index,
            timeouts,
            errors: Vec::new(),
            should_stop: false,
            states,
        }
    }

    /// State of every group, in plan order.
    pub fn group_states(&self) -> &[GroupState] {
        &self.states
    }

    /// Executes every group in order. The first group that fails aborts the
    /// run; later groups are never broadcast.
    pub async fn run<M: Messenger + ?Sized>(&mut self, bus: &M) -> Result<Vec<Completion>, MoveError> {
        check_group_ids(self.start_at_index, self.groups.len())?;
        let (tx, mut rx) = mpsc::unbounded_channel::<BusEvent>();
        let _listener = ListenerGuard::register(
            bus,
            Box::new(move |node: NodeId, message: &IncomingMessage| {
                if matches!(message, IncomingMessage::Acknowledgement) {
                    return;
                }
                // The receiver only goes away once the run is over.
                let _ = tx.send((node, message.clone()));
            }),
        );

        let mut completions = Vec::new();
        for index in 0..self.groups.len() {
            self.run_one_group(bus, index, &mut rx, &mut completions).await?;
        }
        Ok(completions)
    }

    // Ids are checked against the group count before the run starts.
    fn group_id(&self, index: usize) -> u8 {
        self.start_at_index.wrapping_add(index as u8)
    }

    fn transition(&mut self, index: usize, state: GroupState) {
        tracing::debug!(
            "Move group {}: {} -> {}",
            self.group_id(index),
            self.states[index],
            state
        );
        self.states[index] = state;
    }

    async fn run_one_group<M: Messenger + ?Sized>(
        &mut self,
        bus: &M,
        index: usize,
        rx: &mut mpsc::UnboundedReceiver<BusEvent>,
        completions: &mut Vec<Completion>,
    ) -> Result<(), MoveError> {
        let group_id = self.group_id(index);
        let mut group = std::mem::take(&mut self.groups[index]);
        self.errors.clear();
        self.should_stop = false;

        if group.is_empty() {
            tracing::debug!("Move group {} has no moves, skipping", group_id);
            self.transition(index, GroupState::Complete);
            return Ok(());
        }

        let all_nodes = group.expected_nodes();
        let expected_nodes: Vec<NodeId> = all_nodes.iter().copied().collect();
        let expected_time = self.timeouts.expected_time(group.duration_sec);
        let full_timeout = self.timeouts.full_timeout(group.duration_sec);

        tracing::info!(
            "Executing move group {} ({} moves on {} nodes, expected {:?})",
            group_id,
            group.moves.len(),
            expected_nodes.len(),
            expected_time
        );
        let code = bus
            .ensure_send(
                NodeId::Broadcast,
                Request::ExecuteMoveGroup(ExecuteMoveGroupPayload {
                    group_id,
                    start_trigger: 0,
                    cancel_trigger: 0,
                }),
                &expected_nodes,
            )
            .await?;
        if code != ErrorCode::Ok {
            tracing::warn!("Received {} trying to execute move group {}", code, group_id);
        }
        self.transition(index, GroupState::BroadcastSent);

        let start = Instant::now();
        let deadline = start + full_timeout;
        self.transition(index, GroupState::WaitingForCompletions);

        while !group.is_empty() && !self.should_stop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((node, message))) => {
                    self.handle_message(group_id, &mut group, node, message, completions)
                }
                Ok(None) => {
                    self.transition(index, GroupState::FatalError);
                    return Err(MoveError::Bus(BusError::Closed));
                }
                Err(_) => {
                    let missing_nodes: Vec<NodeId> = group.expected_nodes().into_iter().collect();
                    let error = MoveError::TimedOut {
                        group_id,
                        missing_nodes,
                        full_timeout,
                        expected_time,
                        elapsed: start.elapsed(),
                    };
                    tracing::error!("{}", error);
                    self.transition(index, GroupState::TimedOut);
                    return Err(error);
                }
            }
        }

        let elapsed = start.elapsed();
        if self.should_stop {
            return Err(self.stop_group(bus, index, &group, &all_nodes).await);
        }
        if !self.errors.is_empty() {
            tracing::warn!(
                "Recoverable firmware errors during move group {}: {:?}",
                group_id,
                self.errors
            );
        }
        if elapsed >= expected_time {
            tracing::warn!(
                "Move group {} took longer ({:?}) than expected ({:?})",
                group_id,
                elapsed,
                expected_time
            );
        }
        tracing::info!("Move group {} completed in {:?}", group_id, elapsed);
        self.transition(index, GroupState::Complete);
        Ok(())
    }

    fn handle_message(
        &mut self,
        group_id: u8,
        group: &mut MoveGroupInfo,
        node: NodeId,
        message: IncomingMessage,
        completions: &mut Vec<Completion>,
    ) {
        let message = match message {
            IncomingMessage::MoveCompleted(payload) => CompletionMessage::MoveCompleted(payload),
            IncomingMessage::TipActionResponse(payload) => CompletionMessage::TipActionResponse(payload),
            IncomingMessage::Error(payload) => return self.handle_error(node, payload),
            IncomingMessage::Acknowledgement => return,
        };
        self.handle_completion(group_id, group, Completion { node, message }, completions);
    }

    fn handle_completion(
        &mut self,
        group_id: u8,
        group: &mut MoveGroupInfo,
        completion: Completion,
        completions: &mut Vec<Completion>,
    ) {
        let (msg_group, seq_id) = completion.message.ids();
        let ack = completion.message.ack_id();
        let node = completion.node;
        if msg_group != group_id {
            tracing::warn!(
                "Got a move ack from {} for group {} seq {} while running group {}; may have leaked from an earlier group",
                node,
                msg_group,
                seq_id,
                group_id
            );
            return;
        }
        let Some(position) = group.moves.iter().position(|m| m.matches(seq_id, node)) else {
            tracing::warn!(
                "Got a move ack for ({}, {}) which is not pending in group {}",
                node,
                seq_id,
                group_id
            );
            return;
        };

        if let Some(motor) = completion.message.gear_motor() {
            if !group.moves[position].satisfy_sub_actuator(motor) {
                tracing::warn!(
                    "Duplicate tip action ack from {} gear motor {:?} (group {}, seq {})",
                    node,
                    motor,
                    group_id,
                    seq_id
                );
                return;
            }
        }

        tracing::debug!(
            "Received completion for {} group {} seq {} ({})",
            node,
            group_id,
            seq_id,
            ack
        );
        completions.push(completion);

        let scheduled = &group.moves[position];
        if scheduled.rejects_ack(ack) {
            let error = MoveError::ConditionNotMet {
                group_id,
                node,
                stop_condition: scheduled.stop_condition,
                ack,
            };
            tracing::error!("{}", error);
            self.errors.push(error);
            self.should_stop = true;
        }

        // A stalled axis will not report the rest of its sequences. Other
        // conditions, such as a home hitting its switch, leave them pending.
        if ack == MoveAckId::StoppedByCondition && scheduled.stop_condition == StopCondition::Stall {
            let before = group.moves.len();
            group.moves.retain(|m| m.node_id != node || m.sequence_id == seq_id);
            let dropped = before - group.moves.len();
            if dropped > 0 {
                tracing::debug!(
                    "{} stopped by condition at seq {}; dropped {} remaining moves in group {}",
                    node,
                    seq_id,
                    dropped,
                    group_id
                );
            }
        }

        if let Some(position) = group.moves.iter().position(|m| m.matches(seq_id, node)) {
            if group.moves[position].is_done() {
                group.moves.remove(position);
            }
        }
        if group.is_empty() {
            tracing::debug!("Move group {} has completed", group_id);
        }
    }

    fn handle_error(&mut self, node: NodeId, payload: ErrorMessagePayload) {
        let error = MoveError::Firmware {
            node,
            error_code: payload.error_code,
            severity: payload.severity,
        };
        if payload.severity == ErrorSeverity::Unrecoverable {
            tracing::error!("Error during move group from {}: {}", node, error);
            self.should_stop = true;
        } else {
            tracing::warn!("Error during move group from {}: {}", node, error);
        }
        self.errors.push(error);
    }

    /// Broadcasts a stop and turns the accumulated errors into the one raised
    /// for the group.
    async fn stop_group<M: Messenger + ?Sized>(
        &mut self,
        bus: &M,
        index: usize,
        group: &MoveGroupInfo,
        all_nodes: &BTreeSet<NodeId>,
    ) -> MoveError {
        let group_id = self.group_id(index);
        let mut stop_nodes: Vec<NodeId> = group.expected_nodes().into_iter().collect();
        if stop_nodes.is_empty() {
            stop_nodes = all_nodes.iter().copied().collect();
        }
        tracing::warn!("Stopping move group {} on {} nodes", group_id, stop_nodes.len());
        match bus.ensure_send(NodeId::Broadcast, Request::Stop, &stop_nodes).await {
            Ok(ErrorCode::StopRequested) => {}
            Ok(code) => tracing::warn!("Stop request for group {} returned {}", group_id, code),
            Err(e) => tracing::warn!("Stop request for group {} failed: {}", group_id, e),
        }

        let state = if self.errors.iter().any(|e| matches!(e, MoveError::ConditionNotMet { .. })) {
            GroupState::StoppedByCondition
        } else {
            GroupState::FatalError
        };
        self.transition(index, state);

        let mut errors = std::mem::take(&mut self.errors);
        if let Some(estop) = errors.iter().position(MoveError::is_estop) {
            return errors.swap_remove(estop);
        }
        match errors.len() {
            0 => MoveError::GroupConditionNotMet { group_id },
            1 => errors.remove(0),
            _ => MoveError::MotionFailed { group_id, errors },
        }
    }
}
