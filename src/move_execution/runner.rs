// src/move_execution/runner.rs - Two-phase entry point for running a move plan

use crate::motion::{self, MoveGroups, has_moves};
use crate::move_execution::completions::{
    Completion, MotorPositionStatus, NodeDict, accumulate_gear_motor_completions,
    accumulate_move_completions,
};
use crate::move_execution::error::MoveError;
use crate::move_execution::scheduler::MoveScheduler;
use canmotion_shared::config::RunnerConfig;
use canmotion_shared::{ErrorCode, GearMotorId, Messenger, NodeId, Request};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Everything a finished run reports back to the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveOutcome {
    #[serde(skip)]
    pub completions: Vec<Completion>,
    pub positions: NodeDict<MotorPositionStatus>,
    pub gear_motor_positions: NodeDict<BTreeMap<GearMotorId, MotorPositionStatus>>,
}

impl MoveOutcome {
    pub fn from_completions(completions: Vec<Completion>) -> Self {
        let positions = accumulate_move_completions(&completions);
        let gear_motor_positions = accumulate_gear_motor_completions(&completions);
        Self {
            completions,
            positions,
            gear_motor_positions,
        }
    }
}

/// Runs a move plan on the bus.
///
/// `prep` clears the nodes and schedules every step, `execute` runs the
/// groups and reduces the completions. A runner is single-use: once a plan
/// with moves has been executed it has to be prepped again.
#[derive(Debug)]
pub struct MoveGroupRunner {
    move_groups: MoveGroups,
    config: RunnerConfig,
    // Only set once scheduling has fully succeeded.
    scheduler: Option<MoveScheduler>,
}

impl MoveGroupRunner {
    pub fn new(move_groups: MoveGroups) -> Self {
        Self {
            move_groups,
            config: RunnerConfig::default(),
            scheduler: None,
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn start_at_index(mut self, index: u8) -> Self {
        self.config.start_at_index = index;
        self
    }

    pub fn ignore_stalls(mut self, ignore_stalls: bool) -> Self {
        self.config.ignore_stalls = ignore_stalls;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Every node that appears anywhere in the plan.
    pub fn all_nodes(&self) -> BTreeSet<NodeId> {
        motion::all_nodes(&self.move_groups)
    }

    /// Clears stale groups on every node of the plan, then schedules the plan.
    pub async fn prep<M: Messenger + ?Sized>(&mut self, bus: &M) -> Result<(), MoveError> {
        self.scheduler = None;
        if !has_moves(&self.move_groups) {
            tracing::debug!("No moves in plan, nothing to prep");
            return Ok(());
        }

        let nodes: Vec<NodeId> = self.all_nodes().into_iter().collect();
        let code = bus
            .ensure_send(NodeId::Broadcast, Request::ClearAllMoveGroups, &nodes)
            .await?;
        if code != ErrorCode::Ok {
            tracing::warn!("Clearing move groups returned {}", code);
        }

        let mut scheduler = MoveScheduler::new(
            self.move_groups.clone(),
            self.config.start_at_index,
            self.config.ignore_stalls,
            self.config.rates,
        );
        scheduler.schedule_groups(bus).await?;
        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Runs the prepped plan. A plan without moves returns an empty outcome
    /// right away; otherwise fails with `NotPrepped` unless the last `prep`
    /// succeeded and has not been executed yet.
    pub async fn execute<M: Messenger + ?Sized>(&mut self, bus: &M) -> Result<MoveOutcome, MoveError> {
        if !has_moves(&self.move_groups) {
            tracing::debug!("No moves in plan, nothing to execute");
            return Ok(MoveOutcome::default());
        }
        let Some(scheduler) = self.scheduler.take() else {
            return Err(MoveError::NotPrepped);
        };

        let mut dispatcher = scheduler.into_dispatcher(&self.config)?;
        let completions = dispatcher.run(bus).await?;
        tracing::debug!("Move plan finished with {} completions", completions.len());
        Ok(MoveOutcome::from_completions(completions))
    }

    pub async fn run<M: Messenger + ?Sized>(&mut self, bus: &M) -> Result<MoveOutcome, MoveError> {
        self.prep(bus).await?;
        self.execute(bus).await
    }
}
