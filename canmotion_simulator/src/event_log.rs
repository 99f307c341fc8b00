//! Record of every request the simulated bus received, stamped with the
//! simulation clock.

use canmotion_shared::{NodeId, Request};
use std::time::Duration;
use tokio::time::Instant;

/// Simulation clock. Reads tokio's clock, so paused-time tests see virtual time.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    origin: Instant,
}

impl SimClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    pub at: Duration,
    pub node: NodeId,
    pub message: Request,
    /// `true` for requests sent through `ensure_send`.
    pub acknowledged: bool,
}

impl SentRecord {
    pub fn executed_group(&self) -> Option<u8> {
        match &self.message {
            Request::ExecuteMoveGroup(p) => Some(p.group_id),
            _ => None,
        }
    }
}
