//! In-process bus that behaves like a set of motion nodes.

use crate::event_log::{SentRecord, SimClock};
use crate::fault::Fault;
use crate::node::{ReportedPosition, SimNode, step_duration};
use async_trait::async_trait;
use canmotion_shared::messages::{
    ErrorMessagePayload, MoveCompletedPayload, TipActionPayload, TipActionResponsePayload,
};
use canmotion_shared::{
    BusError, ErrorCode, ErrorSeverity, GearMotorId, IncomingMessage, InterruptRates, ListenerId,
    MessageListener, Messenger, MoveAckId, NodeId, Request,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

type SharedListener = Arc<dyn Fn(NodeId, &IncomingMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimOptions {
    /// Multiplier applied to every move duration.
    pub time_scale: f64,
    /// Shuffles the order nodes start (and so report) within a group.
    pub shuffle_seed: Option<u64>,
    pub rates: InterruptRates,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            shuffle_seed: None,
            rates: InterruptRates::default(),
        }
    }
}

struct Inner {
    options: SimOptions,
    clock: SimClock,
    nodes: Mutex<BTreeMap<NodeId, SimNode>>,
    listeners: Mutex<Vec<(ListenerId, SharedListener)>>,
    next_listener: AtomicU64,
    sent: Mutex<Vec<SentRecord>>,
    running: Mutex<Vec<JoinHandle<()>>>,
    rng: Mutex<Option<StdRng>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A simulated CAN bus with a fixed set of nodes.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct SimulatedBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimulatedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBus")
            .field("options", &self.inner.options)
            .field("nodes", &lock(&self.inner.nodes).keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SimulatedBus {
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self::with_options(nodes, SimOptions::default())
    }

    pub fn with_options(nodes: impl IntoIterator<Item = NodeId>, options: SimOptions) -> Self {
        let nodes = nodes.into_iter().map(|node| (node, SimNode::default())).collect();
        Self {
            inner: Arc::new(Inner {
                options,
                clock: SimClock::start(),
                nodes: Mutex::new(nodes),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                sent: Mutex::new(Vec::new()),
                running: Mutex::new(Vec::new()),
                rng: Mutex::new(options.shuffle_seed.map(StdRng::seed_from_u64)),
            }),
        }
    }

    pub fn inject_fault(&self, node: NodeId, fault: Fault) {
        if let Some(sim) = lock(&self.inner.nodes).get_mut(&node) {
            sim.faults.push(fault);
        }
    }

    pub fn set_position(&self, node: NodeId, position_mm: f64) {
        if let Some(sim) = lock(&self.inner.nodes).get_mut(&node) {
            sim.position_mm = position_mm;
        }
    }

    pub fn position(&self, node: NodeId) -> Option<f64> {
        lock(&self.inner.nodes).get(&node).map(SimNode::position_mm)
    }

    pub fn scheduled_count(&self, node: NodeId) -> usize {
        lock(&self.inner.nodes)
            .get(&node)
            .map_or(0, SimNode::scheduled_count)
    }

    /// Every request received so far, in arrival order.
    pub fn sent(&self) -> Vec<SentRecord> {
        lock(&self.inner.sent).clone()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Delivers `message` to every listener as if `node` had sent it.
    pub fn inject(&self, node: NodeId, message: IncomingMessage) {
        self.inner.deliver(node, &message);
    }

    fn record(&self, node: NodeId, message: &Request, acknowledged: bool) {
        let at = self.inner.clock.now();
        lock(&self.inner.sent).push(SentRecord {
            at,
            node,
            message: message.clone(),
            acknowledged,
        });
    }

    /// Stores a move request on the addressed node (or every node).
    fn schedule(&self, node: NodeId, message: &Request) {
        let mut nodes = lock(&self.inner.nodes);
        if node == NodeId::Broadcast {
            for sim in nodes.values_mut() {
                sim.schedule(message.clone());
            }
        } else if let Some(sim) = nodes.get_mut(&node) {
            sim.schedule(message.clone());
        } else {
            tracing::warn!("Simulated bus has no node {}; dropping {}", node, message.name());
        }
    }

    fn clear(&self, node: NodeId) {
        let mut nodes = lock(&self.inner.nodes);
        for (id, sim) in nodes.iter_mut() {
            if node == NodeId::Broadcast || node == *id {
                sim.clear();
            }
        }
    }

    fn stop(&self) {
        for handle in lock(&self.inner.running).drain(..) {
            handle.abort();
        }
        tracing::debug!("Simulated bus stopped all running moves");
    }

    fn execute_group(&self, group_id: u8) {
        let mut work: Vec<(NodeId, Vec<(u8, Request)>, Vec<Fault>)> = {
            let mut nodes = lock(&self.inner.nodes);
            nodes
                .iter_mut()
                .filter_map(|(id, sim)| {
                    let steps = sim.take_group(group_id);
                    (!steps.is_empty()).then(|| (*id, steps, sim.faults.clone()))
                })
                .collect()
        };
        if let Some(rng) = lock(&self.inner.rng).as_mut() {
            work.shuffle(rng);
        }
        tracing::debug!("Simulated bus executing group {} on {} nodes", group_id, work.len());

        let mut running = lock(&self.inner.running);
        running.retain(|handle| !handle.is_finished());
        for (node, steps, faults) in work {
            let inner = Arc::clone(&self.inner);
            running.push(tokio::spawn(async move {
                inner.run_node(node, steps, faults).await;
            }));
        }
    }
}

impl Inner {
    fn deliver(&self, node: NodeId, message: &IncomingMessage) {
        let listeners: Vec<SharedListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(node, message);
        }
    }

    async fn run_node(&self, node: NodeId, steps: Vec<(u8, Request)>, faults: Vec<Fault>) {
        if faults.contains(&Fault::Silent) {
            tracing::debug!("Simulated {} is silent", node);
            return;
        }
        for (seq_id, request) in steps {
            let seconds = step_duration(&request, &self.options.rates) * self.options.time_scale;
            tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;

            let (mut ack, position, gears) = {
                let mut nodes = lock(&self.nodes);
                let Some(sim) = nodes.get_mut(&node) else {
                    return;
                };
                let ack = sim.apply(&request, &self.options.rates);
                (ack, sim.reported(), [sim.reported_gear(0), sim.reported_gear(1)])
            };

            let mut halt = false;
            for fault in faults.iter().filter(|fault| fault.applies_to(seq_id)) {
                match *fault {
                    Fault::StallAt { .. } => {
                        ack = MoveAckId::StoppedByCondition;
                        halt = true;
                    }
                    Fault::AckWith { ack: forced, .. } => ack = forced,
                    Fault::FirmwareError { severity, code, .. } => {
                        self.deliver(
                            node,
                            &IncomingMessage::Error(ErrorMessagePayload {
                                severity,
                                error_code: code,
                            }),
                        );
                        if severity == ErrorSeverity::Unrecoverable {
                            return;
                        }
                    }
                    Fault::Silent | Fault::DropGearMotor { .. } => {}
                }
            }

            let (group_id, _) = request.move_ids().unwrap_or_default();
            if let Request::TipAction(payload) = &request {
                for motor in GearMotorId::ALL {
                    let dropped = faults.iter().any(|fault| {
                        *fault == Fault::DropGearMotor { seq: seq_id, motor }
                    });
                    if dropped {
                        continue;
                    }
                    let response = tip_response(payload, ack, motor, gears[motor as usize]);
                    self.deliver(node, &IncomingMessage::TipActionResponse(response));
                }
            } else {
                self.deliver(
                    node,
                    &IncomingMessage::MoveCompleted(MoveCompletedPayload {
                        group_id,
                        seq_id,
                        current_position_um: position.current_position_um,
                        encoder_position_um: position.encoder_position_um,
                        position_flags: position.position_flags,
                        ack_id: ack,
                    }),
                );
            }
            if halt {
                tracing::debug!("Simulated {} stalled at group {} seq {}", node, group_id, seq_id);
                return;
            }
        }
    }
}

fn tip_response(
    payload: &TipActionPayload,
    ack_id: MoveAckId,
    gear_motor_id: GearMotorId,
    position: ReportedPosition,
) -> TipActionResponsePayload {
    TipActionResponsePayload {
        group_id: payload.group_id,
        seq_id: payload.seq_id,
        current_position_um: position.current_position_um,
        encoder_position_um: position.encoder_position_um,
        position_flags: position.position_flags,
        ack_id,
        action: payload.action,
        success: ack_id != MoveAckId::PositionError,
        gear_motor_id,
    }
}

#[async_trait]
impl Messenger for SimulatedBus {
    async fn send(&self, node: NodeId, message: Request) -> Result<(), BusError> {
        self.record(node, &message, false);
        match message {
            Request::ClearAllMoveGroups => self.clear(node),
            Request::ExecuteMoveGroup(ref p) => self.execute_group(p.group_id),
            Request::Stop => self.stop(),
            ref request => self.schedule(node, request),
        }
        Ok(())
    }

    async fn ensure_send(
        &self,
        node: NodeId,
        message: Request,
        expected_nodes: &[NodeId],
    ) -> Result<ErrorCode, BusError> {
        self.record(node, &message, true);
        let all_known = {
            let nodes = lock(&self.inner.nodes);
            expected_nodes.iter().all(|expected| nodes.contains_key(expected))
        };
        let code = match message {
            Request::ClearAllMoveGroups => {
                self.clear(node);
                ErrorCode::Ok
            }
            Request::ExecuteMoveGroup(ref p) => {
                self.execute_group(p.group_id);
                ErrorCode::Ok
            }
            Request::Stop => {
                self.stop();
                ErrorCode::StopRequested
            }
            ref request => {
                self.schedule(node, request);
                ErrorCode::Ok
            }
        };
        if !all_known {
            tracing::warn!("Simulated bus: {} not acknowledged by every expected node", message.name());
            return Ok(ErrorCode::Timeout);
        }
        Ok(code)
    }

    fn add_listener(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::from(listener)));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        lock(&self.inner.listeners).retain(|(existing, _)| *existing != id);
    }
}
