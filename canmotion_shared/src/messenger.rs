// canmotion_shared::messenger - the bus contract consumed by the motion core

use crate::constants::ErrorCode;
use crate::messages::{IncomingMessage, Request};
use crate::node::NodeId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,
    #[error("Failed to send {message} to {node}: {reason}")]
    Send {
        node: NodeId,
        message: &'static str,
        reason: String,
    },
}

/// Callback invoked for every message received on the bus, tagged with the
/// originating node. Runs inside the bus receive path and must not block.
pub type MessageListener = Box<dyn Fn(NodeId, &IncomingMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Abstract CAN messenger (host transport or simulator must implement)
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Fire-and-forget send to one addressed node (or broadcast).
    async fn send(&self, node: NodeId, message: Request) -> Result<(), BusError>;

    /// Send and wait until every expected node acknowledged. The returned code
    /// is `ErrorCode::Ok` unless a node answered with an error or the ack timed out.
    async fn ensure_send(
        &self,
        node: NodeId,
        message: Request,
        expected_nodes: &[NodeId],
    ) -> Result<ErrorCode, BusError>;

    fn add_listener(&self, listener: MessageListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// Keeps a listener registered for as long as the guard lives.
///
/// Dropping the guard (normal return, `?` propagation, or cancellation of the
/// owning future) deregisters the listener.
pub struct ListenerGuard<'a, M: Messenger + ?Sized> {
    bus: &'a M,
    id: ListenerId,
}

impl<'a, M: Messenger + ?Sized> ListenerGuard<'a, M> {
    pub fn register(bus: &'a M, listener: MessageListener) -> Self {
        let id = bus.add_listener(listener);
        tracing::trace!("Registered bus listener {:?}", id);
        Self { bus, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl<M: Messenger + ?Sized> Drop for ListenerGuard<'_, M> {
    fn drop(&mut self) {
        self.bus.remove_listener(self.id);
        tracing::trace!("Removed bus listener {:?}", self.id);
    }
}
