//! Upstream Core Access
//!
//! The transport seam between a replica and its upstream core nodes:
//! a `CoreClient` trait for subscribe + bootstrap, with a framed-TCP
//! implementation and an in-process mock.

mod mock;
mod tcp;

pub use mock::{MockCore, SubscribePlan};
pub use tcp::TcpCoreClient;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::replication::Event;
use crate::store::Store;
use crate::types::{AgentId, Checkpoint, NodeId, SeqNo, ShardName, TableSpec};

/// A successful subscription to a shard's transaction log
pub struct Subscription {
    /// Whether a full bulk copy is required before the stream is usable
    pub bootstrap_needed: bool,
    /// Handle to the upstream streaming agent
    pub agent: AgentHandle,
    /// Tables making up the shard
    pub tables: Vec<TableSpec>,
    /// Seqno the first streamed batch will carry
    pub starting_seqno: SeqNo,
}

/// Handle to an upstream streaming agent whose death is observable
pub struct AgentHandle {
    id: AgentId,
    terminated: oneshot::Receiver<String>,
}

impl AgentHandle {
    /// Create a handle and the monitor that reports its termination
    pub fn new(id: AgentId) -> (Self, AgentMonitor) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id,
                terminated: rx,
            },
            AgentMonitor { tx },
        )
    }

    /// The agent's identifier
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Resolve once the agent is gone, with the termination reason
    pub async fn terminated(self) -> String {
        match self.terminated.await {
            Ok(reason) => reason,
            Err(_) => "agent monitor dropped".to_string(),
        }
    }
}

/// Reporting side of an [`AgentHandle`]
pub struct AgentMonitor {
    tx: oneshot::Sender<String>,
}

impl AgentMonitor {
    /// Report the agent as terminated
    pub fn terminate(self, reason: impl Into<String>) {
        let _ = self.tx.send(reason.into());
    }
}

/// Client-side access to an upstream core node
#[async_trait]
pub trait CoreClient: Send + Sync + 'static {
    /// Subscribe to a shard's transaction log on `node`.
    ///
    /// On success the core streams [`Event::TlogEntry`] messages into
    /// `events` until the subscription ends.
    async fn subscribe(
        &self,
        node: &NodeId,
        shard: &ShardName,
        events: mpsc::Sender<Event>,
        checkpoint: Option<Checkpoint>,
    ) -> Result<Subscription>;

    /// Copy the shard's current table contents from `node` into `store`.
    ///
    /// Returns the checkpoint marking the copied position; transactions from
    /// that point on must be obtained from the live stream.
    async fn bootstrap(
        &self,
        node: &NodeId,
        shard: &ShardName,
        store: Arc<dyn Store>,
    ) -> Result<Checkpoint>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_agent_handle_termination() {
        let (handle, monitor) = AgentHandle::new(AgentId::new());
        monitor.terminate("connection reset");
        assert_eq!(handle.terminated().await, "connection reset");
    }

    #[tokio::test]
    async fn test_agent_handle_monitor_dropped() {
        let (handle, monitor) = AgentHandle::new(AgentId::new());
        drop(monitor);
        assert_eq!(handle.terminated().await, "agent monitor dropped");
    }
}
