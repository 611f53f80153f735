//! In-Process Mock Core
//!
//! A scriptable [`CoreClient`] used by tests and embedded setups: the
//! caller plans subscribe responses per node, then drives the stream by
//! pushing batches, releasing the bootstrap gate, or killing the agent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::replication::Event;
use crate::store::{ApplyMode, Store};
use crate::types::{
    AgentId, Checkpoint, NodeId, SeqNo, ShardName, TableOp, TableSpec, TlogEntry, TxKind,
};

use super::{AgentHandle, AgentMonitor, CoreClient, Subscription};

/// Planned response to one subscribe call
#[derive(Debug, Clone)]
pub struct SubscribePlan {
    /// Whether the replica must run a full bulk copy
    pub bootstrap_needed: bool,
    /// Seqno of the first streamed batch
    pub starting_seqno: SeqNo,
    /// Shard tables reported to the replica
    pub tables: Vec<TableSpec>,
}

struct Session {
    agent: AgentId,
    events: mpsc::Sender<Event>,
    monitor: Option<AgentMonitor>,
}

#[derive(Default)]
struct Inner {
    plans: HashMap<NodeId, VecDeque<SubscribePlan>>,
    calls: Vec<(NodeId, Option<Checkpoint>)>,
    sessions: Vec<Session>,
    bootstrap_gate: Option<oneshot::Receiver<Checkpoint>>,
    bootstrap_records: Vec<TableOp>,
}

/// Scriptable in-process core
#[derive(Clone)]
pub struct MockCore {
    inner: Arc<Mutex<Inner>>,
}

impl MockCore {
    /// Create a core with no planned responses (every subscribe fails)
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Plan the next subscribe response for `node`
    pub fn accept(&self, node: &str, plan: SubscribePlan) {
        self.inner
            .lock()
            .unwrap()
            .plans
            .entry(node.to_string())
            .or_default()
            .push_back(plan);
    }

    /// Subscribe calls observed so far, with the checkpoint each carried
    pub fn subscribe_calls(&self) -> Vec<(NodeId, Option<Checkpoint>)> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of successful subscriptions so far
    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    /// Agent id of the latest subscription
    pub fn current_agent(&self) -> AgentId {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .last()
            .expect("no active session")
            .agent
    }

    /// Stream a batch from the latest agent
    pub async fn push_entry(&self, seqno: SeqNo, tx_kind: TxKind, ops: Vec<TableOp>) {
        let agent = self.current_agent();
        self.push_entry_as(agent, seqno, tx_kind, ops).await;
    }

    /// Stream a batch carrying an explicit agent id (stale-agent scenarios)
    pub async fn push_entry_as(
        &self,
        agent: AgentId,
        seqno: SeqNo,
        tx_kind: TxKind,
        ops: Vec<TableOp>,
    ) {
        let events = {
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .last()
                .expect("no active session")
                .events
                .clone()
        };

        let _ = events
            .send(Event::TlogEntry(TlogEntry {
                agent,
                seqno,
                tx_kind,
                ops,
            }))
            .await;
    }

    /// Inject a raw event into the latest subscriber's inbox
    pub async fn push_event(&self, event: Event) {
        let events = {
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .last()
                .expect("no active session")
                .events
                .clone()
        };
        let _ = events.send(event).await;
    }

    /// Terminate the latest agent with the given reason
    pub fn kill_agent(&self, reason: &str) {
        let monitor = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .sessions
                .last_mut()
                .expect("no active session")
                .monitor
                .take()
        };
        monitor.expect("agent already killed").terminate(reason);
    }

    /// Hold the next bootstrap until the returned sender fires with a
    /// checkpoint; dropping the sender fails the bootstrap
    pub fn hold_bootstrap(&self) -> oneshot::Sender<Checkpoint> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().bootstrap_gate = Some(rx);
        tx
    }

    /// Records the next bootstrap writes into the store before completing
    pub fn seed_bootstrap(&self, ops: Vec<TableOp>) {
        self.inner.lock().unwrap().bootstrap_records = ops;
    }
}

impl Default for MockCore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoreClient for MockCore {
    async fn subscribe(
        &self,
        node: &NodeId,
        _shard: &ShardName,
        events: mpsc::Sender<Event>,
        checkpoint: Option<Checkpoint>,
    ) -> Result<Subscription> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push((node.clone(), checkpoint));

        let plan = inner
            .plans
            .get_mut(node)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| Error::ConnectionFailed {
                address: node.clone(),
                reason: "connection refused".into(),
            })?;

        let agent = AgentId::new();
        let (handle, monitor) = AgentHandle::new(agent);
        inner.sessions.push(Session {
            agent,
            events,
            monitor: Some(monitor),
        });

        Ok(Subscription {
            bootstrap_needed: plan.bootstrap_needed,
            agent: handle,
            tables: plan.tables,
            starting_seqno: plan.starting_seqno,
        })
    }

    async fn bootstrap(
        &self,
        _node: &NodeId,
        _shard: &ShardName,
        store: Arc<dyn Store>,
    ) -> Result<Checkpoint> {
        let (gate, records) = {
            let mut inner = self.inner.lock().unwrap();
            (
                inner.bootstrap_gate.take(),
                std::mem::take(&mut inner.bootstrap_records),
            )
        };

        if !records.is_empty() {
            store.apply_batch(ApplyMode::Dirty, &records).await?;
        }

        match gate {
            Some(rx) => rx
                .await
                .map_err(|_| Error::BootstrapFailed("bootstrap gate dropped".into())),
            None => Ok(Checkpoint::from("cp-auto")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unplanned_subscribe_fails() {
        let core = MockCore::new();
        let (tx, _rx) = mpsc::channel(8);

        let result = core
            .subscribe(&"A".to_string(), &"shard-a".to_string(), tx, None)
            .await;
        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
        assert_eq!(core.subscribe_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_planned_subscribe_and_stream() {
        let core = MockCore::new();
        core.accept(
            "A",
            SubscribePlan {
                bootstrap_needed: false,
                starting_seqno: 0,
                tables: vec![TableSpec::new("t1")],
            },
        );

        let (tx, mut rx) = mpsc::channel(8);
        let subscription = core
            .subscribe(&"A".to_string(), &"shard-a".to_string(), tx, None)
            .await
            .unwrap();
        assert!(!subscription.bootstrap_needed);

        core.push_entry(0, TxKind::Dirty, vec![]).await;
        match rx.recv().await.unwrap() {
            Event::TlogEntry(entry) => {
                assert_eq!(entry.seqno, 0);
                assert_eq!(entry.agent, subscription.agent.id());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        core.kill_agent("test kill");
        assert_eq!(subscription.agent.terminated().await, "test kill");
    }
}
