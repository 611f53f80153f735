//! Shard Replica State Machine
//!
//! A per-shard actor that attaches to an upstream core, bulk-copies the
//! shard's tables when needed, then follows the live transaction log in
//! strict seqno order. Real-time batches arriving during the copy are
//! spilled and drained before local reads are admitted.
//!
//! The actor runs a four-state lifecycle:
//!
//! ```text
//! disconnected -> bootstrap -> local_replay -> normal
//!      ^              |             |            |
//!      |            fatal         fatal          |
//!      +--------------------(agent died)---------+
//! ```
//!
//! Structural inconsistencies (a gap in the log, a failed apply, upstream
//! loss before a checkpoint exists) crash the actor; the supervisor
//! restarts it from scratch. Transactions are never silently skipped.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::routing::ReadRouter;
use crate::spill::{SpillQueue, SpillRecord};
use crate::status::StatusRegistry;
use crate::store::{ApplyMode, Store};
use crate::types::{
    AgentId, Checkpoint, NodeId, ReplicaState, SeqNo, ShardName, TableName, TableSpec, TlogEntry,
    TxKind,
};
use crate::upstream::{CoreClient, Subscription};

use super::{bootstrap, ReplicaOptions};

/// Events delivered through the replica inbox
#[derive(Debug)]
pub enum Event {
    /// A transaction batch pushed by the upstream agent
    TlogEntry(TlogEntry),
    /// The bootstrap client finished the bulk copy
    BootstrapComplete { checkpoint: Checkpoint },
    /// The bootstrap client failed before completing
    BootstrapFailed { reason: String },
    /// The upstream agent terminated
    AgentDown { agent: AgentId, reason: String },
    /// Time to attempt discovery + subscribe
    ReconnectTick,
    /// Time to drain one batch from the spill queue
    ReplayTick,
    /// Stop the actor cleanly
    Shutdown,
}

/// Tagged replica state; bootstrap and replay own the spill queue
enum State {
    Disconnected,
    Bootstrap {
        spill: SpillQueue,
        task: JoinHandle<()>,
    },
    LocalReplay {
        spill: SpillQueue,
    },
    Normal,
}

impl State {
    fn kind(&self) -> ReplicaState {
        match self {
            State::Disconnected => ReplicaState::Disconnected,
            State::Bootstrap { .. } => ReplicaState::Bootstrap,
            State::LocalReplay { .. } => ReplicaState::LocalReplay,
            State::Normal => ReplicaState::Normal,
        }
    }
}

/// Handle for stopping a running replica
#[derive(Clone)]
pub struct ReplicaHandle {
    tx: mpsc::Sender<Event>,
}

impl ReplicaHandle {
    /// Ask the replica to stop cleanly
    pub async fn stop(&self) {
        let _ = self.tx.send(Event::Shutdown).await;
    }
}

/// The shard replica actor
pub struct Replica {
    shard: ShardName,
    cores: Vec<NodeId>,
    opts: ReplicaOptions,

    client: Arc<dyn CoreClient>,
    store: Arc<dyn Store>,
    router: Arc<ReadRouter>,
    status: Arc<StatusRegistry>,

    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,

    state: State,
    remote_core: Option<NodeId>,
    agent: Option<AgentId>,
    checkpoint: Option<Checkpoint>,
    next_seqno: SeqNo,
    tables: Vec<TableSpec>,
}

impl Replica {
    /// Create a replica for `shard`, following one of `cores`
    pub fn new(
        shard: ShardName,
        cores: Vec<NodeId>,
        opts: ReplicaOptions,
        client: Arc<dyn CoreClient>,
        store: Arc<dyn Store>,
        router: Arc<ReadRouter>,
        status: Arc<StatusRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(opts.inbox_capacity);

        Self {
            shard,
            cores,
            opts,
            client,
            store,
            router,
            status,
            tx,
            rx,
            state: State::Disconnected,
            remote_core: None,
            agent: None,
            checkpoint: None,
            next_seqno: 0,
            tables: Vec::new(),
        }
    }

    /// Get a handle for stopping the actor
    pub fn handle(&self) -> ReplicaHandle {
        ReplicaHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run the actor until shutdown or a fatal error
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_loop().await;

        // The bootstrap client is supervised by this actor; take it down
        // with us.
        if let State::Bootstrap { task, .. } = &self.state {
            task.abort();
        }

        if let Err(e) = &result {
            tracing::error!("replica for shard {} terminated: {}", self.shard, e);
        }
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        self.enter_disconnected().await;

        loop {
            let Some(event) = self.rx.recv().await else {
                return Ok(());
            };

            match event {
                Event::TlogEntry(entry) => self.handle_tlog_entry(entry).await?,
                Event::BootstrapComplete { checkpoint } => {
                    self.handle_bootstrap_complete(checkpoint).await?
                }
                Event::BootstrapFailed { reason } => self.handle_bootstrap_failed(reason)?,
                Event::AgentDown { agent, reason } => {
                    self.handle_agent_down(agent, reason).await?
                }
                Event::ReconnectTick => self.handle_reconnect_tick().await?,
                Event::ReplayTick => self.handle_replay_tick().await?,
                Event::Shutdown => {
                    tracing::info!("replica for shard {} shutting down", self.shard);
                    return Ok(());
                }
            }
        }
    }

    // ========== Ingestion & ordering ==========

    async fn handle_tlog_entry(&mut self, entry: TlogEntry) -> Result<()> {
        let TlogEntry {
            agent,
            seqno,
            tx_kind,
            ops,
        } = entry;

        let current = match self.agent {
            Some(a) => a,
            None => {
                tracing::warn!(
                    "shard {}: dropping batch seqno {} with no active agent",
                    self.shard,
                    seqno
                );
                return Ok(());
            }
        };

        if agent != current {
            tracing::warn!(
                "shard {}: dropping batch seqno {} from stale agent {} (current {})",
                self.shard,
                seqno,
                agent,
                current
            );
            return Ok(());
        }

        if seqno < self.next_seqno {
            tracing::warn!(
                "shard {}: dropping stale batch seqno {} (expected {})",
                self.shard,
                seqno,
                self.next_seqno
            );
            return Ok(());
        }

        if seqno > self.next_seqno {
            return Err(Error::GapInTlog {
                expected: self.next_seqno,
                got: seqno,
                agent,
            });
        }

        match &mut self.state {
            State::Normal => {
                let mode = match tx_kind {
                    TxKind::Dirty => ApplyMode::Dirty,
                    TxKind::Transactional { .. } => ApplyMode::Transactional,
                };
                // An apply failure forces a restart; the log is never
                // silently skipped
                self.store
                    .apply_batch(mode, &ops)
                    .await
                    .map_err(|e| Error::BadApplyResult(e.to_string()))?;
            }
            State::Bootstrap { spill, .. } | State::LocalReplay { spill } => {
                spill.append(SpillRecord { seqno, ops })?;
                let count = spill.count();
                self.status.replayq_len(&self.shard, count).await;
            }
            State::Disconnected => {
                tracing::warn!(
                    "shard {}: dropping batch seqno {} received while disconnected",
                    self.shard,
                    seqno
                );
                return Ok(());
            }
        }

        self.status.import_trans(&self.shard, seqno).await;
        self.next_seqno += 1;
        Ok(())
    }

    // ========== Bootstrap completion ==========

    async fn handle_bootstrap_complete(&mut self, checkpoint: Checkpoint) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Bootstrap { spill, task: _ } => {
                tracing::info!(
                    "shard {}: bootstrap complete at checkpoint {}",
                    self.shard,
                    checkpoint
                );
                self.checkpoint = Some(checkpoint);
                self.enter_local_replay(spill).await;
            }
            other => {
                self.state = other;
                tracing::warn!(
                    "shard {}: ignoring unexpected bootstrap_complete in state {}",
                    self.shard,
                    self.state.kind()
                );
            }
        }
        Ok(())
    }

    fn handle_bootstrap_failed(&mut self, reason: String) -> Result<()> {
        if matches!(self.state, State::Bootstrap { .. }) {
            // No checkpoint exists yet; restarting is the simplest correct
            // recovery.
            return Err(Error::BootstrapFailed(reason));
        }

        tracing::warn!(
            "shard {}: ignoring bootstrap failure report in state {}: {}",
            self.shard,
            self.state.kind(),
            reason
        );
        Ok(())
    }

    // ========== Agent supervision ==========

    async fn handle_agent_down(&mut self, agent: AgentId, reason: String) -> Result<()> {
        match self.agent {
            Some(current) if current == agent => {}
            _ => {
                tracing::debug!(
                    "shard {}: ignoring death of stale agent {}: {}",
                    self.shard,
                    agent,
                    reason
                );
                return Ok(());
            }
        }

        match self.state {
            State::Normal => {
                tracing::warn!(
                    "shard {}: upstream agent {} died: {}; reconnecting",
                    self.shard,
                    agent,
                    reason
                );
                self.enter_disconnected().await;
                Ok(())
            }
            State::Bootstrap { .. } | State::LocalReplay { .. } => {
                // The partially bootstrapped state is unusable and no
                // checkpoint exists to resume from.
                Err(Error::AgentDied { agent, reason })
            }
            State::Disconnected => {
                tracing::debug!(
                    "shard {}: agent {} died while already disconnected",
                    self.shard,
                    agent
                );
                Ok(())
            }
        }
    }

    // ========== Reconnect & subscribe ==========

    async fn handle_reconnect_tick(&mut self) -> Result<()> {
        if !matches!(self.state, State::Disconnected) {
            tracing::debug!("shard {}: stale reconnect tick", self.shard);
            return Ok(());
        }
        self.try_connect().await
    }

    async fn try_connect(&mut self) -> Result<()> {
        // Shuffle candidates per attempt to spread load across cores
        let mut candidates = self.cores.clone();
        candidates.shuffle(&mut rand::thread_rng());

        for node in candidates {
            match self
                .client
                .subscribe(&node, &self.shard, self.tx.clone(), self.checkpoint.clone())
                .await
            {
                Ok(subscription) => return self.post_connect(node, subscription).await,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "shard {}: subscribe to {} failed: {}",
                        self.shard,
                        node,
                        e
                    );
                }
                // Not a peer-level failure; trying other candidates won't help
                Err(e) => return Err(e),
            }
        }

        let err = Error::NoCoreAvailable(self.shard.clone());
        tracing::info!(
            "{}; retrying in {:?}",
            err,
            self.opts.reconnect_interval
        );
        self.schedule(Event::ReconnectTick, self.opts.reconnect_interval);
        Ok(())
    }

    async fn post_connect(&mut self, node: NodeId, subscription: Subscription) -> Result<()> {
        let Subscription {
            bootstrap_needed,
            agent,
            tables,
            starting_seqno,
        } = subscription;
        let agent_id = agent.id();

        // Agent linkage: upstream death arrives as an ordinary inbox event
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let reason = agent.terminated().await;
            let _ = tx.send(Event::AgentDown {
                agent: agent_id,
                reason,
            })
            .await;
        });

        tracing::info!(
            "shard {}: subscribed to {} (agent {}, starting seqno {}, bootstrap needed: {})",
            self.shard,
            node,
            agent_id,
            starting_seqno,
            bootstrap_needed
        );

        self.remote_core = Some(node.clone());
        self.agent = Some(agent_id);
        self.next_seqno = starting_seqno;
        self.tables = tables;

        // Converge the local schema so the tables exist before any apply
        for spec in &self.tables {
            self.store.ensure_table(spec).await?;
        }

        if bootstrap_needed {
            self.enter_bootstrap(&node).await
        } else {
            self.enter_normal().await
        }
    }

    // ========== State entry actions ==========

    async fn enter_disconnected(&mut self) {
        // Reads must not hit the local node outside normal; the last known
        // core is the best hint until a new subscription lands.
        if let Some(core) = self.remote_core.take() {
            if !self.tables.is_empty() {
                self.router.route_to_remote(&self.table_names(), &core);
            }
        }
        self.agent = None;

        self.state = State::Disconnected;
        self.status
            .state_change(&self.shard, ReplicaState::Disconnected)
            .await;
        self.status.shard_down(&self.shard).await;

        self.schedule(Event::ReconnectTick, Duration::ZERO);
    }

    async fn enter_bootstrap(&mut self, core: &NodeId) -> Result<()> {
        self.router.route_to_remote(&self.table_names(), core);

        for table in self.table_names() {
            self.store.clear_table(&table).await?;
        }

        let task = bootstrap::spawn(
            self.client.clone(),
            core.clone(),
            self.shard.clone(),
            self.store.clone(),
            self.tx.clone(),
        );

        let spill = SpillQueue::open(&self.opts.spill)?;

        self.state = State::Bootstrap { spill, task };
        self.status
            .state_change(&self.shard, ReplicaState::Bootstrap)
            .await;
        Ok(())
    }

    async fn enter_local_replay(&mut self, spill: SpillQueue) {
        self.state = State::LocalReplay { spill };
        self.status
            .state_change(&self.shard, ReplicaState::LocalReplay)
            .await;
        self.schedule(Event::ReplayTick, Duration::ZERO);
    }

    async fn enter_normal(&mut self) -> Result<()> {
        self.state = State::Normal;
        self.status
            .state_change(&self.shard, ReplicaState::Normal)
            .await;
        if let Some(agent) = self.agent {
            self.status.shard_up(&self.shard, agent).await;
        }
        self.router.route_to_local(&self.table_names());

        tracing::info!(
            "shard {}: caught up with the upstream, serving local reads",
            self.shard
        );
        Ok(())
    }

    // ========== Spill drain ==========

    async fn handle_replay_tick(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, State::Disconnected);
        let State::LocalReplay { mut spill } = state else {
            self.state = state;
            tracing::debug!("shard {}: stale replay tick", self.shard);
            return Ok(());
        };

        match spill.pop()? {
            Some((record, ack)) => {
                self.store
                    .apply_batch(ApplyMode::Dirty, &record.ops)
                    .await
                    .map_err(|e| Error::BadApplyResult(e.to_string()))?;
                spill.ack(ack)?;

                if spill.is_empty() {
                    spill.close()?;
                    self.enter_normal().await
                } else {
                    // One batch per tick: inbound events interleave with the
                    // drain, so a bounded incoming rate cannot starve it.
                    self.state = State::LocalReplay { spill };
                    self.schedule(Event::ReplayTick, Duration::ZERO);
                    Ok(())
                }
            }
            None => {
                spill.close()?;
                self.enter_normal().await
            }
        }
    }

    // ========== Helpers ==========

    fn table_names(&self) -> Vec<TableName> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Post an event to our own inbox after `delay`; delivery is ordered
    /// with respect to inbound batches.
    fn schedule(&self, event: Event, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(event).await;
        });
    }
}

/// Run a replica under a restart loop.
///
/// Fatal replication errors (gap in the log, upstream loss during sync,
/// failed apply) crash the actor; it is rebuilt from scratch after the
/// reconnect interval. Other errors are surfaced to the caller, and a
/// clean stop returns `Ok`.
pub async fn run_supervised(
    shard: ShardName,
    cores: Vec<NodeId>,
    opts: ReplicaOptions,
    client: Arc<dyn CoreClient>,
    store: Arc<dyn Store>,
    router: Arc<ReadRouter>,
    status: Arc<StatusRegistry>,
) -> Result<()> {
    loop {
        let replica = Replica::new(
            shard.clone(),
            cores.clone(),
            opts.clone(),
            client.clone(),
            store.clone(),
            router.clone(),
            status.clone(),
        );

        match replica.run().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_fatal() => {
                tracing::error!(
                    "replica for shard {} crashed: {}; restarting in {:?}",
                    shard,
                    e,
                    opts.reconnect_interval
                );
                tokio::time::sleep(opts.reconnect_interval).await;
            }
            // Restarting won't fix a broken local environment
            Err(e) => return Err(e),
        }
    }
}
