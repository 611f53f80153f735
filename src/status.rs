//! Shard Status Registry
//!
//! Tracks per-shard replica status and publishes status notifications
//! (shard up/down, state changes, import progress, spill queue length).

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::types::{AgentId, ReplicaState, SeqNo, ShardName};

/// Capacity of the notification channel; slow subscribers lag and miss samples
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Status notification published by a replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Shard lost its upstream; local reads are not authoritative
    ShardDown { shard: ShardName },
    /// Shard is fully caught up and serving local reads
    ShardUp { shard: ShardName, agent: AgentId },
    /// A transaction batch was accepted (lag measurement sample)
    ImportTrans { shard: ShardName, seqno: SeqNo },
    /// Spill queue length sample
    ReplayqLen { shard: ShardName, count: usize },
    /// Replica lifecycle state changed
    StateChange { shard: ShardName, state: ReplicaState },
}

/// Point-in-time status of a single shard replica
#[derive(Debug, Clone)]
pub struct ShardStatus {
    /// Shard name
    pub shard: ShardName,
    /// Current lifecycle state
    pub state: ReplicaState,
    /// Upstream agent, when connected
    pub agent: Option<AgentId>,
    /// Last accepted batch seqno
    pub last_imported_seqno: Option<SeqNo>,
    /// Last sampled spill queue length
    pub replayq_len: usize,
    /// When the current state was entered
    pub since: chrono::DateTime<chrono::Utc>,
}

impl ShardStatus {
    fn new(shard: ShardName) -> Self {
        Self {
            shard,
            state: ReplicaState::Disconnected,
            agent: None,
            last_imported_seqno: None,
            replayq_len: 0,
            since: chrono::Utc::now(),
        }
    }
}

/// Registry of shard replica statuses
///
/// Written only by the owning replica actors; readable by anyone.
/// Notifications are also published on a broadcast channel for
/// observers that want a live feed.
pub struct StatusRegistry {
    shards: RwLock<HashMap<ShardName, ShardStatus>>,
    events: broadcast::Sender<StatusEvent>,
}

impl StatusRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shards: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to the live notification feed
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Mark a shard as down (upstream lost or not yet attached)
    pub async fn shard_down(&self, shard: &ShardName) {
        let mut shards = self.shards.write().await;
        let entry = shards
            .entry(shard.clone())
            .or_insert_with(|| ShardStatus::new(shard.clone()));
        entry.agent = None;
        entry.since = chrono::Utc::now();
        drop(shards);

        tracing::debug!("shard {} marked down", shard);
        self.publish(StatusEvent::ShardDown {
            shard: shard.clone(),
        });
    }

    /// Mark a shard as up, serving local reads through the given agent
    pub async fn shard_up(&self, shard: &ShardName, agent: AgentId) {
        let mut shards = self.shards.write().await;
        let entry = shards
            .entry(shard.clone())
            .or_insert_with(|| ShardStatus::new(shard.clone()));
        entry.agent = Some(agent);
        entry.since = chrono::Utc::now();
        drop(shards);

        tracing::debug!("shard {} marked up (agent {})", shard, agent);
        self.publish(StatusEvent::ShardUp {
            shard: shard.clone(),
            agent,
        });
    }

    /// Record a replica state change
    pub async fn state_change(&self, shard: &ShardName, state: ReplicaState) {
        let mut shards = self.shards.write().await;
        let entry = shards
            .entry(shard.clone())
            .or_insert_with(|| ShardStatus::new(shard.clone()));
        entry.state = state;
        entry.since = chrono::Utc::now();
        drop(shards);

        self.publish(StatusEvent::StateChange {
            shard: shard.clone(),
            state,
        });
    }

    /// Record an accepted batch seqno (lag measurement sample)
    pub async fn import_trans(&self, shard: &ShardName, seqno: SeqNo) {
        let mut shards = self.shards.write().await;
        if let Some(entry) = shards.get_mut(shard) {
            entry.last_imported_seqno = Some(seqno);
        }
        drop(shards);

        self.publish(StatusEvent::ImportTrans {
            shard: shard.clone(),
            seqno,
        });
    }

    /// Record a spill queue length sample
    pub async fn replayq_len(&self, shard: &ShardName, count: usize) {
        let mut shards = self.shards.write().await;
        if let Some(entry) = shards.get_mut(shard) {
            entry.replayq_len = count;
        }
        drop(shards);

        self.publish(StatusEvent::ReplayqLen {
            shard: shard.clone(),
            count,
        });
    }

    /// Get a snapshot of one shard's status
    pub async fn snapshot(&self, shard: &ShardName) -> Option<ShardStatus> {
        self.shards.read().await.get(shard).cloned()
    }

    /// Get snapshots of all tracked shards
    pub async fn all(&self) -> Vec<ShardStatus> {
        self.shards.read().await.values().cloned().collect()
    }

    fn publish(&self, event: StatusEvent) {
        // No receivers is fine; notifications are best-effort
        let _ = self.events.send(event);
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_tracking() {
        let registry = StatusRegistry::new();
        let shard = "shard-a".to_string();
        let agent = AgentId::new();

        registry.shard_down(&shard).await;
        registry
            .state_change(&shard, ReplicaState::Bootstrap)
            .await;
        registry.replayq_len(&shard, 3).await;
        registry.import_trans(&shard, 7).await;
        registry.shard_up(&shard, agent).await;
        registry.state_change(&shard, ReplicaState::Normal).await;

        let status = registry.snapshot(&shard).await.unwrap();
        assert_eq!(status.state, ReplicaState::Normal);
        assert_eq!(status.agent, Some(agent));
        assert_eq!(status.last_imported_seqno, Some(7));
        assert_eq!(status.replayq_len, 3);
    }

    #[tokio::test]
    async fn test_event_feed() {
        let registry = StatusRegistry::new();
        let mut feed = registry.subscribe();
        let shard = "shard-a".to_string();

        registry.shard_down(&shard).await;
        registry.import_trans(&shard, 0).await;

        assert_eq!(
            feed.recv().await.unwrap(),
            StatusEvent::ShardDown {
                shard: shard.clone()
            }
        );
        assert_eq!(
            feed.recv().await.unwrap(),
            StatusEvent::ImportTrans { shard, seqno: 0 }
        );
    }
}
