//! Core Replication Types
//!
//! Identifiers and transaction-log payload types shared across the crate.

use serde::{Deserialize, Serialize};

/// Sequence number assigned by the upstream agent to each transmitted batch.
///
/// Successive batches from the same agent carry N, N+1, N+2, ... with no gaps.
pub type SeqNo = u64;

/// Name of a replicated shard (a named set of tables replicated as a unit)
pub type ShardName = String;

/// Name of a single replicated table
pub type TableName = String;

/// Address of a core node (host:port)
pub type NodeId = String;

/// Opaque resumption token produced by the upstream.
///
/// Represents "all transactions up to and including this point are durably
/// present in the replica". Persisted across reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint(pub String);

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Checkpoint {
    fn from(s: &str) -> Self {
        Checkpoint(s.to_string())
    }
}

/// Identifier of an upstream streaming agent.
///
/// Assigned by the core node per subscription; batches from a prior
/// subscription carry a stale agent id and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub uuid::Uuid);

impl AgentId {
    /// Generate a fresh agent id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Description of a replicated table, learned from the upstream at connect time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name
    pub name: TableName,
    /// Key columns (informational; single-column `key` by default)
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,
}

fn default_key_columns() -> Vec<String> {
    vec!["key".to_string()]
}

impl TableSpec {
    /// Create a spec with the default key layout
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            key_columns: default_key_columns(),
        }
    }
}

/// A single table operation within a transaction batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableOp {
    /// Insert or overwrite a record
    Write {
        table: TableName,
        key: String,
        value: Vec<u8>,
    },
    /// Delete a record (no-op if absent)
    Delete { table: TableName, key: String },
}

impl TableOp {
    /// Table this operation targets
    pub fn table(&self) -> &str {
        match self {
            TableOp::Write { table, .. } => table,
            TableOp::Delete { table, .. } => table,
        }
    }
}

/// How a transaction batch was committed on the core node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Dirty write, no transaction context
    Dirty,
    /// Transactional commit with its originating transaction id
    Transactional { tid: u64 },
}

/// A transaction batch pushed by the upstream agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlogEntry {
    /// Agent that transmitted this batch
    pub agent: AgentId,
    /// Position of this batch in the agent's log stream
    pub seqno: SeqNo,
    /// Commit mode on the core side
    pub tx_kind: TxKind,
    /// Ordered operations to apply
    pub ops: Vec<TableOp>,
}

/// Lifecycle state of a shard replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaState {
    /// No upstream; reconnect timer armed
    Disconnected,
    /// Bulk copy in progress; real-time batches are spilled
    Bootstrap,
    /// Draining the spill queue before admitting live traffic
    LocalReplay,
    /// Fully caught up; batches applied directly, local reads admitted
    Normal,
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaState::Disconnected => write!(f, "DISCONNECTED"),
            ReplicaState::Bootstrap => write!(f, "BOOTSTRAP"),
            ReplicaState::LocalReplay => write!(f, "LOCAL_REPLAY"),
            ReplicaState::Normal => write!(f, "NORMAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tlog_entry_roundtrip() {
        let entry = TlogEntry {
            agent: AgentId::new(),
            seqno: 42,
            tx_kind: TxKind::Transactional { tid: 7 },
            ops: vec![
                TableOp::Write {
                    table: "t1".to_string(),
                    key: "a".to_string(),
                    value: b"v".to_vec(),
                },
                TableOp::Delete {
                    table: "t1".to_string(),
                    key: "b".to_string(),
                },
            ],
        };

        let bytes = bincode::serialize(&entry).unwrap();
        let restored: TlogEntry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(entry, restored);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ReplicaState::LocalReplay.to_string(), "LOCAL_REPLAY");
        assert_eq!(ReplicaState::Normal.to_string(), "NORMAL");
    }
}
