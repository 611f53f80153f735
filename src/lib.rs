//! ShardSync - Replicated-Log Shard Follower
//!
//! A read-only replica that attaches shards to remote authoritative
//! ("core") nodes, performs an initial bulk copy of each shard's tables,
//! then follows the live transaction log while preserving strict
//! per-shard ordering.
//!
//! # Architecture
//!
//! Each shard is driven by a single replica actor with a four-state
//! lifecycle: `disconnected -> bootstrap -> local_replay -> normal`.
//! Real-time batches that arrive while historical data is still being
//! copied are buffered in a spill queue and drained before local reads
//! are admitted; gaps in the upstream sequence are fatal and trigger a
//! restart.
//!
//! # Features
//!
//! - Checkpoint-based incremental resumption (no bootstrap on warm resume)
//! - Strict per-agent seqno ordering with gap detection
//! - Memory-only or segmented on-disk spill queue for large bootstraps
//! - Per-table read routing with a well-defined "fully up" moment
//! - Status notifications for shard health and replication lag

pub mod config;
pub mod error;
pub mod replication;
pub mod routing;
pub mod spill;
pub mod status;
pub mod store;
pub mod types;
pub mod upstream;

pub use config::ShardSyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ShardSyncConfig;
    pub use crate::error::{Error, Result};
    pub use crate::replication::{run_supervised, Replica, ReplicaHandle, ReplicaOptions};
    pub use crate::routing::{ReadFrom, ReadRouter};
    pub use crate::spill::{SpillOptions, SpillQueue};
    pub use crate::status::{StatusEvent, StatusRegistry};
    pub use crate::store::{ApplyMode, MemStore, Store};
    pub use crate::types::{Checkpoint, ReplicaState, SeqNo, ShardName, TlogEntry, TxKind};
    pub use crate::upstream::{CoreClient, TcpCoreClient};
}
