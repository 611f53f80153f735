//! Replication Module
//!
//! The shard replica state machine and the wire protocol it speaks
//! with upstream core nodes.

pub mod protocol;

mod bootstrap;
mod replica;

pub use protocol::{FrameHeader, Message};
pub use replica::{run_supervised, Event, Replica, ReplicaHandle};

use std::time::Duration;

use crate::config::ShardSyncConfig;
use crate::spill::SpillOptions;

/// Configuration for a shard replica
#[derive(Debug, Clone)]
pub struct ReplicaOptions {
    /// Delay between reconnect attempts after all candidates fail
    pub reconnect_interval: Duration,
    /// Spill queue options; `dir` must already be shard-specific
    pub spill: SpillOptions,
    /// Inbox capacity of the replica actor
    pub inbox_capacity: usize,
}

impl Default for ReplicaOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(5000),
            spill: SpillOptions::default(),
            inbox_capacity: 1024,
        }
    }
}

impl ReplicaOptions {
    /// Derive options for one shard from the node configuration
    pub fn from_config(config: &ShardSyncConfig, shard: &str) -> Self {
        Self {
            reconnect_interval: config.reconnect_interval(),
            spill: SpillOptions {
                mem_only: config.spill.mem_only,
                dir: config.spill_dir_for(shard),
                max_segment_entries: config.spill.max_segment_entries,
                compression: config.spill.compression,
            },
            inbox_capacity: 1024,
        }
    }
}
