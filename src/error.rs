//! ShardSync Error Types

use thiserror::Error;

use crate::types::{AgentId, SeqNo, ShardName};

/// Result type alias for ShardSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// ShardSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Replication errors
    #[error("Gap in tlog from agent {agent}: expected seqno {expected}, got {got}")]
    GapInTlog {
        expected: SeqNo,
        got: SeqNo,
        agent: AgentId,
    },

    #[error("Upstream agent {agent} died: {reason}")]
    AgentDied { agent: AgentId, reason: String },

    #[error("No core node available for shard {0}")]
    NoCoreAvailable(ShardName),

    #[error("Subscribe rejected by {node}: {reason}")]
    SubscribeRejected { node: String, reason: String },

    #[error("Bootstrap failed: {0}")]
    BootstrapFailed(String),

    #[error("Transactional apply failed: {0}")]
    BadApplyResult(String),

    // Spill queue errors
    #[error("Spill queue error: {0}")]
    Spill(String),

    #[error("Spill record corrupted in {segment}: {reason}")]
    SpillCorrupted { segment: String, reason: String },

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Serialization / I/O
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Peer-level errors: the reconnect loop moves on to the next candidate
    /// and retries on its timer
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NoCoreAvailable(_)
                | Error::Network(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::SubscribeRejected { .. }
        )
    }

    /// Structural replication inconsistencies: the supervisor rebuilds the
    /// replica from scratch; anything else it surfaces to the caller
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::GapInTlog { .. }
                | Error::AgentDied { .. }
                | Error::BootstrapFailed(_)
                | Error::BadApplyResult(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let gap = Error::GapInTlog {
            expected: 10,
            got: 12,
            agent: AgentId::new(),
        };
        assert!(gap.is_fatal());
        assert!(!gap.is_retryable());

        let no_core = Error::NoCoreAvailable("shard-a".to_string());
        assert!(no_core.is_retryable());
        assert!(!no_core.is_fatal());

        // Local-environment failures are neither: they surface to the caller
        let store = Error::Store("disk trouble".into());
        assert!(!store.is_retryable());
        assert!(!store.is_fatal());
    }
}
