//! Replication Protocol
//!
//! Defines the wire protocol between a replicant and its upstream core.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{AgentId, Checkpoint, SeqNo, ShardName, TableName, TableSpec, TlogEntry};

/// Protocol messages between replicant and core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // ========== Subscription ==========
    /// Attach to a shard's transaction log, optionally resuming from a
    /// checkpoint
    Subscribe {
        shard: ShardName,
        checkpoint: Option<Checkpoint>,
    },

    /// Subscription accepted; the core starts streaming after this
    SubscribeOk {
        /// Whether a full bulk copy is required before the stream is usable
        bootstrap_needed: bool,
        /// Agent assigned to this subscription
        agent: AgentId,
        /// Tables making up the shard
        tables: Vec<TableSpec>,
        /// Seqno the first streamed batch will carry
        starting_seqno: SeqNo,
    },

    /// Subscription rejected
    SubscribeError { reason: String },

    // ========== Log Streaming ==========
    /// A committed transaction batch (pushed by the agent)
    TlogEntry(TlogEntry),

    // ========== Bootstrap ==========
    /// Request a bulk copy of a shard's current table contents
    BootstrapRequest { shard: ShardName },

    /// One chunk of table records
    BootstrapChunk {
        table: TableName,
        records: Vec<(String, Vec<u8>)>,
        is_last: bool,
    },

    /// Bulk copy finished; `checkpoint` is the resumption point
    BootstrapDone { checkpoint: Checkpoint },

    // ========== Error ==========
    /// Protocol-level error
    Error { code: ErrorCode, message: String },
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Shard not hosted on this node
    UnknownShard,
    /// Node is not a core for this shard
    NotCore,
    /// Internal error
    Internal,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Subscribe { .. } => "Subscribe",
            Message::SubscribeOk { .. } => "SubscribeOk",
            Message::SubscribeError { .. } => "SubscribeError",
            Message::TlogEntry(_) => "TlogEntry",
            Message::BootstrapRequest { .. } => "BootstrapRequest",
            Message::BootstrapChunk { .. } => "BootstrapChunk",
            Message::BootstrapDone { .. } => "BootstrapDone",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    Message::deserialize(&body)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}
