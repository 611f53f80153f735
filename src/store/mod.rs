//! Table Store Module
//!
//! The applier boundary: commits batches of table operations on behalf
//! of the replica actor.

mod mem;

pub use mem::MemStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{TableOp, TableSpec};

/// How a batch is committed locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Apply each operation directly, creating tables on demand
    Dirty,
    /// Apply all operations atomically against existing tables
    Transactional,
}

/// Local table store that accepts committed writes
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Make sure a table exists with the given layout (schema convergence;
    /// no-op if it already exists)
    async fn ensure_table(&self, spec: &TableSpec) -> Result<()>;

    /// Remove all contents of a table (idempotent if the table is missing)
    async fn clear_table(&self, table: &str) -> Result<()>;

    /// Commit a batch of operations
    async fn apply_batch(&self, mode: ApplyMode, ops: &[TableOp]) -> Result<()>;
}
