//! Read Routing
//!
//! Per-table "where to read" directives consulted by the local read path.
//! A shard's tables point at the remote core while the replica is catching
//! up and flip to the local node only once the replica is fully up; the
//! flip is what gives a shard its well-defined "fully up" moment.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{NodeId, TableName};

/// Where reads for a table should be served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrom {
    /// Serve from the local table store
    Local,
    /// Forward to the given remote core node
    Remote(NodeId),
}

/// Atomic per-table read-direction map
///
/// Mutated only by the replica actor that owns the tables; consulted
/// atomically per read, so readers never observe a torn state. Tables
/// without a directive read locally.
pub struct ReadRouter {
    routes: RwLock<HashMap<TableName, ReadFrom>>,
}

impl ReadRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Where reads for `table` should currently be served from
    pub fn where_to_read(&self, table: &str) -> ReadFrom {
        self.routes
            .read()
            .expect("read router lock poisoned")
            .get(table)
            .cloned()
            .unwrap_or(ReadFrom::Local)
    }

    /// Point the given tables at a remote core node
    pub fn route_to_remote(&self, tables: &[TableName], node: &NodeId) {
        let mut routes = self.routes.write().expect("read router lock poisoned");
        for table in tables {
            routes.insert(table.clone(), ReadFrom::Remote(node.clone()));
        }
    }

    /// Point the given tables back at the local node
    pub fn route_to_local(&self, tables: &[TableName]) {
        let mut routes = self.routes.write().expect("read router lock poisoned");
        for table in tables {
            routes.insert(table.clone(), ReadFrom::Local);
        }
    }
}

impl Default for ReadRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_local() {
        let router = ReadRouter::new();
        assert_eq!(router.where_to_read("unknown"), ReadFrom::Local);
    }

    #[test]
    fn test_remote_then_local() {
        let router = ReadRouter::new();
        let tables = vec!["t1".to_string(), "t2".to_string()];
        let core = "10.0.0.1:7654".to_string();

        router.route_to_remote(&tables, &core);
        assert_eq!(router.where_to_read("t1"), ReadFrom::Remote(core.clone()));
        assert_eq!(router.where_to_read("t2"), ReadFrom::Remote(core));

        router.route_to_local(&tables);
        assert_eq!(router.where_to_read("t1"), ReadFrom::Local);
        assert_eq!(router.where_to_read("t2"), ReadFrom::Local);
    }
}
