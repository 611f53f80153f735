//! Bootstrap Coordination
//!
//! Spawns the bootstrap client as a child task of the replica actor and
//! funnels its outcome back through the actor inbox.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::Store;
use crate::types::{NodeId, ShardName};
use crate::upstream::CoreClient;

use super::Event;

/// Spawn the bootstrap client against `node`.
///
/// Completion arrives in the replica inbox as `BootstrapComplete`; any
/// failure as `BootstrapFailed`. The replica aborts the task if it leaves
/// the bootstrap state early.
pub(crate) fn spawn(
    client: Arc<dyn CoreClient>,
    node: NodeId,
    shard: ShardName,
    store: Arc<dyn Store>,
    events: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("starting bootstrap of shard {} from {}", shard, node);

        match client.bootstrap(&node, &shard, store).await {
            Ok(checkpoint) => {
                let _ = events.send(Event::BootstrapComplete { checkpoint }).await;
            }
            Err(e) => {
                tracing::error!("bootstrap of shard {} from {} failed: {}", shard, node, e);
                let _ = events
                    .send(Event::BootstrapFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
        }
    })
}
