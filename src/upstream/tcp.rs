//! TCP Core Client
//!
//! Framed-TCP implementation of [`CoreClient`]: one connection for the
//! subscribe + live stream, a separate short-lived connection for the
//! bulk copy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::replication::protocol::{read_message, write_message, Message};
use crate::replication::Event;
use crate::store::{ApplyMode, Store};
use crate::types::{AgentId, Checkpoint, NodeId, ShardName, TableOp};

use super::{AgentHandle, AgentMonitor, CoreClient, Subscription};

/// `CoreClient` over framed TCP
pub struct TcpCoreClient {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpCoreClient {
    /// Create a new TCP core client
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

#[async_trait]
impl CoreClient for TcpCoreClient {
    async fn subscribe(
        &self,
        node: &NodeId,
        shard: &ShardName,
        events: mpsc::Sender<Event>,
        checkpoint: Option<Checkpoint>,
    ) -> Result<Subscription> {
        let stream = self.connect(node).await?;
        let (mut reader, mut writer) = stream.into_split();

        write_message(
            &mut writer,
            &Message::Subscribe {
                shard: shard.clone(),
                checkpoint,
            },
        )
        .await?;

        let reply = timeout(self.request_timeout, read_message(&mut reader))
            .await
            .map_err(|_| Error::ConnectionTimeout(node.clone()))??;

        match reply {
            Message::SubscribeOk {
                bootstrap_needed,
                agent,
                tables,
                starting_seqno,
            } => {
                let (handle, monitor) = AgentHandle::new(agent);
                // The writer half stays alive with the stream task so the
                // connection is not half-closed under the core.
                tokio::spawn(stream_loop(reader, writer, events, monitor, agent));

                Ok(Subscription {
                    bootstrap_needed,
                    agent: handle,
                    tables,
                    starting_seqno,
                })
            }
            Message::SubscribeError { reason } => Err(Error::SubscribeRejected {
                node: node.clone(),
                reason,
            }),
            Message::Error { message, .. } => Err(Error::SubscribeRejected {
                node: node.clone(),
                reason: message,
            }),
            other => Err(Error::Network(format!(
                "unexpected {} in subscribe reply",
                other.type_name()
            ))),
        }
    }

    async fn bootstrap(
        &self,
        node: &NodeId,
        shard: &ShardName,
        store: Arc<dyn Store>,
    ) -> Result<Checkpoint> {
        let mut stream = self.connect(node).await?;
        let (mut reader, mut writer) = stream.split();

        write_message(
            &mut writer,
            &Message::BootstrapRequest {
                shard: shard.clone(),
            },
        )
        .await?;

        loop {
            let message = timeout(self.request_timeout, read_message(&mut reader))
                .await
                .map_err(|_| Error::ConnectionTimeout(node.clone()))??;

            match message {
                Message::BootstrapChunk {
                    table,
                    records,
                    is_last,
                } => {
                    let ops: Vec<TableOp> = records
                        .into_iter()
                        .map(|(key, value)| TableOp::Write {
                            table: table.clone(),
                            key,
                            value,
                        })
                        .collect();
                    store.apply_batch(ApplyMode::Dirty, &ops).await?;

                    if is_last {
                        tracing::debug!("bootstrap copy of table {} finished", table);
                    }
                }
                Message::BootstrapDone { checkpoint } => {
                    return Ok(checkpoint);
                }
                Message::Error { message, .. } => {
                    return Err(Error::BootstrapFailed(message));
                }
                other => {
                    return Err(Error::Network(format!(
                        "unexpected {} during bootstrap",
                        other.type_name()
                    )));
                }
            }
        }
    }
}

/// Forward streamed tlog entries into the replica inbox until the
/// connection is lost, then report the agent as terminated.
async fn stream_loop(
    mut reader: OwnedReadHalf,
    _writer: tokio::net::tcp::OwnedWriteHalf,
    events: mpsc::Sender<Event>,
    monitor: AgentMonitor,
    agent: AgentId,
) {
    let reason = loop {
        match read_message(&mut reader).await {
            Ok(Message::TlogEntry(entry)) => {
                if events.send(Event::TlogEntry(entry)).await.is_err() {
                    break "subscriber gone".to_string();
                }
            }
            Ok(other) => {
                tracing::warn!(
                    "unexpected {} on tlog stream from agent {}",
                    other.type_name(),
                    agent
                );
            }
            Err(e) => break format!("stream closed: {}", e),
        }
    };

    tracing::debug!("tlog stream from agent {} ended: {}", agent, reason);
    monitor.terminate(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TableSpec, TlogEntry, TxKind};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_failure() {
        let client = TcpCoreClient::new(Duration::from_millis(100), Duration::from_millis(500));
        let (tx, _rx) = mpsc::channel(8);

        let result = client
            .subscribe(
                &"127.0.0.1:1".to_string(),
                &"shard-a".to_string(),
                tx,
                None,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_and_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let agent = AgentId::new();

        // Minimal in-test core: accept one subscriber, stream one batch,
        // then drop the connection.
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = socket.split();

            let request = read_message(&mut reader).await.unwrap();
            assert_eq!(request.type_name(), "Subscribe");

            write_message(
                &mut writer,
                &Message::SubscribeOk {
                    bootstrap_needed: false,
                    agent,
                    tables: vec![TableSpec::new("t1")],
                    starting_seqno: 4,
                },
            )
            .await
            .unwrap();

            write_message(
                &mut writer,
                &Message::TlogEntry(TlogEntry {
                    agent,
                    seqno: 4,
                    tx_kind: TxKind::Dirty,
                    ops: vec![],
                }),
            )
            .await
            .unwrap();
        });

        let client = TcpCoreClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(8);

        let subscription = client
            .subscribe(&address, &"shard-a".to_string(), tx, None)
            .await
            .unwrap();
        assert!(!subscription.bootstrap_needed);
        assert_eq!(subscription.agent.id(), agent);
        assert_eq!(subscription.starting_seqno, 4);

        match rx.recv().await.unwrap() {
            Event::TlogEntry(entry) => assert_eq!(entry.seqno, 4),
            other => panic!("unexpected event: {:?}", other),
        }

        // Server task ends, dropping the connection: the agent dies
        server.await.unwrap();
        let reason = subscription.agent.terminated().await;
        assert!(reason.contains("stream closed"));
    }

    #[tokio::test]
    async fn test_bootstrap_copy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = socket.split();

            let request = read_message(&mut reader).await.unwrap();
            assert_eq!(request.type_name(), "BootstrapRequest");

            write_message(
                &mut writer,
                &Message::BootstrapChunk {
                    table: "t1".to_string(),
                    records: vec![("a".to_string(), b"1".to_vec())],
                    is_last: true,
                },
            )
            .await
            .unwrap();
            write_message(
                &mut writer,
                &Message::BootstrapDone {
                    checkpoint: Checkpoint::from("cp1"),
                },
            )
            .await
            .unwrap();
        });

        let client = TcpCoreClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let store = Arc::new(crate::store::MemStore::new());

        let checkpoint = client
            .bootstrap(&address, &"shard-a".to_string(), store.clone())
            .await
            .unwrap();
        assert_eq!(checkpoint, Checkpoint::from("cp1"));
        assert_eq!(store.get("t1", "a").await, Some(b"1".to_vec()));

        server.await.unwrap();
    }
}
