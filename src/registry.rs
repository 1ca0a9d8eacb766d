//! Connection registry
//!
//! Single source of truth for who is connected and under what name. Shared
//! by the accept loop, every connection handler, the router, command
//! handlers and the heartbeat, so all access goes through an async `RwLock`.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::io::AsyncWrite;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Registered connection with its display name
#[derive(Debug)]
struct Entry {
    connection: Arc<Connection>,
    nickname: String,
}

/// Live connection set keyed by `ConnectionId`
///
/// Cheap to clone; clones share the same state. Iteration follows
/// registration order.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<BTreeMap<ConnectionId, Entry>>>,
    next_id: Arc<AtomicU64>,
    count: Arc<watch::Sender<usize>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            count: Arc::new(count),
        }
    }

    /// Register the write half of a freshly accepted stream
    ///
    /// The connection starts out as `Buddy#<id>`.
    pub async fn add<W>(&self, writer: W) -> Arc<Connection>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = ConnectionId::next(&self.next_id);
        let connection = Arc::new(Connection::new(id, writer));
        let nickname = id.default_nickname();

        let count = {
            let mut entries = self.entries.write().await;
            entries.insert(
                id,
                Entry {
                    connection: Arc::clone(&connection),
                    nickname,
                },
            );
            self.count.send_replace(entries.len());
            entries.len()
        };

        debug!("Connection {} registered", id);
        report_chatters(count);
        connection
    }

    /// Drop a connection and close its stream
    ///
    /// Idempotent: returns `false` if the id was not registered, which is
    /// the normal outcome when two failure paths race on the same peer.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let (entry, count) = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.remove(&id) else {
                return false;
            };
            entry.connection.mark_closed();
            self.count.send_replace(entries.len());
            (entry, entries.len())
        };

        entry.connection.close().await;
        info!(target: "line_chat::activity", "{} left.", entry.nickname);
        report_chatters(count);
        true
    }

    /// Remove every registered connection
    pub async fn remove_all(&self) {
        let ids: Vec<ConnectionId> = self.entries.read().await.keys().copied().collect();
        join_all(ids.into_iter().map(|id| self.remove(id))).await;
    }

    /// Look up a live connection
    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Snapshot of every live connection
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.connection))
            .collect()
    }

    /// Every live connection except `id`
    pub async fn others(&self, id: ConnectionId) -> Vec<Arc<Connection>> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(other, _)| **other != id)
            .map(|(_, entry)| Arc::clone(&entry.connection))
            .collect()
    }

    /// Current nickname, `None` once the connection is gone
    pub async fn nickname_of(&self, id: ConnectionId) -> Option<String> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.nickname.clone())
    }

    /// Rename a connection
    ///
    /// Names are neither validated nor required to be unique.
    pub async fn set_nickname(&self, id: ConnectionId, nickname: impl Into<String>) {
        if let Some(entry) = self.entries.write().await.get_mut(&id) {
            entry.nickname = nickname.into();
        }
    }

    /// First connection (by registration order) holding `nickname`
    pub async fn find_by_nickname(&self, nickname: &str) -> Option<Arc<Connection>> {
        self.entries
            .read()
            .await
            .values()
            .find(|entry| entry.nickname == nickname)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Number of registered connections
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Watch the chatter count
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Write a message to one connection, removing it if the write fails
    pub async fn send(&self, target: &Connection, message: &ServerMessage) {
        if let Err(e) = target.write(message.to_line().as_bytes()).await {
            if e.is_disconnect() {
                debug!("Connection {} gone: {}", target.id(), e);
            } else {
                warn!("Write to connection {} failed: {}", target.id(), e);
            }
            self.remove(target.id()).await;
        }
    }

    /// Write a message to every target concurrently
    ///
    /// Each failure only removes that target.
    pub async fn broadcast(&self, targets: &[Arc<Connection>], message: &ServerMessage) {
        join_all(targets.iter().map(|target| self.send(target, message))).await;
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn report_chatters(count: usize) {
    match count {
        0 => info!(target: "line_chat::activity", "No chatter connected."),
        1 => info!(target: "line_chat::activity", "You are now 1 chatter."),
        n => info!(target: "line_chat::activity", "You are now {} chatters.", n),
    }
}
