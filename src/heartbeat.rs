//! Heartbeat (watchdog)
//!
//! Every tick writes a single zero byte to each registered connection. A
//! connection whose write fails is removed. A connection whose previous
//! heartbeat has not completed yet is skipped. Clients ignore the byte.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;

/// Heartbeat payload
pub const PULSE: &[u8] = &[0];

/// Periodic liveness check over the registry
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    registry: ConnectionRegistry,
    period: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: ConnectionRegistry, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Start ticking until `stop` is cancelled
    ///
    /// Each round runs on its own tracked task so a slow peer never delays
    /// the next tick.
    pub fn spawn(self, tracker: TaskTracker, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick fires immediately
            ticker.tick().await;

            info!("Watch dog timer started.");
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let registry = self.registry.clone();
                        tracker.spawn(async move { beat_all(&registry).await });
                    }
                }
            }
            info!("Watch dog timer stopped.");
        })
    }
}

/// Send a heartbeat to every connection currently registered
///
/// Returns the number of connections removed.
pub async fn beat_all(registry: &ConnectionRegistry) -> usize {
    let connections = registry.connections().await;
    let results = join_all(connections.iter().map(|conn| beat(registry, conn))).await;
    results.into_iter().filter(|removed| *removed).count()
}

async fn beat(registry: &ConnectionRegistry, conn: &Arc<Connection>) -> bool {
    match conn.heartbeat(PULSE).await {
        None => {
            debug!("Heartbeat to connection {} still pending", conn.id());
            false
        }
        Some(Ok(())) => false,
        Some(Err(e)) => {
            debug!("Heartbeat to connection {} failed: {}", conn.id(), e);
            registry.remove(conn.id()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    use crate::message::ServerMessage;
    use crate::router::MessageRouter;

    #[tokio::test]
    async fn test_heartbeat_removes_dead_connection() {
        let registry = ConnectionRegistry::new();
        let (dead_client, dead) = tokio::io::duplex(64);
        let (mut live_client, live) = tokio::io::duplex(64);
        let dead = registry.add(dead).await;
        let live = registry.add(live).await;
        drop(dead_client);

        let removed = beat_all(&registry).await;

        assert_eq!(removed, 1);
        assert!(registry.get(dead.id()).await.is_none());
        assert!(registry.get(live.id()).await.is_some());

        let mut byte = [0xffu8; 1];
        live_client.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte, [0]);
    }

    #[tokio::test]
    async fn test_monitor_detects_dead_connection() {
        let registry = ConnectionRegistry::new();
        let (client, stream) = tokio::io::duplex(64);
        let conn = registry.add(stream).await;
        drop(client);

        let tracker = TaskTracker::new();
        let stop = CancellationToken::new();
        let mut count = registry.subscribe_count();
        let handle = HeartbeatMonitor::new(registry.clone(), Duration::from_millis(10))
            .spawn(tracker.clone(), stop.clone());

        tokio::time::timeout(Duration::from_secs(2), count.wait_for(|n| *n == 0))
            .await
            .unwrap()
            .unwrap();
        assert!(conn.is_closed());

        stop.cancel();
        handle.await.unwrap();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_accumulate_rounds() {
        let registry = ConnectionRegistry::new();
        // one-byte buffer that nobody ever reads
        let (_stalled_client, stalled) = tokio::io::duplex(1);
        let stalled = registry.add(stalled).await;

        let tracker = TaskTracker::new();
        let stop = CancellationToken::new();
        let handle = HeartbeatMonitor::new(registry.clone(), Duration::from_millis(5))
            .spawn(tracker.clone(), stop.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let early = tracker.len();
        tokio::time::sleep(Duration::from_millis(400)).await;
        let late = tracker.len();
        assert!(late <= early + 1, "heartbeat rounds piled up: {} -> {}", early, late);
        assert!(late <= 3, "{} heartbeat rounds in flight", late);
        assert!(registry.get(stalled.id()).await.is_some());

        stop.cancel();
        handle.await.unwrap();
        registry.remove_all().await;
        tracker.close();
        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_skips_connection_removed_by_heartbeat() {
        let registry = ConnectionRegistry::new();
        let router = MessageRouter::new(registry.clone());

        let (_sender_client, sender) = tokio::io::duplex(4096);
        let sender = registry.add(sender).await;
        registry.set_nickname(sender.id(), "alice").await;
        let (live_client, live) = tokio::io::duplex(4096);
        let live = registry.add(live).await;
        let mut live_lines = BufReader::new(live_client).lines();
        let (dead_client, dead) = tokio::io::duplex(4096);
        let dead = registry.add(dead).await;
        drop(dead_client);

        assert_eq!(beat_all(&registry).await, 1);
        assert!(dead.is_closed());

        let others: Vec<_> = registry.others(sender.id()).await.iter().map(|c| c.id()).collect();
        assert_eq!(others, vec![live.id()]);

        router.route(sender.id(), "still here?").await;
        assert_eq!(registry.count().await, 2);

        let line = live_lines.next_line().await.unwrap().unwrap();
        assert_eq!(line.replace('\0', ""), "From alice: still here?");

        registry.send(&live, &ServerMessage::Done).await;
        let line = live_lines.next_line().await.unwrap().unwrap();
        assert_eq!(line.replace('\0', ""), "Done.");
    }
}
