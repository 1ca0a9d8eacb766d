//! Connection handle
//!
//! Write side of an accepted client stream plus its identifier. The read side
//! stays with the per-connection handler task, which watches `closed()` to
//! learn that the registry dropped the connection.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SendError;
use crate::types::ConnectionId;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Live client connection
///
/// Writes are serialized through a mutex so each one reaches the peer
/// whole. Once closed, every pending and future write fails with
/// `SendError::Closed`.
pub struct Connection {
    id: ConnectionId,
    writer: Mutex<Option<BoxedWriter>>,
    closed: CancellationToken,
    heartbeat_pending: AtomicBool,
}

/// Clears the in-flight heartbeat flag, even if the write future is dropped
struct HeartbeatPending<'a>(&'a AtomicBool);

impl Drop for HeartbeatPending<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Connection {
    /// Wrap the write half of a stream
    pub fn new<W>(id: ConnectionId, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            writer: Mutex::new(Some(Box::new(writer))),
            closed: CancellationToken::new(),
            heartbeat_pending: AtomicBool::new(false),
        }
    }

    /// Identifier assigned at accept time
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Write a blob of bytes and flush it
    pub async fn write(&self, bytes: &[u8]) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = self.closed.cancelled() => return Err(SendError::Closed),
        };
        let Some(writer) = guard.as_mut() else {
            return Err(SendError::Closed);
        };

        tokio::select! {
            result = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => result.map_err(SendError::Io),
            _ = self.closed.cancelled() => Err(SendError::Closed),
        }
    }

    /// Write a heartbeat
    ///
    /// Returns `None` without writing while an earlier heartbeat is still
    /// pending, so a peer that stopped reading holds at most one.
    pub async fn heartbeat(&self, bytes: &[u8]) -> Option<Result<(), SendError>> {
        if self.heartbeat_pending.swap(true, Ordering::AcqRel) {
            return None;
        }
        let _pending = HeartbeatPending(&self.heartbeat_pending);
        Some(self.write(bytes).await)
    }

    /// Mark as closed without touching the stream
    ///
    /// Wakes the reader and fails in-flight writes.
    pub(crate) fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Close the stream, swallowing shutdown errors
    pub async fn close(&self) {
        self.mark_closed();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of connection {} failed: {}", self.id, e);
            }
        }
    }

    /// Whether `close` has been requested
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
