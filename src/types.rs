//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: process-unique, monotonically assigned connection identifier
//! - `ServerState`: lifecycle states of the `ChatServer` controller

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique connection identifier (newtype pattern)
///
/// Assigned at accept time and never reused for the lifetime of the process.
/// Ordered so registry iteration follows registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate the next identifier from a shared counter
    pub(crate) fn next(counter: &AtomicU64) -> Self {
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Nickname given to a connection before it picks one with `.nick`
    pub fn default_nickname(&self) -> String {
        format!("Buddy#{}", self.0)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a `ChatServer`
///
/// `Idle -> Starting -> Running -> Stopping -> Stopped`. A stopped server
/// cannot be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
