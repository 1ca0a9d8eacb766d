//! ChatServer controller
//!
//! Owns the listening socket, the accept loop, the heartbeat and the set of
//! in-flight connection handlers, and sequences startup and shutdown:
//! `Idle -> Starting -> Running -> Stopping -> Stopped`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::command::CommandTable;
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::types::ServerState;

/// Pause between failed `accept` calls
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Resources that only exist while running
#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    accept_stop: CancellationToken,
    accept_loop: JoinHandle<()>,
    heartbeat_stop: CancellationToken,
    heartbeat: JoinHandle<()>,
}

#[derive(Debug)]
struct Inner {
    config: ServerConfig,
    registry: ConnectionRegistry,
    commands: CommandTable,
    state: watch::Sender<ServerState>,
    running: Mutex<Option<Running>>,
    tracker: TaskTracker,
}

/// The chat server
///
/// Cheap to clone; command handlers receive a clone as their context.
#[derive(Debug, Clone)]
pub struct ChatServer {
    inner: Arc<Inner>,
}

impl ChatServer {
    /// Create an idle server with the built-in commands
    pub fn new(config: ServerConfig) -> Self {
        Self::with_commands(config, CommandTable::builtin())
    }

    /// Create an idle server with a custom command table
    pub fn with_commands(config: ServerConfig, commands: CommandTable) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: ConnectionRegistry::new(),
                commands,
                state,
                running: Mutex::new(None),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn commands(&self) -> &CommandTable {
        &self.inner.commands
    }

    /// Router over this server's registry
    pub fn router(&self) -> MessageRouter {
        MessageRouter::new(self.inner.registry.clone())
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Bound address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Resolves once the server reaches `Stopped`
    pub async fn stopped(&self) {
        let mut state = self.inner.state.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }

    /// Atomically move `from -> to`, returning the state actually seen
    fn transition(&self, from: ServerState, to: ServerState) -> Result<(), ServerState> {
        let mut seen = from;
        self.inner.state.send_if_modified(|state| {
            seen = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if seen == from {
            Ok(())
        } else {
            Err(seen)
        }
    }

    /// Bind the listener, start the heartbeat and the accept loop
    ///
    /// Returns the bound address. Bind failure puts the server back to `Idle`.
    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        self.transition(ServerState::Idle, ServerState::Starting)
            .map_err(AppError::AlreadyStarted)?;

        let addr = self.inner.config.bind_addr();
        info!("Trying to bind port {}…", addr.port());
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.inner.state.send_replace(ServerState::Idle);
                return Err(AppError::Bind { addr, source });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(e) => {
                self.inner.state.send_replace(ServerState::Idle);
                return Err(e.into());
            }
        };

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = HeartbeatMonitor::new(
            self.inner.registry.clone(),
            self.inner.config.heartbeat_interval,
        )
        .spawn(self.inner.tracker.clone(), heartbeat_stop.clone());

        let accept_stop = CancellationToken::new();
        let accept_loop = tokio::spawn(accept_loop(self.clone(), listener, accept_stop.clone()));

        *self.inner.running.lock().await = Some(Running {
            local_addr,
            accept_stop,
            accept_loop,
            heartbeat_stop,
            heartbeat,
        });
        self.inner.state.send_replace(ServerState::Running);

        info!("Chat server started on {}.", local_addr);
        info!("Please type to connect: nc localhost {}.", local_addr.port());
        Ok(local_addr)
    }

    /// Shut everything down and wait for every connection task to exit
    ///
    /// Only the first call after `start` does anything; later or early calls
    /// return `NotRunning`.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.transition(ServerState::Running, ServerState::Stopping)
            .map_err(AppError::NotRunning)?;
        info!("Chat server shutdown incoming…");

        let running = self.inner.running.lock().await.take();
        let Some(running) = running else {
            self.inner.state.send_replace(ServerState::Stopped);
            return Ok(());
        };

        running.heartbeat_stop.cancel();
        if let Err(e) = running.heartbeat.await {
            warn!("Heartbeat task failed: {}", e);
        }

        self.inner.registry.remove_all().await;

        running.accept_stop.cancel();
        if let Err(e) = running.accept_loop.await {
            warn!("Accept loop failed: {}", e);
        }

        // connections accepted while the loop was winding down
        self.inner.registry.remove_all().await;

        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        self.inner.state.send_replace(ServerState::Stopped);
        info!("Chat server stopped.");
        Ok(())
    }
}

/// Accept connections until `stop` is cancelled, then drop the listener
async fn accept_loop(server: ChatServer, listener: TcpListener, stop: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let (reader, writer) = stream.into_split();
                let conn = server.registry().add(writer).await;
                debug!("Connection {} accepted from {}", conn.id(), peer);
                server
                    .inner
                    .tracker
                    .spawn(handle_connection(server.clone(), conn, reader));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                if back_off(&stop).await {
                    break;
                }
            }
        }
    }

    drop(listener);
    debug!("Listener closed");
}

/// Pause after an accept error so a persistent failure (e.g. out of file
/// descriptors) does not spin. Returns `true` if `stop` fired meanwhile.
async fn back_off(stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => true,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Instant;

    fn local_config() -> ServerConfig {
        ServerConfig::default()
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let server = ChatServer::new(local_config());
        assert_eq!(server.state(), ServerState::Idle);

        let addr = server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert_eq!(server.local_addr().await, Some(addr));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().await.is_none());
        server.stopped().await;
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let server = ChatServer::new(local_config());
        assert!(matches!(
            server.stop().await,
            Err(AppError::NotRunning(ServerState::Idle))
        ));

        server.start().await.unwrap();
        server.stop().await.unwrap();
        assert!(matches!(
            server.stop().await,
            Err(AppError::NotRunning(ServerState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_not_restartable() {
        let server = ChatServer::new(local_config());
        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(AppError::AlreadyStarted(ServerState::Running))
        ));
        server.stop().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(AppError::AlreadyStarted(ServerState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let first = ChatServer::new(local_config());
        let addr = first.start().await.unwrap();

        let second = ChatServer::new(local_config().with_port(addr.port()));
        assert!(matches!(second.start().await, Err(AppError::Bind { .. })));
        assert_eq!(second.state(), ServerState::Idle);

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_error_backs_off() {
        let stop = CancellationToken::new();

        let started = Instant::now();
        assert!(!back_off(&stop).await);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);

        stop.cancel();
        let started = Instant::now();
        assert!(back_off(&stop).await);
        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }
}
