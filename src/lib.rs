//! Line-oriented TCP Chat Server Library
//!
//! Clients connect with any line-based tool (`nc localhost 8765`), get a
//! `Buddy#<id>` nickname and exchange newline-terminated messages.
//!
//! # Features
//! - Broadcast to everyone else, or target peers with `@nickname`
//! - Dot-commands: `.nick <newName>` and `.shutdown`
//! - Heartbeats that drop silently dead peers
//! - Graceful shutdown that waits for every connection task
//!
//! # Architecture
//! - `ChatServer` owns the listener, accept loop, heartbeat and task tracker
//! - `ConnectionRegistry` is the shared, lock-guarded set of live connections
//! - Each connection gets a `handler` task reading its lines in order
//! - `CommandTable` and `MessageRouter` decide what a line does
//!
//! # Example
//! ```ignore
//! use line_chat::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), line_chat::AppError> {
//!     let server = ChatServer::new(ServerConfig::default());
//!     server.start().await?;
//!     server.stopped().await;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use command::{CommandHandler, CommandResult, CommandTable, Dispatch, COMMAND_PREFIX};
pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{AppError, CommandError, SendError};
pub use handler::handle_connection;
pub use heartbeat::HeartbeatMonitor;
pub use message::ServerMessage;
pub use registry::ConnectionRegistry;
pub use router::MessageRouter;
pub use server::ChatServer;
pub use types::{ConnectionId, ServerState};
