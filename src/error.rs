//! Error types for the chat server
//!
//! Defines server lifecycle errors, connection write errors and command
//! usage errors. Uses thiserror for ergonomic error definitions.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::types::ServerState;

/// Application-level errors
///
/// Only `Bind` is fatal; the rest report misuse of the controller.
#[derive(Debug, Error)]
pub enum AppError {
    /// Listening socket could not be bound (fatal)
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `stop` called while the server is not running
    #[error("Server is not running (state: {0})")]
    NotRunning(ServerState),

    /// `start` called on a server that already left the idle state
    #[error("Server cannot be started (state: {0})")]
    AlreadyStarted(ServerState),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Connection write errors
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection was already closed by the server
    #[error("Connection closed")]
    Closed,

    /// The underlying transport rejected the write
    #[error("Write failed: {0}")]
    Io(#[from] io::Error),
}

impl SendError {
    /// Whether this failure just means the peer is gone
    pub fn is_disconnect(&self) -> bool {
        match self {
            SendError::Closed => true,
            SendError::Io(err) => is_disconnect(err),
        }
    }
}

/// Command usage errors
///
/// Reported back to the invoking connection only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// A required argument was not supplied
    #[error("Missing {argument} (usage: {usage})")]
    MissingArgument {
        argument: &'static str,
        usage: &'static str,
    },

    /// More arguments than the command accepts
    #[error("Unexpected argument '{argument}' (usage: {usage})")]
    UnexpectedArgument {
        argument: String,
        usage: &'static str,
    },
}

/// Classify IO errors that mean the peer already went away
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(is_disconnect(&io::ErrorKind::BrokenPipe.into()));
        assert!(is_disconnect(&io::ErrorKind::ConnectionReset.into()));
        assert!(!is_disconnect(&io::ErrorKind::InvalidData.into()));
        assert!(SendError::Closed.is_disconnect());
        assert!(!SendError::Io(io::ErrorKind::PermissionDenied.into()).is_disconnect());
    }

    #[test]
    fn test_command_error_message() {
        let err = CommandError::MissingArgument {
            argument: "new nickname",
            usage: ".nick <newName>",
        };
        assert_eq!(err.to_string(), "Missing new nickname (usage: .nick <newName>)");
    }
}
