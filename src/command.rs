//! Dot-command parsing and dispatch
//!
//! A line starting with `.` is a command: `.name arg1 arg2 ...`. Commands
//! live in a `CommandTable` mapping names to handlers that receive the
//! server explicitly, so new commands register the same way the built-ins do.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::message::ServerMessage;
use crate::server::ChatServer;
use crate::types::ConnectionId;

/// First character of every command line
pub const COMMAND_PREFIX: char = '.';

/// Result of a command handler
pub type CommandResult = Result<(), CommandError>;

/// Command handler: `(server, invoker, args) -> future`
pub type CommandHandler = fn(ChatServer, ConnectionId, Vec<String>) -> BoxFuture<'static, CommandResult>;

/// Outcome of dispatching a command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran (successfully or with a usage error)
    Handled,
    /// No command with that name; the line is dropped
    NotHandled,
}

/// Split a command line into its name and arguments
///
/// Returns `None` for lines without the command prefix.
pub fn parse(line: &str) -> Option<(&str, Vec<String>)> {
    let rest = line.strip_prefix(COMMAND_PREFIX)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("");
    Some((name, parts.map(str::to_string).collect()))
}

/// Name → handler mapping, built once at startup
#[derive(Clone, Default)]
pub struct CommandTable {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in `nick` and `shutdown` commands
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.register("nick", nick);
        table.register("shutdown", shutdown);
        table
    }

    /// Register a handler under a case-sensitive name
    pub fn register<S: Into<String>>(&mut self, name: S, handler: CommandHandler) {
        let name = name.into();
        debug!("Registering command: {}", name);
        self.handlers.insert(name, handler);
    }

    /// Whether a command is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run the command on `line` for connection `id`
    ///
    /// Usage errors are written back to the invoker only and still count as
    /// handled.
    pub async fn dispatch(&self, server: &ChatServer, id: ConnectionId, line: &str) -> Dispatch {
        let Some((name, args)) = parse(line) else {
            return Dispatch::NotHandled;
        };
        let Some(handler) = self.handlers.get(name).copied() else {
            debug!("Connection {} sent unknown command '{}'", id, name);
            return Dispatch::NotHandled;
        };

        let nickname = server.registry().nickname_of(id).await.unwrap_or_default();
        let joined = args.join(" ");

        match handler(server.clone(), id, args).await {
            Ok(()) => {
                info!("{} executed command: {} {}", nickname, name, joined);
            }
            Err(e) => {
                warn!("{} failed command {}: {}", nickname, name, e);
                if let Some(conn) = server.registry().get(id).await {
                    server.registry().send(&conn, &ServerMessage::from(e)).await;
                }
            }
        }
        Dispatch::Handled
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

const NICK_USAGE: &str = ".nick <newName>";

/// `.nick <newName>`: announce to the others, rename, confirm to the invoker
fn nick(server: ChatServer, id: ConnectionId, args: Vec<String>) -> BoxFuture<'static, CommandResult> {
    Box::pin(rename(server, id, args))
}

async fn rename(server: ChatServer, id: ConnectionId, args: Vec<String>) -> CommandResult {
    let mut args = args.into_iter();
    let new_nickname = args.next().ok_or(CommandError::MissingArgument {
        argument: "new nickname",
        usage: NICK_USAGE,
    })?;
    if let Some(extra) = args.next() {
        return Err(CommandError::UnexpectedArgument {
            argument: extra,
            usage: NICK_USAGE,
        });
    }

    let registry = server.registry();
    let Some(old_nickname) = registry.nickname_of(id).await else {
        return Ok(());
    };

    // Others hear about it under the old name first
    let others = registry.others(id).await;
    registry
        .broadcast(
            &others,
            &ServerMessage::NicknameChanged {
                old: old_nickname,
                new: new_nickname.clone(),
            },
        )
        .await;
    registry.set_nickname(id, new_nickname).await;

    if let Some(conn) = registry.get(id).await {
        registry.send(&conn, &ServerMessage::Done).await;
    }
    Ok(())
}

/// `.shutdown`: stop the whole server
///
/// `stop` waits for every connection task, including the caller's, so it
/// runs on its own task.
fn shutdown(server: ChatServer, id: ConnectionId, _args: Vec<String>) -> BoxFuture<'static, CommandResult> {
    info!("Shutdown requested by connection {}", id);
    tokio::spawn(async move {
        if let Err(e) = server.stop().await {
            debug!("Shutdown request ignored: {}", e);
        }
    });
    Box::pin(std::future::ready(Ok(())))
}
