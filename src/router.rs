//! Chat message routing
//!
//! Decides who receives a plain (non-command) chat line: the connections
//! named by `@mentions` if any resolve, everyone but the sender otherwise.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::message::ServerMessage;
use crate::registry::ConnectionRegistry;
use crate::types::ConnectionId;

/// `@` followed by one or more ASCII word characters
static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("mention pattern is valid"));

/// Extract mentioned nicknames in order of appearance, duplicates included
pub fn mentions(line: &str) -> Vec<&str> {
    MENTION
        .captures_iter(line)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Routes chat lines through the registry
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Connections named by the mentions in `line`
    ///
    /// Unresolved mentions are ignored. A connection mentioned more than
    /// once is listed once. Self-mentions are not filtered out.
    async fn mentioned(&self, line: &str) -> Vec<Arc<Connection>> {
        let mut targets: Vec<Arc<Connection>> = Vec::new();
        for nickname in mentions(line) {
            let Some(conn) = self.registry.find_by_nickname(nickname).await else {
                debug!("Unresolved mention @{}", nickname);
                continue;
            };
            if !targets.iter().any(|t| t.id() == conn.id()) {
                targets.push(conn);
            }
        }
        targets
    }

    /// Deliver a chat line as `From <nickname>: <line>`
    ///
    /// Lines from connections no longer registered are dropped.
    pub async fn route(&self, sender: ConnectionId, line: &str) {
        let Some(nickname) = self.registry.nickname_of(sender).await else {
            debug!("Dropping line from removed connection {}", sender);
            return;
        };

        let mut targets = self.mentioned(line).await;
        if targets.is_empty() {
            info!(target: "line_chat::activity", "{} said to all: {}", nickname, line);
            targets = self.registry.others(sender).await;
        } else {
            let mut names = Vec::with_capacity(targets.len());
            for target in &targets {
                if let Some(name) = self.registry.nickname_of(target.id()).await {
                    names.push(name);
                }
            }
            info!(target: "line_chat::activity", "{} said to {}: {}", nickname, names.join(", "), line);
        }

        let message = ServerMessage::Chat {
            from: nickname,
            text: line.to_string(),
        };
        self.registry.broadcast(&targets, &message).await;
    }
}
