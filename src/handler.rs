//! Per-connection handler
//!
//! Runs for the whole lifetime of one client: announces it, greets it,
//! then feeds every input line to the command table or the router until
//! the stream ends, fails, or the registry closes the connection.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::command::{Dispatch, COMMAND_PREFIX};
use crate::connection::Connection;
use crate::error::is_disconnect;
use crate::message::ServerMessage;
use crate::server::ChatServer;

/// Handle a registered connection
///
/// Lines from one connection are processed strictly in order. On return the
/// connection is no longer registered.
pub async fn handle_connection<R>(server: ChatServer, conn: Arc<Connection>, reader: R)
where
    R: AsyncRead + Unpin,
{
    let id = conn.id();
    let registry = server.registry();

    if let Some(nickname) = registry.nickname_of(id).await {
        info!(target: "line_chat::activity", "{} just entered.", nickname);
        let others = registry.others(id).await;
        registry
            .broadcast(
                &others,
                &ServerMessage::Entered {
                    nickname: nickname.clone(),
                },
            )
            .await;
        registry.send(&conn, &ServerMessage::Greeting { nickname }).await;
    }

    let codec = LinesCodec::new_with_max_length(server.config().max_line_length);
    let mut lines = FramedRead::new(reader, codec);

    loop {
        let next = tokio::select! {
            _ = conn.closed() => {
                debug!("Connection {} closed by server", id);
                break;
            }
            next = lines.next() => next,
        };

        match next {
            Some(Ok(line)) => process_line(&server, &conn, &line).await,
            Some(Err(LinesCodecError::Io(e))) if is_disconnect(&e) => {
                debug!("Connection {} dropped: {}", id, e);
                break;
            }
            Some(Err(e)) => {
                warn!("Read from connection {} failed: {}", id, e);
                break;
            }
            None => {
                debug!("Connection {} reached end of stream", id);
                break;
            }
        }
    }

    registry.remove(id).await;
}

/// Route one input line
async fn process_line(server: &ChatServer, conn: &Connection, line: &str) {
    if line.starts_with(COMMAND_PREFIX) {
        if server.commands().dispatch(server, conn.id(), line).await == Dispatch::NotHandled {
            debug!("Ignoring command line from connection {}: {}", conn.id(), line);
        }
        return;
    }

    server.router().route(conn.id(), line).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_greeting_then_chat_then_disconnect() {
        let server = ChatServer::new(ServerConfig::default());
        let registry = server.registry().clone();

        let (bob_client, bob_stream) = tokio::io::duplex(4096);
        let bob = registry.add(bob_stream).await;
        registry.set_nickname(bob.id(), "bob").await;
        let mut bob_lines = BufReader::new(bob_client).lines();

        let (alice_client, alice_stream) = tokio::io::duplex(4096);
        let (alice_read, alice_write) = tokio::io::split(alice_stream);
        let alice = registry.add(alice_write).await;
        let (client_read, mut client_write) = tokio::io::split(alice_client);
        let mut alice_lines = BufReader::new(client_read).lines();

        let task = tokio::spawn(handle_connection(server.clone(), Arc::clone(&alice), alice_read));

        let entered = format!("Buddy#{} just entered.", alice.id());
        assert_eq!(bob_lines.next_line().await.unwrap().unwrap(), entered);
        let greeting = format!("Hello Buddy#{}!", alice.id());
        assert_eq!(alice_lines.next_line().await.unwrap().unwrap(), greeting);

        client_write.write_all(b"hi there\r\n").await.unwrap();
        let expected = format!("From Buddy#{}: hi there", alice.id());
        assert_eq!(bob_lines.next_line().await.unwrap().unwrap(), expected);

        client_write.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(registry.get(alice.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_removal_ends_handler() {
        let server = ChatServer::new(ServerConfig::default());
        let registry = server.registry().clone();

        let (_client, stream) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(stream);
        let conn = registry.add(write).await;

        let task = tokio::spawn(handle_connection(server.clone(), Arc::clone(&conn), read));
        registry.remove(conn.id()).await;

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
