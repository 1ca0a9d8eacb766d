//! Outbound message catalogue
//!
//! Everything the server writes to a client is one newline-terminated UTF-8
//! line. Only the `From <nickname>: <text>` chat format is meant to be
//! machine-parsed by clients.

use std::fmt;

use crate::error::CommandError;

/// Server → Client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Personal greeting sent right after connecting
    Greeting { nickname: String },
    /// Someone joined the chat
    Entered { nickname: String },
    /// Chat line relayed from another connection
    Chat { from: String, text: String },
    /// Someone renamed themselves
    NicknameChanged { old: String, new: String },
    /// Command completed
    Done,
    /// Command usage error, sent to the invoker only
    Error { message: String },
}

impl ServerMessage {
    /// Render as wire bytes, newline included
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Greeting { nickname } => write!(f, "Hello {}!", nickname),
            ServerMessage::Entered { nickname } => write!(f, "{} just entered.", nickname),
            ServerMessage::Chat { from, text } => write!(f, "From {}: {}", from, text),
            ServerMessage::NicknameChanged { old, new } => {
                write!(f, "{} changed nickname to {}", old, new)
            }
            ServerMessage::Done => f.write_str("Done."),
            ServerMessage::Error { message } => write!(f, "Error: {}", message),
        }
    }
}

/// Convert CommandError to ServerMessage for client notification
impl From<CommandError> for ServerMessage {
    fn from(err: CommandError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_line_format() {
        let msg = ServerMessage::Chat {
            from: "alice".to_string(),
            text: "hi @bob".to_string(),
        };
        assert_eq!(msg.to_line(), "From alice: hi @bob\n");
    }

    #[test]
    fn test_nickname_changed_format() {
        let msg = ServerMessage::NicknameChanged {
            old: "Buddy#3".to_string(),
            new: "carol".to_string(),
        };
        assert_eq!(msg.to_string(), "Buddy#3 changed nickname to carol");
    }

    #[test]
    fn test_command_error_conversion() {
        let msg: ServerMessage = CommandError::UnexpectedArgument {
            argument: "extra".to_string(),
            usage: ".nick <newName>",
        }
        .into();
        assert_eq!(
            msg.to_line(),
            "Error: Unexpected argument 'extra' (usage: .nick <newName>)\n"
        );
    }
}
