//! Message protocol definitions
//!
//! Client → server frames are plain text: chat, or a `/`-prefixed command
//! parsed into [`Command`]. Server → client frames are rendered from
//! [`ServerMessage`], whose `Display` output is the exact wire text.

use std::fmt;

use crate::channel::MAX_FRAME_LEN;
use crate::error::{CommandError, OversizedFrame, RegistryError, UsernameError};
use crate::types::Username;

/// Prefix that marks a frame as a command
pub const COMMAND_PREFIX: char = '/';

/// Reserved server → client frame meaning "you have been disconnected"
pub const CLOSE_SENTINEL: &str = "/close";

const COLOR_LEAVE: &str = "\x1b[31m";
const COLOR_JOIN: &str = "\x1b[32m";
const COLOR_WHISPER: &str = "\x1b[33m";
const COLOR_SERVER: &str = "\x1b[1;37m";
const COLOR_RESET: &str = "\x1b[m";

/// Client → server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the chat
    Quit,
    /// Private message to one user
    Whisper { to: String, text: String },
    /// List connected users
    List,
    /// Any other `/`-prefixed token
    Unknown(String),
}

impl Command {
    /// Parse a command line
    ///
    /// Splits on whitespace; extra arguments to `/quit` and `/list` are
    /// ignored. The whisper body is every token after the target joined by
    /// single spaces.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else {
            return Ok(Command::Unknown(String::new()));
        };

        match head {
            "/quit" => Ok(Command::Quit),
            "/list" => Ok(Command::List),
            "/whisper" => {
                let to = tokens.next().ok_or(CommandError::MalformedWhisper)?;
                let text = tokens.collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    return Err(CommandError::MalformedWhisper);
                }
                Ok(Command::Whisper {
                    to: to.to_string(),
                    text,
                })
            }
            other => Ok(Command::Unknown(other.to_string())),
        }
    }
}

/// Server → client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Username negotiation prompt
    Prompt,
    /// Requested username is held by a live peer
    NameTaken(String),
    /// Requested username failed validation
    InvalidUsername(UsernameError),
    /// Global chat line
    Chat { from: Username, text: String },
    /// Operator broadcast
    Server(String),
    /// A peer was admitted
    Joined(Username),
    /// A peer disconnected
    Left(Username),
    /// Private message
    Whisper { from: Username, text: String },
    /// Reply to `/list`
    UserList(Vec<Username>),
    /// Whisper target is not connected
    NoSuchUser(String),
    /// `/whisper` used with the wrong argument count
    WhisperUsage,
    /// Unrecognised `/` command
    UnknownCommand(String),
    /// The sender's line could not be delivered in one frame
    MessageTooLong,
    /// Disconnect sentinel
    Close,
}

impl ServerMessage {
    /// Render the wire text for this message
    ///
    /// Fails if the text is longer than one frame can carry.
    pub fn to_frame(&self) -> Result<String, OversizedFrame> {
        let text = self.to_string();
        if text.len() > MAX_FRAME_LEN {
            return Err(OversizedFrame(text.len()));
        }
        Ok(text)
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Prompt => f.write_str("Enter a username: "),
            ServerMessage::NameTaken(name) => writeln!(f, "{name} already exists"),
            ServerMessage::InvalidUsername(err) => writeln!(f, "invalid username: {err}"),
            ServerMessage::Chat { from, text } => writeln!(f, "[{from}]: {text}"),
            ServerMessage::Server(text) => {
                writeln!(f, "{COLOR_SERVER}[SERVER]: {text}{COLOR_RESET}")
            }
            ServerMessage::Joined(name) => {
                writeln!(f, "{COLOR_JOIN}{name} has joined the chat{COLOR_RESET}")
            }
            ServerMessage::Left(name) => {
                writeln!(f, "{COLOR_LEAVE}{name} has left the chat{COLOR_RESET}")
            }
            ServerMessage::Whisper { from, text } => {
                writeln!(f, "{COLOR_WHISPER}{from} has whispered: {text}{COLOR_RESET}")
            }
            ServerMessage::UserList(names) => {
                let names: Vec<&str> = names.iter().map(Username::as_str).collect();
                writeln!(f, "connected users: {}", names.join(" "))
            }
            ServerMessage::NoSuchUser(name) => writeln!(f, "no user with username: {name}"),
            ServerMessage::WhisperUsage => {
                writeln!(f, "whisper with: /whisper <username> <message>")
            }
            ServerMessage::UnknownCommand(token) => writeln!(f, "unknown command: {token}"),
            ServerMessage::MessageTooLong => f.write_str("message too long\n"),
            ServerMessage::Close => f.write_str(CLOSE_SENTINEL),
        }
    }
}

/// Convert registry errors into client notices
impl From<RegistryError> for ServerMessage {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NameTaken(name) => ServerMessage::NameTaken(name.to_string()),
            RegistryError::NotFound(name) => ServerMessage::NoSuchUser(name),
        }
    }
}

impl From<CommandError> for ServerMessage {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::MalformedWhisper => ServerMessage::WhisperUsage,
        }
    }
}

impl From<UsernameError> for ServerMessage {
    fn from(err: UsernameError) -> Self {
        ServerMessage::InvalidUsername(err)
    }
}
