//! Operator console
//!
//! Reads the server's local input: `/close` shuts the server down, other
//! `/` commands are rejected, anything else is broadcast as a server
//! message.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::message::{CLOSE_SENTINEL, COMMAND_PREFIX};
use crate::router::Router;
use crate::server::ServerHandle;

/// Notice printed for unsupported operator commands
pub const OPERATOR_USAGE: &str = "only \"/close\" command is available to the server";

/// Notice printed when a broadcast does not fit in a frame
pub const OPERATOR_TOO_LONG: &str = "message too long to broadcast";

/// One line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Shut the server down
    Close,
    /// A `/` command other than `/close`
    Rejected(String),
    /// Text to broadcast
    Broadcast(String),
    /// Blank line
    Empty,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        if line == CLOSE_SENTINEL {
            OperatorCommand::Close
        } else if line.starts_with(COMMAND_PREFIX) {
            OperatorCommand::Rejected(line.to_string())
        } else if line.trim().is_empty() {
            OperatorCommand::Empty
        } else {
            OperatorCommand::Broadcast(line.to_string())
        }
    }
}

/// Run the console until `/close` or end of input
pub async fn run_operator_console<R>(input: R, router: Router, server: ServerHandle)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Operator input closed; server keeps running");
                return;
            }
            Err(e) => {
                warn!("Failed reading operator input: {}", e);
                return;
            }
        };

        match OperatorCommand::parse(&line) {
            OperatorCommand::Close => {
                info!("Operator requested shutdown");
                server.close();
                return;
            }
            OperatorCommand::Rejected(_) => println!("{OPERATOR_USAGE}"),
            OperatorCommand::Broadcast(text) => {
                if let Err(e) = router.broadcast_server(&text) {
                    warn!("Operator broadcast not sent: {}", e);
                    println!("{OPERATOR_TOO_LONG}");
                }
            }
            OperatorCommand::Empty => {}
        }
    }
}
