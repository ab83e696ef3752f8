//! Multi-user TCP Chatroom Library
//!
//! A chatroom server and client that exchange length-prefixed UTF-8 text
//! frames over TCP.
//!
//! # Features
//! - Username negotiation with re-prompt on collision
//! - Global chat, `/whisper`, `/list` and `/quit`
//! - Operator broadcasts and `/close` shutdown from the server console
//! - Orderly disconnect: the `/close` sentinel, then a departure notice
//!
//! # Architecture
//! - `Registry` is a single-mutex username → `PeerHandle` map
//! - `Router` decides fan-out from point-in-time registry snapshots
//! - Each connection has a session task (reads) and a writer task
//!   (drains the peer's outbound queue), so no lock is ever held
//!   across socket I/O
//!
//! # Example
//! ```ignore
//! use chatroom::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind(&ServerConfig::default()).await.unwrap();
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         handle.close();
//!     });
//!
//!     server.run().await.unwrap();
//! }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod operator;
pub mod peer;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use channel::{FrameCodec, FrameReader, FrameWriter, MAX_FRAME_LEN};
pub use config::{ClientArgs, ClientConfig, ServerArgs, ServerConfig};
pub use error::{
    AppError, ChannelError, CommandError, OversizedFrame, RegistryError, SendError, UsernameError,
};
pub use message::{Command, ServerMessage, CLOSE_SENTINEL};
pub use operator::{run_operator_console, OperatorCommand};
pub use peer::{Outbound, PeerHandle};
pub use registry::Registry;
pub use router::{Removal, Router};
pub use server::{ChatServer, ServerHandle, ServerState};
pub use types::{ConnectionId, Username};
