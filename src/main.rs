//! Chatroom Server - Entry Point
//!
//! Binds the listener, starts the operator console on stdin and runs the
//! accept loop until `/close`.

use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatroom::{run_operator_console, ChatServer, ServerArgs, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chatroom=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatroom=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::from(ServerArgs::parse());

    let server = ChatServer::bind(&config).await?;
    info!("Chatroom server listening on {}", server.local_addr()?);

    // Operator console
    let console = BufReader::new(tokio::io::stdin());
    tokio::spawn(run_operator_console(console, server.router(), server.handle()));

    if let Err(e) = server.run().await {
        error!("Server stopped: {}", e);
        // stdin may still be blocked in a read that cannot be cancelled
        std::process::exit(1);
    }

    Ok(())
}
