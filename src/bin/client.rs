//! Chatroom Client - Entry Point

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatroom::{client, ClientArgs, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they never interleave with chat output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatroom=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from(ClientArgs::parse());

    if let Err(e) = client::run(&config).await {
        eprintln!("chatroom-client: {e}");
        std::process::exit(1);
    }

    Ok(())
}
