//! Command-line configuration for the server and client binaries

use std::time::Duration;

use clap::Parser;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:6666";

/// Outbound frames buffered per peer before sends start failing
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Seconds to wait for connections to flush at shutdown
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Chatroom server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Socket address to listen on
    #[arg(short, long, default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Frames queued per peer before messages to it are dropped
    #[arg(long, default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,

    /// Seconds to wait for peers to receive the close signal on shutdown
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_secs: u64,
}

/// Chatroom client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Address of the chatroom server
    #[arg(short, long, default_value = DEFAULT_ADDR)]
    pub addr: String,
}

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub outbox_capacity: usize,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            addr: args.addr,
            // a zero-capacity mpsc channel panics
            outbox_capacity: args.outbox_capacity.max(1),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        }
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self { addr: args.addr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config: ServerConfig = ServerArgs::parse_from(["chatroom"]).into();
        assert_eq!(config.addr, "127.0.0.1:6666");
        assert_eq!(config.outbox_capacity, DEFAULT_OUTBOX_CAPACITY);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_server_overrides() {
        let args = ServerArgs::parse_from([
            "chatroom",
            "--addr",
            "0.0.0.0:7000",
            "--outbox-capacity",
            "0",
            "--shutdown-grace-secs",
            "1",
        ]);
        let config = ServerConfig::from(args);
        assert_eq!(config.addr, "0.0.0.0:7000");
        assert_eq!(config.outbox_capacity, 1);
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_client_short_flag() {
        let config: ClientConfig = ClientArgs::parse_from(["chatroom-client", "-a", "10.0.0.2:6666"]).into();
        assert_eq!(config.addr, "10.0.0.2:6666");
    }
}
