//! Connection handler
//!
//! Handles one accepted TCP connection: username negotiation, the outbound
//! writer task, the join announcement and the peer session.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channel::{self, FrameReader, FrameWriter};
use crate::error::{AppError, ChannelError};
use crate::message::{ServerMessage, CLOSE_SENTINEL};
use crate::peer::{Outbound, PeerHandle};
use crate::registry::Registry;
use crate::router::{Removal, Router};
use crate::session::run_session;
use crate::types::Username;

/// Everything a connection task needs from the server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub router: Router,
    /// Fires when the server starts shutting down
    pub shutdown: CancellationToken,
    /// Tracks writer tasks so shutdown can wait for them to flush
    pub tracker: TaskTracker,
    /// Outbound queue length per peer
    pub outbox_capacity: usize,
}

/// Handle a new TCP connection
pub async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (mut reader, mut writer) = channel::split(stream);

    let negotiated = tokio::select! {
        _ = ctx.shutdown.cancelled() => None,
        negotiated = negotiate(
            &mut reader,
            &mut writer,
            ctx.router.registry(),
            ctx.outbox_capacity,
        ) => Some(negotiated?),
    };

    let Some((peer, outbound)) = negotiated else {
        debug!("Shutdown during negotiation with {}", peer_addr);
        if let Err(e) = writer.send(CLOSE_SENTINEL).await {
            debug!("Failed to send close signal to {}: {}", peer_addr, e);
        }
        if let Err(e) = writer.close().await {
            debug!("Failed to close connection to {}: {}", peer_addr, e);
        }
        return Ok(());
    };

    info!(
        "{} joined as '{}' ({})",
        peer_addr,
        peer.username(),
        peer.id()
    );

    ctx.tracker.spawn(run_writer(writer, outbound, peer.shutdown_token()));

    // Admitted while shutting down: the drain may already have run
    if ctx.shutdown.is_cancelled() {
        ctx.router.disconnect(&peer, Removal::Unregister);
        return Ok(());
    }

    ctx.router.announce_join(&peer);
    run_session(peer, reader, ctx.router).await;

    Ok(())
}

/// Prompt for usernames until one is valid and free
///
/// The returned handle is already in the registry.
pub async fn negotiate<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    registry: &Registry,
    capacity: usize,
) -> Result<(PeerHandle, mpsc::Receiver<Outbound>), ChannelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        writer.send(ServerMessage::Prompt.to_frame()?).await?;
        let candidate = reader.receive().await?;

        let username = match Username::parse(&candidate) {
            Ok(username) => username,
            Err(e) => {
                debug!("Rejected username {:?}: {}", candidate, e);
                writer.send(ServerMessage::from(e).to_frame()?).await?;
                continue;
            }
        };

        let (peer, outbound) = PeerHandle::new(username, capacity);
        match registry.try_register(peer.clone()) {
            Ok(()) => return Ok((peer, outbound)),
            Err(e) => {
                debug!("Negotiation retry: {}", e);
                writer.send(ServerMessage::from(e).to_frame()?).await?;
            }
        }
    }
}

/// Time a closing peer gets to take its remaining frames
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Drain a peer's outbound queue into its socket
///
/// Ends on `Outbound::Close`, when every handle is dropped, or on a write
/// failure. Once `shutdown` fires the remaining frames get
/// [`CLOSE_FLUSH_TIMEOUT`] to go out; a peer that is not reading by then
/// has its write side dropped unflushed. Always fires `shutdown` on exit
/// so the session stops reading.
pub async fn run_writer<W>(
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let finished = tokio::select! {
        result = drain_outbound(&mut writer, &mut outbound) => Some(result),
        _ = shutdown.cancelled() => None,
    };

    let result = match finished {
        Some(result) => result,
        None => match tokio::time::timeout(
            CLOSE_FLUSH_TIMEOUT,
            drain_outbound(&mut writer, &mut outbound),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("Peer stopped reading, dropping its connection");
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        warn!("Write failed, ending writer task: {}", e);
    }
    shutdown.cancel();
    debug!("Writer task ended");
}

/// Write queued frames until `Close` or the end of the queue, then close
async fn drain_outbound<W>(
    writer: &mut FrameWriter<W>,
    outbound: &mut mpsc::Receiver<Outbound>,
) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(text) => match writer.send(text).await {
                Ok(()) => {}
                // Nothing was written, the stream is still intact
                Err(ChannelError::FrameTooLarge(len)) => {
                    warn!("Dropped a {} byte frame", len);
                }
                Err(e) => return Err(e),
            },
            Outbound::Close => break,
        }
    }
    writer.close().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_negotiation_reprompts_on_collision() {
        let registry = Registry::new();
        let (alice, _rx) = PeerHandle::new(Username::parse("alice").unwrap(), 4);
        registry.try_register(alice).unwrap();

        let (client, server) = tokio::io::duplex(1024);
        let (mut client_reader, mut client_writer) = channel::split(client);
        let (mut server_reader, mut server_writer) = channel::split(server);

        let client = async {
            assert_eq!(client_reader.receive().await.unwrap(), "Enter a username: ");
            client_writer.send("alice").await.unwrap();
            assert_eq!(client_reader.receive().await.unwrap(), "alice already exists\n");
            assert_eq!(client_reader.receive().await.unwrap(), "Enter a username: ");
            client_writer.send("bad name").await.unwrap();
            assert_eq!(
                client_reader.receive().await.unwrap(),
                "invalid username: username cannot contain whitespace\n"
            );
            assert_eq!(client_reader.receive().await.unwrap(), "Enter a username: ");
            client_writer.send("bob").await.unwrap();
        };
        let server = negotiate(&mut server_reader, &mut server_writer, &registry, 4);

        let ((), result) = timeout(Duration::from_secs(1), async { tokio::join!(client, server) })
            .await
            .unwrap();
        let (peer, _outbound) = result.unwrap();

        assert_eq!(peer.username().as_str(), "bob");
        assert_eq!(registry.usernames().len(), 2);
    }

    #[tokio::test]
    async fn test_negotiation_fails_when_client_leaves() {
        let registry = Registry::new();
        let (client, server) = tokio::io::duplex(1024);
        let (mut server_reader, mut server_writer) = channel::split(server);
        drop(client);

        let result = negotiate(&mut server_reader, &mut server_writer, &registry, 4).await;
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_writer_flushes_then_closes() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut client_reader, _client_writer) = channel::split(client);
        let (_server_reader, server_writer) = channel::split(server);

        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        tx.send(Outbound::Frame("/close".to_string())).await.unwrap();
        tx.send(Outbound::Close).await.unwrap();

        run_writer(server_writer, rx, token.clone()).await;

        assert!(token.is_cancelled());
        assert_eq!(client_reader.receive().await.unwrap(), "/close");
        assert!(matches!(
            client_reader.receive().await,
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_skips_frame_too_large() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut client_reader, _client_writer) = channel::split(client);
        let (_server_reader, server_writer) = channel::split(server);

        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let writer = tokio::spawn(run_writer(server_writer, rx, token.clone()));

        tx.send(Outbound::Frame("x".repeat(channel::MAX_FRAME_LEN + 1)))
            .await
            .unwrap();
        tx.send(Outbound::Frame("still connected".to_string()))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(1), client_reader.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, "still connected");
        assert!(!token.is_cancelled());

        drop(tx);
        timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_drops_stalled_writer() {
        let router = Router::new(std::sync::Arc::new(Registry::new()));
        let (peer, outbound) = PeerHandle::new(Username::parse("slow").unwrap(), 16);
        router.registry().try_register(peer.clone()).unwrap();

        // The client side never reads, so writes stall once the buffer fills
        let (_client, server) = tokio::io::duplex(64);
        let (_server_reader, server_writer) = channel::split(server);
        let writer = tokio::spawn(run_writer(server_writer, outbound, peer.shutdown_token()));

        for _ in 0..4 {
            peer.send(&ServerMessage::Server("x".repeat(100))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        router.disconnect(&peer, Removal::Unregister);

        assert!(!router.registry().contains("slow"));
        timeout(CLOSE_FLUSH_TIMEOUT * 3, writer)
            .await
            .expect("writer still blocked after disconnect")
            .unwrap();
    }
}
