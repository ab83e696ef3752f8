//! ChatServer control loop
//!
//! Owns the listening socket and the server lifecycle:
//! `Starting → Accepting → ShuttingDown → Stopped`. Each accepted
//! connection runs in its own task; shutdown disconnects every peer and
//! waits briefly for their close signals to flush.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnectionContext};
use crate::error::AppError;
use crate::registry::Registry;
use crate::router::{Removal, Router};

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Accepting,
    ShuttingDown,
    Stopped,
}

/// Remote control for a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<ServerState>,
}

impl ServerHandle {
    /// Begin shutdown (the operator `/close` command)
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Wait until the server has fully stopped
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // An error means the server was dropped, which also means stopped
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }
}

/// The chatroom server
pub struct ChatServer {
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    state: watch::Sender<ServerState>,
    tracker: TaskTracker,
    outbox_capacity: usize,
    shutdown_grace: Duration,
}

impl ChatServer {
    /// Bind the listening socket
    pub async fn bind(config: &ServerConfig) -> Result<Self, AppError> {
        let listener = TcpListener::bind(&config.addr)
            .await
            .map_err(|source| AppError::Bind {
                addr: config.addr.clone(),
                source,
            })?;
        let (state, _) = watch::channel(ServerState::Starting);

        Ok(Self {
            listener,
            router: Router::new(Arc::new(Registry::new())),
            shutdown: CancellationToken::new(),
            state,
            tracker: TaskTracker::new(),
            outbox_capacity: config.outbox_capacity,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Router shared with the operator console
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Accept connections until shutdown or a fatal accept failure
    pub async fn run(self) -> Result<(), AppError> {
        let ChatServer {
            listener,
            router,
            shutdown,
            state,
            tracker,
            outbox_capacity,
            shutdown_grace,
        } = self;

        let ctx = ConnectionContext {
            router: router.clone(),
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            outbox_capacity,
        };

        state.send_replace(ServerState::Accepting);
        info!("Accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let ctx = ctx.clone();
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                debug!("Connection {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed accepting incoming connection: {}", e);
                        // Stop connection tasks that are still negotiating
                        shutdown.cancel();
                        tracker.close();
                        state.send_replace(ServerState::Stopped);
                        return Err(AppError::Accept(e));
                    }
                },
            }
        }

        state.send_replace(ServerState::ShuttingDown);
        info!("Server shutting down");

        let peers = router.registry().drain();
        info!("Disconnecting {} peers", peers.len());
        for peer in &peers {
            router.disconnect(peer, Removal::AlreadyRemoved);
        }

        drop(listener);

        tracker.close();
        if tokio::time::timeout(shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} connection tasks still running after {:?}",
                tracker.len(),
                shutdown_grace
            );
        }

        state.send_replace(ServerState::Stopped);
        info!("Server terminated");
        Ok(())
    }
}
