//! Peer session
//!
//! Per-connection read loop: every inbound frame is either a command for
//! the router or a chat line. The loop ends on disconnect from either side
//! and always finishes with the (idempotent) disconnect sequence.

use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::channel::FrameReader;
use crate::error::ChannelError;
use crate::message::COMMAND_PREFIX;
use crate::peer::PeerHandle;
use crate::router::{Removal, Router};

/// Read frames from `peer` until its connection ends
pub async fn run_session<R>(peer: PeerHandle, mut reader: FrameReader<R>, router: Router)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = peer.closed() => {
                debug!("Session for {} closed locally", peer.username());
                break;
            }
            frame = reader.receive() => frame,
        };

        match frame {
            Ok(text) => handle_frame(&peer, &text, &router),
            Err(ChannelError::ConnectionClosed) => {
                debug!("{} closed the connection", peer.username());
                break;
            }
            Err(e) => {
                warn!("Failed receiving from {}: {}", peer.username(), e);
                break;
            }
        }
    }

    router.disconnect(&peer, Removal::Unregister);
}

fn handle_frame(peer: &PeerHandle, text: &str, router: &Router) {
    if text.trim().is_empty() {
        return;
    }
    if text.starts_with(COMMAND_PREFIX) {
        router.dispatch(text, peer);
    } else {
        router.broadcast_chat(peer, text);
    }
}
