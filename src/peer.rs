//! Peer handle definition
//!
//! The server-side view of one admitted client: its username, connection
//! id, outbound queue and closed flag. Handles are cheap to clone; every
//! clone refers to the same peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::message::{ServerMessage, CLOSE_SENTINEL};
use crate::types::{ConnectionId, Username};

/// Item on a peer's outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One text frame to write
    Frame(String),
    /// Flush and shut down the write side
    Close,
}

/// Connected peer information
#[derive(Debug, Clone)]
pub struct PeerHandle {
    inner: Arc<PeerInner>,
}

#[derive(Debug)]
struct PeerInner {
    /// Unique identifier for this connection
    id: ConnectionId,
    /// Username assigned at negotiation
    username: Username,
    /// Server → client frame queue, drained by the writer task
    sender: mpsc::Sender<Outbound>,
    /// Set once by whoever runs the disconnect sequence
    closed: AtomicBool,
    /// Fires when the peer should stop reading
    shutdown: CancellationToken,
}

impl PeerHandle {
    /// Create a handle and the receiving end of its outbound queue
    pub fn new(username: Username, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let handle = Self {
            inner: Arc::new(PeerInner {
                id: ConnectionId::new(),
                username,
                sender,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn username(&self) -> &Username {
        &self.inner.username
    }

    /// Queue a message for this peer
    ///
    /// Never waits: a closed peer, a full queue or a message too long for
    /// one frame is reported as an error.
    pub fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        self.send_frame(msg.to_frame()?)
    }

    /// Queue already rendered wire text
    pub(crate) fn send_frame(&self, frame: String) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::ChannelClosed);
        }
        self.enqueue(Outbound::Frame(frame))
    }

    /// Check if the disconnect sequence has started for this peer
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until the peer's connection is being torn down
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Token that fires when the peer is closed
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Claim the disconnect sequence
    ///
    /// Returns true for exactly one caller.
    pub(crate) fn begin_close(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::AcqRel)
    }

    /// Queue the disconnect sentinel, bypassing the closed check
    pub(crate) fn send_close_signal(&self) -> Result<(), SendError> {
        self.enqueue(Outbound::Frame(CLOSE_SENTINEL.to_string()))
    }

    /// Ask the writer to shut down and stop the reader
    pub(crate) fn close_channel(&self) -> Result<(), SendError> {
        let queued = self.enqueue(Outbound::Close);
        self.inner.shutdown.cancel();
        queued
    }

    fn enqueue(&self, item: Outbound) -> Result<(), SendError> {
        self.inner.sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, capacity: usize) -> (PeerHandle, mpsc::Receiver<Outbound>) {
        PeerHandle::new(Username::parse(name).unwrap(), capacity)
    }

    #[test]
    fn test_send_queues_rendered_frame() {
        let (handle, mut rx) = peer("alice", 4);
        handle
            .send(&ServerMessage::Server("hi".to_string()))
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame("\x1b[1;37m[SERVER]: hi\x1b[m\n".to_string())
        );
    }

    #[test]
    fn test_full_queue_is_soft_failure() {
        let (handle, _rx) = peer("alice", 1);
        handle.send(&ServerMessage::Prompt).unwrap();
        assert_eq!(
            handle.send(&ServerMessage::Prompt),
            Err(SendError::QueueFull)
        );
    }

    #[test]
    fn test_oversized_message_is_not_queued() {
        let (handle, mut rx) = peer("alice", 4);
        let msg = ServerMessage::Server("x".repeat(crate::channel::MAX_FRAME_LEN));

        assert!(matches!(handle.send(&msg), Err(SendError::Oversized(_))));
        assert!(rx.try_recv().is_err());
        handle.send(&ServerMessage::Prompt).unwrap();
    }

    #[test]
    fn test_dropped_writer_reports_closed() {
        let (handle, rx) = peer("alice", 4);
        drop(rx);
        assert_eq!(
            handle.send(&ServerMessage::Prompt),
            Err(SendError::ChannelClosed)
        );
    }

    #[test]
    fn test_begin_close_claims_once() {
        let (handle, _rx) = peer("alice", 4);
        let clone = handle.clone();

        assert!(handle.begin_close());
        assert!(!clone.begin_close());
        assert!(clone.is_closed());
        assert_eq!(
            clone.send(&ServerMessage::Prompt),
            Err(SendError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn test_close_channel_queues_sentinel_then_close() {
        let (handle, mut rx) = peer("alice", 4);
        assert!(handle.begin_close());
        handle.send_close_signal().unwrap();
        handle.close_channel().unwrap();

        // resolves immediately once cancelled
        handle.closed().await;
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Frame("/close".to_string()))
        );
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }
}
