//! Router
//!
//! Applies command semantics and broadcast fan-out on top of the registry.
//! All delivery is a non-blocking enqueue onto each recipient's outbound
//! queue, so routing never waits on a slow peer and never holds the
//! registry lock while sending.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{OversizedFrame, SendError};
use crate::message::{Command, ServerMessage};
use crate::peer::PeerHandle;
use crate::registry::Registry;

/// Whether the disconnect sequence should remove the registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Remove the peer's own entry (quit, read failure)
    Unregister,
    /// The registry was already emptied in bulk (shutdown)
    AlreadyRemoved,
}

/// Message router shared by every session
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Relay a chat line to everyone except its sender
    ///
    /// A line too long to relay goes to nobody; the sender is told instead.
    pub fn broadcast_chat(&self, from: &PeerHandle, text: &str) {
        let msg = ServerMessage::Chat {
            from: from.username().clone(),
            text: text.to_string(),
        };
        if let Err(e) = self.broadcast_except(Some(from), &msg) {
            debug!("Chat line from {} not relayed: {}", from.username(), e);
            self.notify(from, &ServerMessage::MessageTooLong);
            return;
        }
        echo(&msg);
    }

    /// Send an operator message to every peer
    pub fn broadcast_server(&self, text: &str) -> Result<(), OversizedFrame> {
        let msg = ServerMessage::Server(text.to_string());
        self.broadcast_except(None, &msg)
    }

    /// Tell everyone else that `peer` was admitted
    pub fn announce_join(&self, peer: &PeerHandle) {
        let msg = ServerMessage::Joined(peer.username().clone());
        if let Err(e) = self.broadcast_except(Some(peer), &msg) {
            warn!("Join notice for {} not sent: {}", peer.id(), e);
        }
        echo(&msg);
    }

    /// Deliver a private message, or tell the sender the target is absent
    pub fn whisper(&self, from: &PeerHandle, to: &str, text: &str) {
        match self.registry.lookup(to) {
            Ok(target) => {
                let msg = ServerMessage::Whisper {
                    from: from.username().clone(),
                    text: text.to_string(),
                };
                match target.send(&msg) {
                    Ok(()) => {}
                    Err(SendError::Oversized(e)) => {
                        debug!("Whisper from {} not relayed: {}", from.username(), e);
                        self.notify(from, &ServerMessage::MessageTooLong);
                    }
                    Err(e) => warn!(
                        "Failed to whisper to {} from {}: {}",
                        target.username(),
                        from.username(),
                        e
                    ),
                }
            }
            Err(e) => {
                debug!("Whisper from {} to missing user {}", from.username(), to);
                self.notify(from, &ServerMessage::from(e));
            }
        }
    }

    /// Send the list of connected usernames to the requester
    pub fn list(&self, requester: &PeerHandle) {
        let names = self.registry.usernames();
        self.notify(requester, &ServerMessage::UserList(names));
    }

    /// Parse and execute a `/` command from `sender`
    pub fn dispatch(&self, line: &str, sender: &PeerHandle) {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                debug!("Malformed command from {}: {}", sender.username(), e);
                self.notify(sender, &ServerMessage::from(e));
                return;
            }
        };

        match command {
            Command::Quit => self.disconnect(sender, Removal::Unregister),
            Command::Whisper { to, text } => self.whisper(sender, &to, &text),
            Command::List => self.list(sender),
            Command::Unknown(token) => {
                self.notify(sender, &ServerMessage::UnknownCommand(token));
            }
        }
    }

    /// Run the disconnect sequence for `peer`
    ///
    /// Order: release the username, send the close sentinel, close the
    /// channel, announce the departure. Only the first caller for a given
    /// peer does anything.
    pub fn disconnect(&self, peer: &PeerHandle, removal: Removal) {
        if !peer.begin_close() {
            debug!("{} ({}) already disconnected", peer.username(), peer.id());
            return;
        }

        if removal == Removal::Unregister && !self.registry.release(peer) {
            debug!("{} was no longer registered", peer.username());
        }

        if let Err(e) = peer.send_close_signal() {
            warn!("Failed to send close signal to {}: {}", peer.username(), e);
        }
        if let Err(e) = peer.close_channel() {
            debug!("Writer for {} already gone: {}", peer.username(), e);
        }

        info!("{} ({}) disconnected", peer.username(), peer.id());

        let msg = ServerMessage::Left(peer.username().clone());
        if let Err(e) = self.broadcast_except(Some(peer), &msg) {
            warn!("Departure notice for {} not sent: {}", peer.id(), e);
        }
        echo(&msg);
    }

    /// Send to every registered peer except `skip`
    ///
    /// The message is rendered once; if it does not fit in a frame nobody
    /// gets it. Otherwise each recipient fails independently.
    fn broadcast_except(
        &self,
        skip: Option<&PeerHandle>,
        msg: &ServerMessage,
    ) -> Result<(), OversizedFrame> {
        let frame = msg.to_frame()?;
        for peer in self.registry.snapshot() {
            if skip.is_some_and(|s| s.id() == peer.id()) {
                continue;
            }
            if let Err(e) = peer.send_frame(frame.clone()) {
                warn!("Failed to deliver message to {}: {}", peer.username(), e);
            }
        }
        Ok(())
    }

    fn notify(&self, peer: &PeerHandle, msg: &ServerMessage) {
        if let Err(e) = peer.send(msg) {
            warn!("Failed to send notice to {}: {}", peer.username(), e);
        }
    }
}

/// Surface a line on the server's console
fn echo(msg: &ServerMessage) {
    let mut out = std::io::stdout().lock();
    if let Err(e) = out
        .write_all(msg.to_string().as_bytes())
        .and_then(|_| out.flush())
    {
        debug!("Failed to echo to console: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::peer::Outbound;
    use crate::types::Username;

    struct TestPeer {
        handle: PeerHandle,
        rx: mpsc::Receiver<Outbound>,
    }

    impl TestPeer {
        fn frames(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(item) = self.rx.try_recv() {
                match item {
                    Outbound::Frame(text) => frames.push(text),
                    Outbound::Close => frames.push("<close>".to_string()),
                }
            }
            frames
        }
    }

    fn join(router: &Router, name: &str) -> TestPeer {
        let (handle, rx) = PeerHandle::new(Username::parse(name).unwrap(), 16);
        router.registry().try_register(handle.clone()).unwrap();
        TestPeer { handle, rx }
    }

    fn router() -> Router {
        Router::new(Arc::new(Registry::new()))
    }

    #[test]
    fn test_chat_skips_sender() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");
        let mut carol = join(&router, "carol");

        router.broadcast_chat(&alice.handle, "hello");

        assert!(alice.frames().is_empty());
        assert_eq!(bob.frames(), ["[alice]: hello\n"]);
        assert_eq!(carol.frames(), ["[alice]: hello\n"]);
    }

    #[test]
    fn test_server_broadcast_reaches_everyone() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");

        router.broadcast_server("restart soon").unwrap();

        let expected = "\x1b[1;37m[SERVER]: restart soon\x1b[m\n";
        assert_eq!(alice.frames(), [expected]);
        assert_eq!(bob.frames(), [expected]);
    }

    #[test]
    fn test_broadcast_survives_dead_recipient() {
        let router = router();
        let alice = join(&router, "alice");
        let bob = join(&router, "bob");
        let mut carol = join(&router, "carol");
        drop(bob.rx);

        router.broadcast_chat(&alice.handle, "still here");
        assert_eq!(carol.frames(), ["[alice]: still here\n"]);
    }

    #[test]
    fn test_overlong_chat_is_refused_not_relayed() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");

        let line = "x".repeat(crate::channel::MAX_FRAME_LEN - 5);
        router.broadcast_chat(&alice.handle, &line);
        router.dispatch(&format!("/whisper bob {line}"), &alice.handle);

        assert_eq!(alice.frames(), ["message too long\n", "message too long\n"]);
        assert!(bob.frames().is_empty());
        assert!(!bob.handle.is_closed());

        router.broadcast_chat(&alice.handle, "short");
        assert_eq!(bob.frames(), ["[alice]: short\n"]);
    }

    #[test]
    fn test_overlong_server_broadcast_is_rejected() {
        let router = router();
        let mut alice = join(&router, "alice");

        let text = "x".repeat(crate::channel::MAX_FRAME_LEN);
        assert!(router.broadcast_server(&text).is_err());
        assert!(alice.frames().is_empty());
    }

    #[test]
    fn test_whisper_only_reaches_target() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");
        let mut carol = join(&router, "carol");

        router.dispatch("/whisper bob hi there", &alice.handle);

        assert!(alice.frames().is_empty());
        assert_eq!(bob.frames(), ["\x1b[33malice has whispered: hi there\x1b[m\n"]);
        assert!(carol.frames().is_empty());
    }

    #[test]
    fn test_whisper_to_missing_user_notifies_sender_only() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");

        router.dispatch("/whisper dave hello", &alice.handle);

        assert_eq!(alice.frames(), ["no user with username: dave\n"]);
        assert!(bob.frames().is_empty());
    }

    #[test]
    fn test_malformed_whisper_sends_usage() {
        let router = router();
        let mut alice = join(&router, "alice");

        router.dispatch("/whisper bob", &alice.handle);

        assert_eq!(
            alice.frames(),
            ["whisper with: /whisper <username> <message>\n"]
        );
        assert_eq!(router.registry().len(), 1);
    }

    #[test]
    fn test_list_and_unknown() {
        let router = router();
        let mut alice = join(&router, "alice");
        let _bob = join(&router, "bob");

        router.dispatch("/list", &alice.handle);
        router.dispatch("/dance", &alice.handle);

        assert_eq!(
            alice.frames(),
            ["connected users: alice bob\n", "unknown command: /dance\n"]
        );
    }

    #[test]
    fn test_quit_runs_disconnect_sequence() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");

        router.dispatch("/quit", &bob.handle);

        assert!(!router.registry().contains("bob"));
        assert!(bob.handle.is_closed());
        assert_eq!(bob.frames(), ["/close", "<close>"]);
        assert_eq!(alice.frames(), ["\x1b[31mbob has left the chat\x1b[m\n"]);

        // The name is free again right away
        let _bob_again = join(&router, "bob");
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");

        router.disconnect(&bob.handle, Removal::Unregister);
        router.disconnect(&bob.handle, Removal::Unregister);

        assert_eq!(bob.frames(), ["/close", "<close>"]);
        assert_eq!(alice.frames().len(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_new_holder() {
        let router = router();
        let old = join(&router, "bob");
        router.registry().unregister("bob");
        let new = join(&router, "bob");

        router.disconnect(&old.handle, Removal::Unregister);

        assert_eq!(router.registry().lookup("bob").unwrap().id(), new.handle.id());
    }

    #[test]
    fn test_bulk_disconnect_after_drain() {
        let router = router();
        let mut alice = join(&router, "alice");
        let mut bob = join(&router, "bob");

        for peer in router.registry().drain() {
            router.disconnect(&peer, Removal::AlreadyRemoved);
        }

        assert!(router.registry().is_empty());
        assert_eq!(alice.frames(), ["/close", "<close>"]);
        assert_eq!(bob.frames(), ["/close", "<close>"]);
    }
}
