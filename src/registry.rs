//! Connection registry
//!
//! Shared username → peer mapping. Every operation holds a single mutex for
//! a map insert, remove, lookup or copy only, and never across an `.await`.
//! Broadcasts iterate over a [`Registry::snapshot`] taken outside the lock.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::RegistryError;
use crate::peer::PeerHandle;
use crate::types::Username;

/// All admitted peers, keyed by username
#[derive(Debug, Default)]
pub struct Registry {
    peers: Mutex<BTreeMap<Username, PeerHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, BTreeMap<Username, PeerHandle>> {
        // The map is always left consistent, so a poisoned lock is still usable
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a peer under its username, unless the name is already held
    pub fn try_register(&self, peer: PeerHandle) -> Result<(), RegistryError> {
        let mut peers = self.peers();
        match peers.entry(peer.username().clone()) {
            Entry::Vacant(slot) => {
                debug!("Registered '{}' ({})", peer.username(), peer.id());
                slot.insert(peer);
                Ok(())
            }
            Entry::Occupied(slot) => Err(RegistryError::NameTaken(slot.key().clone())),
        }
    }

    /// Remove whatever peer holds `username`
    pub fn unregister(&self, username: &str) -> Option<PeerHandle> {
        self.peers().remove(username)
    }

    /// Remove the entry for `peer` only if it is still this very peer
    ///
    /// Returns false if the name is free or already reused by a newer
    /// connection.
    pub fn release(&self, peer: &PeerHandle) -> bool {
        let mut peers = self.peers();
        match peers.entry(peer.username().clone()) {
            Entry::Occupied(slot) if slot.get().id() == peer.id() => {
                slot.remove();
                true
            }
            _ => false,
        }
    }

    /// Find the peer registered under `username`
    pub fn lookup(&self, username: &str) -> Result<PeerHandle, RegistryError> {
        self.peers()
            .get(username)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(username.to_string()))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.peers().contains_key(username)
    }

    /// Point-in-time copy of every registered peer, in username order
    pub fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers().values().cloned().collect()
    }

    /// Sorted list of registered usernames
    pub fn usernames(&self) -> Vec<Username> {
        self.peers().keys().cloned().collect()
    }

    /// Empty the registry in one step, returning every peer
    pub fn drain(&self) -> Vec<PeerHandle> {
        std::mem::take(&mut *self.peers()).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }
}
