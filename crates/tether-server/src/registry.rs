//! Process-wide map from client id to live [`Client`].

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tether_core::{ClientId, TetherError};
use tracing::info;

use crate::client::{Client, ClientState};
use crate::metrics::CLIENTS_REGISTERED;

/// Client counts by state, for `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClientCounts {
    pub active: usize,
    pub stale: usize,
}

/// The single source of truth for "does this session already exist".
///
/// Map operations are atomic per id and never run client I/O under a shard
/// lock. Iteration goes through [`Registry::snapshot`], which clones handles
/// out first.
#[derive(Default)]
pub struct Registry {
    clients: DashMap<ClientId, Arc<Client>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live client for `id`. DEAD clients are never returned.
    pub fn lookup(&self, id: &ClientId) -> Option<Arc<Client>> {
        let client = self.clients.get(id).map(|entry| Arc::clone(entry.value()))?;
        (client.state() != ClientState::Dead).then_some(client)
    }

    /// Insert `client` if its id is free.
    pub fn register(&self, client: Arc<Client>) -> Result<(), TetherError> {
        match self.clients.entry(client.id().clone()) {
            Entry::Occupied(_) => Err(TetherError::DuplicateClient(client.id().clone())),
            Entry::Vacant(slot) => {
                let _ = slot.insert(client);
                metrics::gauge!(CLIENTS_REGISTERED).increment(1.0);
                Ok(())
            }
        }
    }

    /// Remove `client`, but only if it is still the one registered under its id.
    pub fn remove(&self, client: &Client) -> bool {
        let removed = self
            .clients
            .remove_if(client.id(), |_, registered| std::ptr::eq(Arc::as_ptr(registered), client))
            .is_some();
        if removed {
            metrics::gauge!(CLIENTS_REGISTERED).decrement(1.0);
        }
        removed
    }

    /// Administrative teardown of one client. Returns `false` if unknown.
    pub fn evict(&self, id: &ClientId) -> bool {
        let Some(client) = self.lookup(id) else {
            return false;
        };
        let closed = client.close();
        if closed {
            info!(client_id = %id, "client evicted");
        }
        closed
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn counts(&self) -> ClientCounts {
        self.snapshot()
            .iter()
            .fold(ClientCounts::default(), |mut counts, client| {
                match client.state() {
                    ClientState::Active => counts.active += 1,
                    ClientState::Stale => counts.stale += 1,
                    ClientState::Dead => {}
                }
                counts
            })
    }

    /// Handles to every registered client at this instant.
    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Close every client. Used at server stop.
    pub fn shutdown(&self) -> usize {
        let clients = self.snapshot();
        let closed = clients.iter().filter(|client| client.close()).count();
        info!(closed, "registry shut down");
        closed
    }
}
