//! Application collaborator: receives inbound frames and pushes replies.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::ClientId;
use tracing::debug;

use crate::client::Client;

/// Consumer of inbound application frames.
///
/// Transport failures are never reported here; they only show up as the
/// client's state. Replies go through [`Client::send`].
#[async_trait]
pub trait AppHandler: Send + Sync + 'static {
    /// One inbound text frame (or UTF-8 binary frame) from the peer.
    async fn on_message(&self, client: &Arc<Client>, text: String);

    /// Called after a connection is installed. `resumed` is true on reattachment.
    fn on_attach(&self, _client: &Arc<Client>, _resumed: bool) {}

    /// Called once when a client reaches DEAD and leaves the registry.
    fn on_expire(&self, _client_id: &ClientId) {}
}

/// Sends every inbound frame back to the client that sent it.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl AppHandler for EchoHandler {
    async fn on_message(&self, client: &Arc<Client>, text: String) {
        if !client.send(text) {
            debug!(client_id = %client.id(), "echo dropped, client is dead");
        }
    }
}
