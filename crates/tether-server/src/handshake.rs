//! Upgrade handling: decide between a fresh client and a resumed one.
//!
//! Work is split around the protocol upgrade. [`Handshake::prepare`] runs on
//! the HTTP request and can still fail with a status code.
//! [`Handshake::complete`] runs on the upgraded connection and reports its
//! result only through the connection and the logs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use tether_core::{logout_url, ClientId, ControlMessage, SessionIdentity, TetherError};
use tracing::{debug, info, warn};

use crate::app::AppHandler;
use crate::auth::Authenticator;
use crate::client::Client;
use crate::config::SocketConfig;
use crate::connection::Connection;
use crate::metrics::{CLIENTS_CREATED_TOTAL, CLIENTS_RESUMED_TOTAL};
use crate::policy::remote_addr;
use crate::registry::Registry;

/// Request-time decisions carried across the upgrade.
#[derive(Debug)]
pub struct Prepared {
    /// `None` when an authenticator is configured and rejected the request.
    session: Option<SessionIdentity>,
    requested: Option<ClientId>,
    forwarded_headers: HeaderMap,
    remote_addr: String,
    fresh_id: ClientId,
    hello: String,
}

impl Prepared {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Client id the peer asked to resume, if any.
    pub fn requested(&self) -> Option<&ClientId> {
        self.requested.as_ref()
    }
}

/// What [`Handshake::complete`] did with a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// New client registered and announced.
    Created(ClientId),
    /// Connection handed to an existing client.
    Resumed(ClientId),
    /// Unauthenticated: navigation instruction sent, connection closed.
    Redirected,
    /// Identity announcement failed; connection closed, nothing registered.
    Aborted,
}

pub struct Handshake {
    config: SocketConfig,
    registry: Arc<Registry>,
    app: Arc<dyn AppHandler>,
    auth: Option<Arc<dyn Authenticator>>,
}

impl Handshake {
    pub fn new(
        config: SocketConfig,
        registry: Arc<Registry>,
        app: Arc<dyn AppHandler>,
        auth: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        Self {
            config,
            registry,
            app,
            auth,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Checks that must pass before the upgrade is accepted.
    ///
    /// Fails with [`TetherError::OriginRejected`] (403) or
    /// [`TetherError::Encode`] (500). A failed authentication is not an error
    /// here; it is recorded in the result and handled after the upgrade.
    pub async fn prepare(
        &self,
        headers: &HeaderMap,
        client_id: Option<&str>,
        peer: SocketAddr,
    ) -> Result<Prepared, TetherError> {
        self.config.origins.check(headers)?;

        let session = match &self.auth {
            None => Some(SessionIdentity::Anonymous),
            Some(auth) => auth.identify(headers).await,
        };

        let fresh_id = ClientId::new();
        let hello = ControlMessage::Id(fresh_id.clone()).to_json()?;

        Ok(Prepared {
            session,
            requested: client_id
                .filter(|id| !id.is_empty())
                .map(ClientId::from_raw),
            forwarded_headers: self.config.forwarding.snapshot(headers),
            remote_addr: remote_addr(headers, peer),
            fresh_id,
            hello,
        })
    }

    /// Finish the handshake on an upgraded connection.
    pub async fn complete(&self, prepared: Prepared, mut conn: Connection) -> HandshakeOutcome {
        let Prepared {
            session,
            requested,
            forwarded_headers,
            remote_addr,
            fresh_id,
            hello,
        } = prepared;

        let Some(session) = session else {
            return self.redirect(conn).await;
        };

        if let Some(id) = requested {
            if let Some(client) = self.registry.lookup(&id) {
                match client.attach(conn).await {
                    Ok(()) => {
                        info!(client_id = %id, remote = %remote_addr, "client reconnected");
                        metrics::counter!(CLIENTS_RESUMED_TOTAL).increment(1);
                        self.app.on_attach(&client, true);
                        return HandshakeOutcome::Resumed(id);
                    }
                    Err(returned) => {
                        debug!(client_id = %id, "client expired during handoff, starting fresh");
                        conn = returned;
                    }
                }
            } else {
                debug!(client_id = %id, "unknown client id, starting fresh");
            }
        }

        if let Err(e) = conn.send_text(&hello).await {
            warn!(remote = %remote_addr, error = %e, "failed to announce client id");
            conn.close().await;
            return HandshakeOutcome::Aborted;
        }

        let client = Client::new(
            fresh_id.clone(),
            session,
            forwarded_headers,
            self.config.client_options(),
            remote_addr.clone(),
            Arc::clone(&self.app),
            &self.registry,
        );
        if let Err(e) = self.registry.register(Arc::clone(&client)) {
            warn!(client_id = %fresh_id, error = %e, "failed to register client");
            conn.close().await;
            return HandshakeOutcome::Aborted;
        }
        if let Err(conn) = client.attach(conn).await {
            let _ = self.registry.remove(&client);
            conn.close().await;
            return HandshakeOutcome::Aborted;
        }

        info!(client_id = %fresh_id, remote = %remote_addr, "client created");
        metrics::counter!(CLIENTS_CREATED_TOTAL).increment(1);
        self.app.on_attach(&client, false);
        HandshakeOutcome::Created(fresh_id)
    }

    async fn redirect(&self, mut conn: Connection) -> HandshakeOutcome {
        match ControlMessage::Navigate(logout_url(&self.config.base_url)).to_json() {
            Ok(json) => {
                if let Err(e) = conn.send_text(&json).await {
                    debug!(remote = %conn.remote_addr(), error = %e, "failed to send navigate");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode navigate"),
        }
        info!(remote = %conn.remote_addr(), "unauthenticated, redirected to logout");
        conn.close().await;
        HandshakeOutcome::Redirected
    }
}
