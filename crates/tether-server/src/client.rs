//! The durable logical session behind a browser tab.
//!
//! A [`Client`] outlives any single connection. Connection loss moves it to
//! [`ClientState::Stale`] and starts a grace timer; a reattachment inside the
//! window resumes draining the same outbound queue. Expiry or an explicit
//! [`Client::close`] makes it [`ClientState::Dead`], which is terminal.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::http::HeaderMap;
use parking_lot::Mutex;
use serde::Serialize;
use tether_core::{ClientId, SessionIdentity};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::AppHandler;
use crate::connection::{Connection, CLOSE_TIMEOUT};
use crate::heartbeat::Liveness;
use crate::metrics::{CLIENTS_EXPIRED_TOTAL, CLIENTS_STALE_TOTAL};
use crate::outbox::Outbox;
use crate::pump;
use crate::registry::Registry;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// A live connection is installed and its pumps are running.
    Active,
    /// Connection lost, grace timer running, queue still accumulating.
    Stale,
    /// Terminal. Removed from the registry, queue discarded.
    Dead,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-client settings fixed at creation.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Opaque flag passed through to the application.
    pub editable: bool,
    /// Keepalive cadence on an idle connection.
    pub ping_interval: Duration,
    /// Grace window between STALE and DEAD.
    pub reconnect_timeout: Duration,
    /// Consecutive keepalive ticks without hearing from the peer before
    /// the connection is given up.
    pub max_missed_pings: u32,
    /// How long a handoff waits for the previous connection's pumps.
    pub handoff_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            editable: false,
            ping_interval: Duration::from_secs(50),
            reconnect_timeout: Duration::from_secs(2),
            max_missed_pings: 2,
            handoff_timeout: CLOSE_TIMEOUT * 2,
        }
    }
}

struct PumpSet {
    outbound: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl PumpSet {
    /// Wait for both pumps to exit, aborting whichever overruns `timeout`.
    async fn stop(self, timeout: Duration) {
        let Self {
            mut outbound,
            mut inbound,
        } = self;
        if time::timeout(timeout, &mut outbound).await.is_err() {
            outbound.abort();
        }
        if time::timeout(timeout, &mut inbound).await.is_err() {
            inbound.abort();
        }
    }
}

struct LiveConnection {
    id: u64,
    retire: CancellationToken,
    pumps: Option<PumpSet>,
}

struct GraceTimer {
    id: u64,
    handle: JoinHandle<()>,
}

struct ClientInner {
    state: ClientState,
    remote_addr: String,
    live: Option<LiveConnection>,
    /// Pumps of connections that were retired but not yet awaited.
    retired: Vec<PumpSet>,
    grace: Option<GraceTimer>,
}

/// A durable session: identity, outbound queue, and at most one live connection.
pub struct Client {
    id: ClientId,
    session: SessionIdentity,
    forwarded_headers: HeaderMap,
    options: ClientOptions,
    app: Arc<dyn AppHandler>,
    registry: Weak<Registry>,
    /// Serializes connection handoff. Pumps never take it.
    handoff: tokio::sync::Mutex<()>,
    inner: Mutex<ClientInner>,
    outbox: Outbox,
}

impl Client {
    /// Build an ACTIVE client with no connection yet. Call [`Client::attach`] next.
    pub fn new(
        id: ClientId,
        session: SessionIdentity,
        forwarded_headers: HeaderMap,
        options: ClientOptions,
        remote_addr: impl Into<String>,
        app: Arc<dyn AppHandler>,
        registry: &Arc<Registry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            session,
            forwarded_headers,
            options,
            app,
            registry: Arc::downgrade(registry),
            handoff: tokio::sync::Mutex::new(()),
            inner: Mutex::new(ClientInner {
                state: ClientState::Active,
                remote_addr: remote_addr.into(),
                live: None,
                retired: Vec::new(),
                grace: None,
            }),
            outbox: Outbox::default(),
        })
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    /// Request headers captured at creation. Unchanged by reattachment.
    pub fn forwarded_headers(&self) -> &HeaderMap {
        &self.forwarded_headers
    }

    pub fn editable(&self) -> bool {
        self.options.editable
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    /// Network origin of the most recent attachment.
    pub fn remote_addr(&self) -> String {
        self.inner.lock().remote_addr.clone()
    }

    /// Id of the installed connection, `None` while STALE or DEAD.
    pub fn connection_id(&self) -> Option<u64> {
        self.inner.lock().live.as_ref().map(|live| live.id)
    }

    /// Messages queued but not yet written.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Queue a message for delivery in order.
    ///
    /// Accepted while ACTIVE or STALE. Returns `false` once the client is
    /// DEAD, in which case the message is dropped.
    pub fn send(&self, message: impl Into<Arc<str>>) -> bool {
        self.outbox.push(message.into())
    }

    pub(crate) fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub(crate) fn app(&self) -> &Arc<dyn AppHandler> {
        &self.app
    }

    /// Install `conn` as the live connection and start its pumps.
    ///
    /// Any previous connection is retired: its pumps are cancelled, its
    /// outbound pump sends a close frame, and the handoff waits (bounded by
    /// [`ClientOptions::handoff_timeout`]) for both to stop before the new
    /// pumps start. A pending grace timer is cancelled. Concurrent calls are
    /// serialized; the last one wins.
    ///
    /// A DEAD client cannot be resumed; the connection is handed back untouched.
    pub async fn attach(self: &Arc<Self>, conn: Connection) -> Result<(), Connection> {
        let _handoff = self.handoff.lock().await;
        let conn_id = conn.id();
        let retire = CancellationToken::new();

        let (previous, stopping) = {
            let mut inner = self.inner.lock();
            if inner.state == ClientState::Dead {
                return Err(conn);
            }
            if let Some(timer) = inner.grace.take() {
                timer.handle.abort();
            }
            let mut stopping = std::mem::take(&mut inner.retired);
            let previous = inner.live.take().map(|live| {
                live.retire.cancel();
                if let Some(pumps) = live.pumps {
                    stopping.push(pumps);
                }
                live.id
            });
            inner.remote_addr = conn.remote_addr().to_string();
            inner.state = ClientState::Active;
            inner.live = Some(LiveConnection {
                id: conn_id,
                retire: retire.clone(),
                pumps: None,
            });
            (previous, stopping)
        };

        if let Some(previous) = previous {
            debug!(client_id = %self.id, previous, conn_id, "replacing live connection");
        }
        for pumps in stopping {
            pumps.stop(self.options.handoff_timeout).await;
        }

        // Closed while the old pumps were stopping: refuse, like any DEAD client.
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let still_active = inner.state == ClientState::Active;
        let Some(live) = inner
            .live
            .as_mut()
            .filter(|live| still_active && live.id == conn_id)
        else {
            return Err(conn);
        };

        let liveness = Arc::new(Liveness::new());
        let (sink, stream) = conn.split();
        live.pumps = Some(PumpSet {
            outbound: tokio::spawn(pump::run_outbound(
                Arc::clone(self),
                conn_id,
                retire.clone(),
                Arc::clone(&liveness),
                sink,
            )),
            inbound: tokio::spawn(pump::run_inbound(
                Arc::clone(self),
                conn_id,
                retire,
                liveness,
                stream,
            )),
        });
        Ok(())
    }

    /// ACTIVE to STALE, if `conn_id` is still the live connection.
    pub(crate) fn mark_stale(self: &Arc<Self>, conn_id: u64, reason: &'static str) {
        let remote = {
            let mut inner = self.inner.lock();
            if inner.state != ClientState::Active
                || inner.live.as_ref().map(|live| live.id) != Some(conn_id)
            {
                return;
            }
            if let Some(live) = inner.live.take() {
                live.retire.cancel();
                if let Some(pumps) = live.pumps {
                    inner.retired.push(pumps);
                }
            }
            inner.state = ClientState::Stale;

            let timer_id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
            let grace = self.options.reconnect_timeout;
            let client = Arc::clone(self);
            let handle = tokio::spawn(async move {
                time::sleep(grace).await;
                client.expire(timer_id);
            });
            inner.grace = Some(GraceTimer {
                id: timer_id,
                handle,
            });
            inner.remote_addr.clone()
        };

        info!(
            client_id = %self.id,
            conn_id,
            remote = %remote,
            reason,
            pending = self.outbox.len(),
            "client stale"
        );
        metrics::counter!(CLIENTS_STALE_TOTAL, "reason" => reason).increment(1);
    }

    /// STALE to DEAD when grace timer `timer_id` fires.
    fn expire(&self, timer_id: u64) {
        {
            let mut inner = self.inner.lock();
            let current = inner.grace.as_ref().is_some_and(|t| t.id == timer_id);
            if !current || inner.state != ClientState::Stale {
                return;
            }
            inner.grace = None;
            Self::retire_all(&mut inner);
        }
        self.finish("grace_expired");
    }

    /// Tear the session down from any live state.
    ///
    /// Returns `false` if it was already DEAD.
    pub fn close(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state == ClientState::Dead {
                return false;
            }
            if let Some(timer) = inner.grace.take() {
                timer.handle.abort();
            }
            Self::retire_all(&mut inner);
        }
        self.finish("closed");
        true
    }

    fn retire_all(inner: &mut ClientInner) {
        inner.state = ClientState::Dead;
        if let Some(live) = inner.live.take() {
            live.retire.cancel();
        }
        inner.retired.clear();
    }

    fn finish(&self, reason: &'static str) {
        let dropped = self.outbox.close();
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.remove(self);
        }
        self.app.on_expire(&self.id);
        info!(client_id = %self.id, dropped, reason, "client expired");
        metrics::counter!(CLIENTS_EXPIRED_TOTAL, "reason" => reason).increment(1);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("remote_addr", &inner.remote_addr)
            .field("pending", &self.outbox.len())
            .finish_non_exhaustive()
    }
}
