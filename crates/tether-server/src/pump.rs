//! Read and write loops for one connection instance.
//!
//! Both pumps stop when the connection's retire token is cancelled. Neither
//! talks to the other; a failure on either side goes through
//! [`Client::mark_stale`], which retires both.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{SinkExt, StreamExt};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::Client;
use crate::connection::{close_sink, FrameSink, FrameStream};
use crate::heartbeat::{Beat, Liveness, MissedPongs};
use crate::metrics::OUTBOUND_MESSAGES_TOTAL;

/// Drain the client's outbox onto `sink` in order, with keepalive pings.
///
/// A message leaves the outbox only after its write succeeds. Each tick of
/// `ping_interval` checks whether the peer has been heard from; a ping goes
/// out unless the tick saw both a write and a reply. After
/// `max_missed_pings` silent ticks the connection is treated as half-open
/// and the client goes STALE. On exit the connection gets a close frame.
pub(crate) async fn run_outbound(
    client: Arc<Client>,
    conn_id: u64,
    retire: CancellationToken,
    liveness: Arc<Liveness>,
    mut sink: FrameSink,
) {
    let ping_interval = client.options().ping_interval;
    let mut ticker = time::interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pongs = MissedPongs::new(client.options().max_missed_pings);
    let mut wrote_since_tick = false;

    'pump: loop {
        tokio::select! {
            biased;
            () = retire.cancelled() => break,
            () = client.outbox().ready() => {
                while let Some(message) = client.outbox().peek() {
                    if retire.is_cancelled() {
                        break 'pump;
                    }
                    if let Err(e) = sink.send(Message::Text(message.to_string().into())).await {
                        debug!(client_id = %client.id(), conn_id, error = %e, "write failed");
                        client.mark_stale(conn_id, "write_failed");
                        break 'pump;
                    }
                    client.outbox().commit(&message);
                    wrote_since_tick = true;
                    metrics::counter!(OUTBOUND_MESSAGES_TOTAL).increment(1);
                }
                if client.outbox().is_closed() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let responded = liveness.check_alive();
                match pongs.observe(responded) {
                    Beat::TimedOut => {
                        debug!(client_id = %client.id(), conn_id, "peer stopped answering pings");
                        client.mark_stale(conn_id, "keepalive_timeout");
                        break;
                    }
                    Beat::Missed(missed) => trace!(client_id = %client.id(), conn_id, missed, "pong missed"),
                    Beat::Alive => {}
                }
                let idle = !std::mem::take(&mut wrote_since_tick);
                if responded && !idle {
                    continue;
                }
                trace!(client_id = %client.id(), conn_id, "ping");
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(client_id = %client.id(), conn_id, error = %e, "ping failed");
                    client.mark_stale(conn_id, "ping_failed");
                    break;
                }
            }
        }
    }

    close_sink(&mut sink).await;
    trace!(client_id = %client.id(), conn_id, "outbound pump stopped");
}

/// Dispatch inbound frames to the application until the peer goes away.
///
/// Every frame read counts as a sign of life for the keepalive check.
pub(crate) async fn run_inbound(
    client: Arc<Client>,
    conn_id: u64,
    retire: CancellationToken,
    liveness: Arc<Liveness>,
    mut stream: FrameStream,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = retire.cancelled() => break,
            frame = stream.next() => frame,
        };
        if matches!(frame, Some(Ok(_))) {
            liveness.mark_alive();
        }

        match frame {
            Some(Ok(Message::Text(text))) => {
                client.app().on_message(&client, text.as_str().to_owned()).await;
            }
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => client.app().on_message(&client, text).await,
                Err(_) => debug!(client_id = %client.id(), conn_id, "dropping non-utf8 binary frame"),
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                client.mark_stale(conn_id, "peer_closed");
                break;
            }
            Some(Err(e)) => {
                debug!(client_id = %client.id(), conn_id, error = %e, "read failed");
                client.mark_stale(conn_id, "read_failed");
                break;
            }
        }
    }
    trace!(client_id = %client.id(), conn_id, "inbound pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::HeaderMap;
    use tether_core::{ClientId, SessionIdentity};

    use crate::app::testing::RecordingHandler;
    use crate::client::{ClientOptions, ClientState};
    use crate::connection::testing::pair;
    use crate::registry::Registry;

    fn client_with(options: ClientOptions, app: Arc<RecordingHandler>) -> (Arc<Registry>, Arc<Client>) {
        let registry = Arc::new(Registry::new());
        let client = Client::new(
            ClientId::new(),
            SessionIdentity::Anonymous,
            HeaderMap::new(),
            options,
            "peer",
            app,
            &registry,
        );
        (registry, client)
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_gets_pings() {
        let options = ClientOptions {
            ping_interval: Duration::from_secs(10),
            ..ClientOptions::default()
        };
        let (_registry, client) = client_with(options, Arc::default());
        let (conn, mut peer) = pair("peer");
        client.attach(conn).await.unwrap();

        time::advance(Duration::from_secs(11)).await;
        assert!(matches!(peer.next_frame().await, Some(Message::Ping(_))));
    }

    fn count_pings(peer: &mut crate::connection::testing::Peer) -> usize {
        let mut pings = 0;
        while let Ok(Some(frame)) = peer.from_server.try_next() {
            if matches!(frame, Message::Ping(_)) {
                pings += 1;
            }
        }
        pings
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_pings_every_interval() {
        let options = ClientOptions {
            ping_interval: Duration::from_secs(10),
            max_missed_pings: 100,
            ..ClientOptions::default()
        };
        let (_registry, client) = client_with(options, Arc::default());
        let (conn, mut peer) = pair("peer");
        client.attach(conn).await.unwrap();

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count_pings(&mut peer), 3);
        assert_eq!(client.state(), ClientState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_goes_stale() {
        let options = ClientOptions {
            ping_interval: Duration::from_secs(10),
            reconnect_timeout: Duration::from_secs(3600),
            ..ClientOptions::default()
        };
        let (_registry, client) = client_with(options, Arc::default());
        let (conn, mut peer) = pair("peer");
        client.attach(conn).await.unwrap();
        client.send("queued");

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(client.state(), ClientState::Stale);
        assert_eq!(client.connection_id(), None);
        assert_eq!(peer.next_text().await.as_deref(), Some("queued"));
        assert!(peer.next_text().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn answering_peer_stays_active() {
        let options = ClientOptions {
            ping_interval: Duration::from_secs(10),
            reconnect_timeout: Duration::from_secs(3600),
            ..ClientOptions::default()
        };
        let (_registry, client) = client_with(options, Arc::default());
        let (conn, mut peer) = pair("peer");
        client.attach(conn).await.unwrap();

        let responder = tokio::spawn(async move {
            while let Some(frame) = peer.from_server.next().await {
                if let Message::Ping(payload) = frame {
                    let _ = peer.to_server.unbounded_send(Ok(Message::Pong(payload)));
                }
            }
        });

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(client.state(), ClientState::Active);
        responder.abort();
    }

    #[tokio::test]
    async fn binary_utf8_frames_are_dispatched() {
        let app = Arc::new(RecordingHandler::default());
        let (_registry, client) = client_with(ClientOptions::default(), app.clone());
        let (conn, peer) = pair("peer");
        client.attach(conn).await.unwrap();

        let _ = peer
            .to_server
            .unbounded_send(Ok(Message::Binary(Bytes::from_static(b"\xff\xfe"))));
        let _ = peer
            .to_server
            .unbounded_send(Ok(Message::Binary(Bytes::from_static(b"bin"))));

        for _ in 0..200 {
            if !app.messages.lock().is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        let messages = app.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, "bin");
    }

    #[tokio::test]
    async fn close_frame_from_peer_marks_stale() {
        let (_registry, client) = client_with(ClientOptions::default(), Arc::default());
        let (conn, peer) = pair("peer");
        client.attach(conn).await.unwrap();

        let _ = peer.to_server.unbounded_send(Ok(Message::Close(None)));
        for _ in 0..200 {
            if client.state() == ClientState::Stale {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(client.state(), ClientState::Stale);
    }

    #[tokio::test]
    async fn read_error_marks_stale() {
        let (_registry, client) = client_with(ClientOptions::default(), Arc::default());
        let (conn, peer) = pair("peer");
        client.attach(conn).await.unwrap();

        let _ = peer
            .to_server
            .unbounded_send(Err(axum::Error::new(std::io::Error::other("reset"))));
        for _ in 0..200 {
            if client.state() == ClientState::Stale {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(client.state(), ClientState::Stale);
    }
}
