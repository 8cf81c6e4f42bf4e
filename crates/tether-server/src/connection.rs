//! One physical duplex connection, split into the halves the pumps own.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time;

/// Write half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;
/// Read half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, axum::Error>> + Send>>;

/// Upper bound on a best-effort close of a connection being discarded.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live connection before it is handed to a client.
pub struct Connection {
    id: u64,
    remote_addr: String,
    sink: FrameSink,
    stream: FrameStream,
}

impl Connection {
    pub fn new(remote_addr: impl Into<String>, sink: FrameSink, stream: FrameStream) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr: remote_addr.into(),
            sink,
            stream,
        }
    }

    pub fn from_socket(socket: WebSocket, remote_addr: impl Into<String>) -> Self {
        let (sink, stream) = socket.split();
        Self::new(remote_addr, Box::pin(sink), Box::pin(stream))
    }

    /// Process-unique id, used to tell connection instances of one client apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), axum::Error> {
        self.sink.send(Message::Text(text.to_owned().into())).await
    }

    /// Send a normal-closure frame and release the write half.
    pub async fn close(mut self) {
        close_sink(&mut self.sink).await;
    }

    pub(crate) fn split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Best-effort close bounded by [`CLOSE_TIMEOUT`].
pub(crate) async fn close_sink(sink: &mut FrameSink) {
    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static(""),
    };
    let _ = time::timeout(CLOSE_TIMEOUT, async {
        let _ = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
    })
    .await;
}


#[cfg(test)]
mod tests {
    use super::testing::pair;
    use super::*;

    #[test]
    fn ids_are_unique() {
        let (a, _pa) = pair("1.1.1.1");
        let (b, _pb) = pair("1.1.1.1");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.remote_addr(), "1.1.1.1");
    }

    #[tokio::test]
    async fn send_text_reaches_peer() {
        let (mut conn, mut peer) = pair("peer");
        conn.send_text(r#"{"id":"c1"}"#).await.unwrap();
        assert_eq!(peer.next_text().await.as_deref(), Some(r#"{"id":"c1"}"#));
    }

    #[tokio::test]
    async fn close_sends_normal_close_frame() {
        let (conn, mut peer) = pair("peer");
        conn.close().await;
        match peer.next_frame().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::NORMAL),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(peer.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn send_after_peer_drop_fails() {
        let (mut conn, peer) = pair("peer");
        drop(peer);
        assert!(conn.send_text("x").await.is_err());
    }
}
