use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Ordered queue of messages waiting for a connection.
///
/// Survives connection replacement. The outbound pump peeks the head, writes
/// it, and only then commits, so a failed write leaves the entry for the next
/// connection. Closing discards everything and rejects further pushes.
#[derive(Default)]
pub(crate) struct Outbox {
    inner: Mutex<OutboxInner>,
    notify: Notify,
}

#[derive(Default)]
struct OutboxInner {
    queue: VecDeque<Arc<str>>,
    closed: bool,
}

impl Outbox {
    /// Append a message. Returns `false` once closed.
    pub(crate) fn push(&self, message: Arc<str>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            inner.queue.push_back(message);
        }
        self.notify.notify_one();
        true
    }

    pub(crate) fn peek(&self) -> Option<Arc<str>> {
        self.inner.lock().queue.front().cloned()
    }

    /// Drop the head if it is still `sent`.
    pub(crate) fn commit(&self, sent: &Arc<str>) {
        let mut inner = self.inner.lock();
        if inner.queue.front().is_some_and(|head| Arc::ptr_eq(head, sent)) {
            let _ = inner.queue.pop_front();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Discard pending messages and reject further pushes.
    pub(crate) fn close(&self) -> usize {
        let dropped = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            let n = inner.queue.len();
            inner.queue.clear();
            n
        };
        self.notify.notify_one();
        dropped
    }

    /// Resolve once the queue is non-empty or closed.
    pub(crate) async fn ready(&self) {
        loop {
            {
                let inner = self.inner.lock();
                if inner.closed || !inner.queue.is_empty() {
                    return;
                }
            }
            self.notify.notified().await;
        }
    }
}
