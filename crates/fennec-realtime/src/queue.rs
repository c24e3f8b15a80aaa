//! Bounded message queue between the receive loop and pull-style consumers.
//!
//! Pushing never blocks: when the queue is full the oldest message is evicted so
//! consumers always see the most recent transcripts. Closing the queue acts as the
//! end-of-stream marker; it takes no capacity and is observed only after every
//! message queued before it has been drained.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use fennec_realtime_types::InboundMessage;
use futures_util::{Stream, StreamExt};
use futures_util::stream::BoxStream;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<InboundMessage>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MessageQueue {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                ..Inner::default()
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueues `msg`, evicting the oldest entry if full. Returns the evicted message.
    pub fn push(&self, msg: InboundMessage) -> Option<InboundMessage> {
        let evicted = {
            let mut inner = self.lock();
            let evicted = if inner.items.len() >= self.capacity {
                inner.dropped += 1;
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(msg);
            evicted
        };
        self.notify.notify_waiters();
        evicted
    }

    /// Marks the end of the stream. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Non-blocking dequeue. `None` when empty, whether or not the queue is closed.
    pub fn try_pop(&self) -> Option<InboundMessage> {
        self.lock().items.pop_front()
    }

    /// Waits for the next message. Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<InboundMessage> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(msg) = inner.items.pop_front() {
                    return Some(msg);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

/// Single-pass stream of queued server messages; ends at the end-of-stream marker.
pub struct MessageStream {
    inner: BoxStream<'static, InboundMessage>,
}

impl MessageStream {
    pub(crate) fn new(queue: Arc<MessageQueue>) -> Self {
        let inner = futures_util::stream::unfold(queue, |queue| async move {
            let msg = queue.pop().await?;
            Some((msg, queue))
        });
        Self {
            inner: Box::pin(inner.fuse()),
        }
    }
}

impl Stream for MessageStream {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}
