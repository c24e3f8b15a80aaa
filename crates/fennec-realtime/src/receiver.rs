//! Background receive loop for an open session.

use std::sync::Arc;

use fennec_realtime_types::{COMPLETE_THOUGHT, InboundMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, info, trace, warn};

use crate::Error;
use crate::events::{Event, EventRegistry};
use crate::keepalive::{Keepalive, KeepaliveAction};
use crate::queue::MessageQueue;
use crate::session::{SharedSink, WsSource};

/// Maps a decoded server message to the event it triggers, if any.
pub(crate) fn classify(msg: &InboundMessage, detect_thoughts: bool) -> Option<Event> {
    if msg.is_error() {
        return Some(Event::Error(Error::ServerReported(msg.clone())));
    }
    let text = msg.text()?;
    if detect_thoughts && msg.kind() == Some(COMPLETE_THOUGHT) {
        return Some(Event::Thought(text.to_string()));
    }
    if msg.is_final() {
        Some(Event::Final(text.to_string()))
    } else {
        Some(Event::Partial(text.to_string()))
    }
}

pub(crate) fn closed_error(frame: Option<CloseFrame>) -> Error {
    match frame {
        Some(frame) => Error::ConnectionClosed {
            code: Some(u16::from(frame.code)),
            reason: Some(frame.reason.as_str().to_string()).filter(|r| !r.is_empty()),
        },
        None => Error::ConnectionClosed {
            code: None,
            reason: None,
        },
    }
}

/// Owns the read half of the connection for the lifetime of the `Open` state.
///
/// Dropping the receiver, whether it ran to completion or was aborted, closes the
/// message queue so pull consumers always terminate.
pub(crate) struct Receiver {
    reader: WsSource,
    writer: SharedSink,
    events: EventRegistry,
    queue: Arc<MessageQueue>,
    detect_thoughts: bool,
    keepalive: Keepalive,
}

impl Receiver {
    pub(crate) fn new(
        reader: WsSource,
        writer: SharedSink,
        events: EventRegistry,
        queue: Arc<MessageQueue>,
        detect_thoughts: bool,
        keepalive: Keepalive,
    ) -> Self {
        Self {
            reader,
            writer,
            events,
            queue,
            detect_thoughts,
            keepalive,
        }
    }

    pub(crate) async fn run(mut self) {
        let failure = self.pump().await;
        match &failure {
            Error::ConnectionClosed { code, reason } => {
                info!(code = ?code, reason = ?reason, "server closed the connection")
            }
            other => warn!(error = %other, "receive loop stopped"),
        }
        self.events.emit(Event::Error(failure));
    }

    /// Processes frames until the transport fails; returns the cause.
    async fn pump(&mut self) -> Error {
        loop {
            tokio::select! {
                frame = self.reader.next() => match frame {
                    Some(Ok(message)) => {
                        self.keepalive.record_activity();
                        match message {
                            Message::Text(text) => self.handle_payload(text.as_str().as_bytes()),
                            Message::Binary(data) => self.handle_payload(&data),
                            Message::Close(frame) => return closed_error(frame),
                            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => return Error::Transport(e),
                    None => return closed_error(None),
                },
                _ = self.keepalive.wait() => match self.keepalive.poll(Instant::now()) {
                    Some(KeepaliveAction::Ping) => {
                        if let Err(e) = self.ping().await {
                            return e;
                        }
                    }
                    Some(KeepaliveAction::TimedOut) => {
                        return Error::KeepaliveTimeout(self.keepalive.timeout());
                    }
                    None => {}
                },
            }
        }
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => {
                trace!("sending keepalive ping");
                sink.send(Message::Ping(Default::default()))
                    .await
                    .map_err(Error::Transport)
            }
            None => Ok(()),
        }
    }

    fn handle_payload(&self, raw: &[u8]) {
        let Some(msg) = InboundMessage::decode(raw) else {
            debug!(len = raw.len(), "dropping undecodable frame");
            return;
        };

        if let Some(event) = classify(&msg, self.detect_thoughts) {
            self.events.emit(event);
        }

        if self.queue.push(msg).is_some() {
            debug!(capacity = self.queue.capacity(), "message queue full, dropped oldest");
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.queue.close();
    }
}
