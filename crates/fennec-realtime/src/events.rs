//! Event subscription for realtime sessions.
//!
//! Each [`EventKind`] holds at most one callback; registering again replaces the
//! previous one. The registry is cheap to clone and every clone shares the same slots,
//! so callbacks may register or unregister handlers (including themselves) while the
//! receive loop is dispatching.
//!
//! A callback that returns `Err` or panics never reaches the session internals: the
//! failure is forwarded to the `error` callback as [`Error::Callback`]. Failures of the
//! `error` callback itself are logged and dropped.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::{CallbackError, Error};

/// Names of the events a session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Partial,
    Final,
    Thought,
    Close,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Open,
        EventKind::Partial,
        EventKind::Final,
        EventKind::Thought,
        EventKind::Close,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Partial => "partial",
            EventKind::Final => "final",
            EventKind::Thought => "thought",
            EventKind::Close => "close",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown event: {s}")))
    }
}

/// An emitted event with its payload.
#[derive(Debug)]
pub enum Event {
    Open,
    Partial(String),
    Final(String),
    Thought(String),
    Close,
    Error(Error),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Open => EventKind::Open,
            Event::Partial(_) => EventKind::Partial,
            Event::Final(_) => EventKind::Final,
            Event::Thought(_) => EventKind::Thought,
            Event::Close => EventKind::Close,
            Event::Error(_) => EventKind::Error,
        }
    }

    /// Transcript text for `partial`, `final` and `thought`.
    pub fn text(&self) -> Option<&str> {
        match self {
            Event::Partial(t) | Event::Final(t) | Event::Thought(t) => Some(t.as_str()),
            _ => None,
        }
    }
}

pub type CallbackResult = Result<(), CallbackError>;

type Callback = Arc<dyn Fn(&Event) -> CallbackResult + Send + Sync>;

/// Single-slot callback registry keyed by [`EventKind`].
#[derive(Clone, Default)]
pub struct EventRegistry {
    slots: Arc<RwLock<HashMap<EventKind, Callback>>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<EventKind> = EventKind::ALL
            .into_iter()
            .filter(|kind| self.is_registered(*kind))
            .collect();
        f.debug_struct("EventRegistry")
            .field("registered", &registered)
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `kind`, replacing any previous one.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> &Self
    where
        F: Fn(&Event) -> CallbackResult + Send + Sync + 'static,
    {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.insert(kind, Arc::new(callback));
        self
    }

    /// Removes the callback for `kind`, if any.
    pub fn off(&self, kind: EventKind) -> &Self {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.remove(&kind);
        self
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.contains_key(&kind)
    }

    pub fn on_open<F>(&self, callback: F) -> &Self
    where
        F: Fn() -> CallbackResult + Send + Sync + 'static,
    {
        self.on(EventKind::Open, move |_| callback())
    }

    pub fn on_partial<F>(&self, callback: F) -> &Self
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_text(EventKind::Partial, callback)
    }

    pub fn on_final<F>(&self, callback: F) -> &Self
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_text(EventKind::Final, callback)
    }

    pub fn on_thought<F>(&self, callback: F) -> &Self
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_text(EventKind::Thought, callback)
    }

    pub fn on_close<F>(&self, callback: F) -> &Self
    where
        F: Fn() -> CallbackResult + Send + Sync + 'static,
    {
        self.on(EventKind::Close, move |_| callback())
    }

    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Error) -> CallbackResult + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| match event {
            Event::Error(err) => callback(err),
            _ => Ok(()),
        })
    }

    fn on_text<F>(&self, kind: EventKind, callback: F) -> &Self
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        self.on(kind, move |event| match event.text() {
            Some(text) => callback(text),
            None => Ok(()),
        })
    }

    fn lookup(&self, kind: EventKind) -> Option<Callback> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.get(&kind).cloned()
    }

    /// Invokes the callback registered for the event's kind, if any.
    ///
    /// The slot lock is released before the callback runs.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let Some(callback) = self.lookup(kind) else {
            return;
        };

        let failure = match invoke(&callback, &event) {
            Ok(()) => return,
            Err(failure) => failure,
        };

        if kind == EventKind::Error {
            debug!(error = %failure, "error callback failed");
            return;
        }

        warn!(event = %kind, error = %failure, "event callback failed");
        if let Some(on_error) = self.lookup(EventKind::Error) {
            let report = Event::Error(Error::Callback {
                event: kind,
                source: failure,
            });
            if let Err(e) = invoke(&on_error, &report) {
                debug!(error = %e, "error callback failed while reporting a callback failure");
            }
        }
    }
}

fn invoke(callback: &Callback, event: &Event) -> CallbackResult {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(result) => result,
        Err(panic) => Err(panic_message(panic).into()),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("callback panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("callback panicked: {s}")
    } else {
        "callback panicked".to_string()
    }
}
