//! Inbound packet dispatch and callback registry
//!
//! The protocol has no request ids, so inbound packs are routed purely by
//! their inner `t`. Sessions update their own state first, then fire any
//! callbacks registered for the kind.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tracing::warn;

/// Response kinds a session routes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// `bindok` - session key issued
    BindOk,
    /// `dat` - column-oriented state report
    Data,
    /// `res` - command acknowledgement
    CommandAck,
}

impl ResponseKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "bindok" => Some(Self::BindOk),
            "dat" => Some(Self::Data),
            "res" => Some(Self::CommandAck),
            _ => None,
        }
    }
}

/// Event delivered to registered callbacks
#[derive(Clone, Debug)]
pub enum DeviceEvent {
    BindOk { key: String },
    Data { state: HashMap<String, Value> },
    CommandAck { state: HashMap<String, Value> },
}

impl DeviceEvent {
    pub fn kind(&self) -> ResponseKind {
        match self {
            DeviceEvent::BindOk { .. } => ResponseKind::BindOk,
            DeviceEvent::Data { .. } => ResponseKind::Data,
            DeviceEvent::CommandAck { .. } => ResponseKind::CommandAck,
        }
    }
}

/// Registered callback
pub type Handler = Box<dyn Fn(&DeviceEvent) + Send>;

/// Registration handle returned by [`HandlerRegistry::add`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Callback set keyed by response kind
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: u64,
    handlers: HashMap<ResponseKind, Vec<(HandlerId, Handler)>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ResponseKind, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a callback; unknown ids are ignored
    pub fn remove(&mut self, id: HandlerId) {
        for handlers in self.handlers.values_mut() {
            handlers.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Fire every callback registered for the event's kind
    ///
    /// A panicking callback is logged and skipped; the rest still run.
    pub fn dispatch(&self, event: &DeviceEvent) {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            return;
        };
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(id = id.0, kind = ?event.kind(), "event callback panicked");
            }
        }
    }
}
